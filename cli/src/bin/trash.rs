//! floods the queue with numbered test items

use anyhow::Result;
use clap::Parser;
use midden::{Client, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(version, about = "trash - flood a packrat broker with numbered test items")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1",
        help = "broker address to connect to"
    )]
    address: String,
    #[arg(short, long, default_value_t = DEFAULT_PORT, help = "broker port")]
    port: u16,
    #[arg(short, long, default_value_t = 100, help = "how many items to send")]
    count: u32,
    #[arg(
        long = "retrys",
        default_value_t = 3,
        value_name = "0-255",
        help = "retry budget for each item, 255 means infinite"
    )]
    retries: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut client = Client::new();
    client.connect(&args.address, args.port).await?;
    for i in 1..=args.count {
        client
            .send(format!("Data: {i}").as_bytes(), args.retries)
            .await?;
        println!("{i}");
    }
    client.disconnect().await?;
    Ok(())
}
