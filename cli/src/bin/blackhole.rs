//! drains the queue forever, confirming and discarding everything it gets.
//! a payload of exactly `kill` stops it.

use anyhow::Result;
use clap::Parser;
use midden::{Client, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(version, about = "blackhole - receive and discard items until told to stop")]
struct Args {
    #[arg(
        short = 'R',
        long,
        alias = "dr",
        help = "drain the dead letter queue instead of the main one"
    )]
    dead_receive: bool,
    #[arg(
        short,
        long,
        default_value = "127.0.0.1",
        help = "broker address to connect to"
    )]
    address: String,
    #[arg(short, long, default_value_t = DEFAULT_PORT, help = "broker port")]
    port: u16,
    #[arg(
        long,
        alias = "nac",
        help = "skip the confirms. the broker requeues everything once the connection drops"
    )]
    no_auto_confirm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut client = Client::new();
    client.connect(&args.address, args.port).await?;
    println!("Connected to {}:{}", args.address, args.port);

    loop {
        let payload = client.receive(args.dead_receive).await?;
        println!("Message:");
        println!("{}", String::from_utf8_lossy(&payload));
        if !args.no_auto_confirm {
            client.confirm().await?;
            println!("(auto-confirmed)");
        }
        if payload == b"kill" {
            break;
        }
    }
    client.disconnect().await?;
    Ok(())
}
