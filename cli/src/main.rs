use anyhow::{bail, Result};
use clap::Parser;
use midden::{Client, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(version, about = "packrat-cli - talk to a packrat broker")]
struct Args {
    #[arg(short, long, help = "send the message given with -m to the queue")]
    send: bool,
    #[arg(short, long, help = "receive one item from the queue")]
    receive: bool,
    #[arg(
        short = 'R',
        long,
        alias = "dr",
        help = "receive one item from the dead letter queue"
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
    #[arg(short, long, default_value = "", help = "message to send")]
    message: String,
    #[arg(
        long = "retrys",
        default_value_t = 3,
        value_name = "0-255",
        help = "retry budget for sent messages, 255 means infinite"
    )]
    retries: u8,
    #[arg(
        long,
        alias = "nac",
        help = "skip the confirm after receiving. the broker requeues the item once the connection drops"
    )]
    no_auto_confirm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.send && args.message.is_empty() {
        bail!("sending an empty message is not allowed, pass one with -m");
    }

    if args.send {
        let mut client = Client::new();
        client.connect(&args.address, args.port).await?;
        client.send(args.message.as_bytes(), args.retries).await?;
        client.disconnect().await?;
    }
    if args.receive {
        receive_one(&args, false).await?;
    }
    if args.dead_receive {
        receive_one(&args, true).await?;
    }
    Ok(())
}

async fn receive_one(args: &Args, dead: bool) -> Result<()> {
    let mut client = Client::new();
    client.connect(&args.address, args.port).await?;
    let payload = client.receive(dead).await?;
    println!("Message:");
    println!("{}", String::from_utf8_lossy(&payload));
    if !args.no_auto_confirm {
        client.confirm().await?;
        println!("(auto-confirmed)");
    }
    client.disconnect().await?;
    Ok(())
}
