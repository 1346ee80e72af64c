#[macro_use]
extern crate tracing;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::{net::TcpListener, runtime};

mod args;
mod broker;
mod flag;
mod log;
mod shutdown;

use args::Args;
use broker::{Broker, BrokerConfig};
use shutdown::Shutdown;

fn main() -> Result<()> {
    let args = Args::parse();
    log::init_logging(args.log_level)?;

    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
    let mut shutdown = Shutdown::new();
    let result = runtime.block_on(async_main(args, &mut shutdown));
    shutdown.trigger_shutdown();
    // reaps delivery tasks still waiting on confirmations. the broker is
    // volatile, their in-flight items go away with the process
    runtime.shutdown_timeout(Duration::from_secs(5));
    result
}

async fn async_main(args: Args, shutdown: &mut Shutdown) -> Result<()> {
    shutdown::trap_ctrl_c(shutdown.handle());

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("listening on {}", listener.local_addr()?);

    let config = BrokerConfig {
        dead_letter: !args.no_dead_letter_queue,
        force_retries: args.force_retries,
    };
    if !config.dead_letter {
        warn!("dead letter queue disabled, items that run out of retries will be discarded");
    }
    if let Some(budget) = config.force_retries {
        info!("retry budget of every incoming item forced to {budget}");
    }

    let broker = Broker::new(config);
    broker.spawn_dispatchers(shutdown);

    info!("running - press ctrl+c to exit");
    broker.serve(listener, shutdown.handle()).await?;

    shutdown.trigger_shutdown();
    shutdown.wait_for_completion().await;
    Ok(())
}
