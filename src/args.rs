use clap::{Parser, ValueEnum};

/// log verbosity, least to most chatty
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    /// errors only
    Fail,
    /// also dropped frames and failed deliveries
    Warn,
    /// also connection and queue activity
    Info,
    /// also per-frame noise
    Dbug,
}

#[derive(Parser, Debug)]
#[command(version, about = "packrat - a tiny at-least-once message broker")]
pub struct Args {
    #[arg(
        long,
        default_value = "127.0.0.1",
        help = "address to listen on. use 0.0.0.0 to make the broker public"
    )]
    pub host: String,
    #[arg(short, long, default_value_t = midden::DEFAULT_PORT, help = "port to listen on")]
    pub port: u16,
    #[arg(
        long = "loglevel",
        alias = "ll",
        value_enum,
        default_value = "info",
        help = "how much ends up on stdout [fail|warn|info|dbug]"
    )]
    pub log_level: LogLevel,
    #[arg(
        long,
        alias = "ndlq",
        help = "disable the dead letter queue. exhausted items are discarded and DEAD_RECEIVE clients are refused"
    )]
    pub no_dead_letter_queue: bool,
    #[arg(
        short = 'r',
        long,
        value_name = "0-255",
        help = "override the retry budget of every incoming item (255 = infinite)"
    )]
    pub force_retries: Option<u8>,
}
