use anyhow::Result;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::args::LogLevel;

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Fail => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Dbug => LevelFilter::DEBUG,
        }
    }
}

/// stdout subscriber. the CLI loglevel sets the default directive, RUST_LOG
/// can still override individual targets
pub fn init_logging(level: LogLevel) -> Result<()> {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::from(level).into())
                    .from_env()?,
            )
            .pretty()
            .finish(),
    )?;
    Ok(())
}
