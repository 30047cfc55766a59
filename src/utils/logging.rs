use tracing_subscriber::{fmt, filter::EnvFilter};
use std::path::PathBuf;

pub struct LoggingConfig {
    pub level: String,
    pub log_file: Option<PathBuf>,
    pub console_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            console_output: true,
        }
    }
}

pub fn init_logging(config: LoggingConfig) -> Result<(), std::io::Error> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("logging initialized");
    Ok(())
}
