use fintrack_core::config::{AppConfig, LogFormat};
use tracing::Level;

/// Installs the global subscriber on stderr so command output on stdout stays
/// machine-readable. A second call is a no-op.
pub fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use fintrack_core::config::{AppConfig, LogFormat};

    use super::init_logging;

    #[test]
    fn repeated_initialization_is_harmless() {
        let mut config = AppConfig::default();
        config.logging.format = LogFormat::Json;
        config.logging.level = "debug".to_string();

        init_logging(&config);
        init_logging(&config);
        tracing::info!(event_name = "test.logging", "still logging after a second init");
    }
}
