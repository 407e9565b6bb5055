//! Logger setup and log-safe formatting helpers

use log::LevelFilter;

/// Install `env_logger` as the `log` backend.
///
/// `RUST_LOG` wins over `default_level`. A second call is a no-op.
pub fn init(default_level: &str) {
    let level = default_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);

    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();

    if result.is_ok() {
        log::debug!("Logging: initialised at {}", level);
    }
}

/// First five characters of an API key followed by `...`
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(5).collect();
    format!("{}...", prefix)
}
