use std::path::PathBuf;
use std::time::Duration;

pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const CRYPTOCOMPARE_BASE_URL: &str = "https://min-api.cryptocompare.com/data";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_MODEL: &str = "gpt-4o-mini";

/// Listing page size; the catalog is a single fixed page.
pub const CATALOG_PAGE_SIZE: usize = 100;
/// Maximum number of instruments tracked at once.
pub const SELECTION_CAPACITY: usize = 5;
/// Rolling window per symbol (one minute at the default cadence).
pub const MAX_SAMPLES: usize = 60;
pub const POLL_INTERVAL_MS: u64 = 1000;
pub const HTTP_TIMEOUT_SECS: u64 = 10;
pub const QUOTE_CURRENCY: &str = "USD";

pub const SELECTION_STORAGE_KEY: &str = "selected_coins";
pub const DEFAULT_STATE_DIR: &str = ".coinpulse";
pub const LOG_FILE_NAME: &str = "coinpulse.log";

#[derive(Clone, Debug)]
pub struct Settings {
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    pub coingecko_base_url: String,
    pub cryptocompare_base_url: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_api_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            state_dir: env_string("COINPULSE_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            poll_interval: Duration::from_millis(poll_interval_ms()),
            http_timeout: Duration::from_secs(http_timeout_secs()),
            coingecko_base_url: base_url("COINGECKO_BASE_URL", COINGECKO_BASE_URL),
            cryptocompare_base_url: base_url("CRYPTOCOMPARE_BASE_URL", CRYPTOCOMPARE_BASE_URL),
            openai_base_url: base_url("OPENAI_BASE_URL", OPENAI_BASE_URL),
            openai_model: env_string("OPENAI_MODEL").unwrap_or_else(|| OPENAI_MODEL.to_string()),
            openai_api_key: env_string("OPENAI_API_KEY"),
        }
    }

    pub fn with_poll_interval_ms(mut self, millis: u64) -> Self {
        self.poll_interval = Duration::from_millis(clamp_poll_ms(millis));
        self
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.state_dir.join(LOG_FILE_NAME)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn base_url(key: &str, default: &str) -> String {
    env_string(key)
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn clamp_poll_ms(millis: u64) -> u64 {
    millis.clamp(250, 60_000)
}

fn poll_interval_ms() -> u64 {
    env_string("COINPULSE_POLL_MS")
        .and_then(|v| v.parse::<u64>().ok())
        .map(clamp_poll_ms)
        .unwrap_or(POLL_INTERVAL_MS)
}

fn http_timeout_secs() -> u64 {
    env_string("COINPULSE_HTTP_TIMEOUT_SECS")
        .and_then(|v| v.parse::<u64>().ok())
        .map(|v| v.clamp(1, 60))
        .unwrap_or(HTTP_TIMEOUT_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_is_clamped() {
        let settings = Settings::from_env().with_poll_interval_ms(10);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));

        let settings = Settings::from_env().with_poll_interval_ms(120_000);
        assert_eq!(settings.poll_interval, Duration::from_millis(60_000));
    }

    #[test]
    fn test_log_file_lives_in_state_dir() {
        let mut settings = Settings::from_env();
        settings.state_dir = PathBuf::from("/tmp/coinpulse-state");
        assert_eq!(
            settings.log_file_path(),
            PathBuf::from("/tmp/coinpulse-state").join(LOG_FILE_NAME)
        );
    }
}
