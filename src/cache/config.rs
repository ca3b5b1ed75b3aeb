/**
 * Configuration for watch caches
 */
use super::errors::{CacheError, config_error};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, warn};

/// Default long-poll wait budget in seconds
pub const DEFAULT_WATCH_SECONDS: u64 = 10;

/// Upper bound the source accepts for a blocking query wait (10 minutes)
pub const MAX_WATCH_SECONDS: u64 = 600;

/// Default delay before retrying after a failed fetch, in milliseconds
pub const DEFAULT_BACKOFF_DELAY_MS: u64 = 10_000;

/// Default minimum time between two requests, in milliseconds
pub const DEFAULT_MIN_DELAY_BETWEEN_REQUESTS_MS: u64 = 0;

/// Read timeout auto-adjustment is on unless disabled
pub const DEFAULT_TIMEOUT_AUTO_ADJUSTMENT_ENABLED: bool = true;

/// Extra read timeout on top of the wait budget, in milliseconds
pub const DEFAULT_TIMEOUT_AUTO_ADJUSTMENT_MARGIN_MS: u64 = 2_000;

/// Environment variable prefix for `CacheConfig::from_env`
pub const ENV_PREFIX: &str = "CONSULWATCH_";

/// Consumer for refresh errors: `(severity, message, error)`
pub type RefreshErrorFn = Arc<dyn Fn(Level, &str, &CacheError) + Send + Sync>;

/// How failed refreshes are reported.
///
/// `Error` and `Warn` log every failure at that level. `Custom` receives the
/// severity of the failure itself, see `CacheError::severity`.
#[derive(Clone, Default)]
pub enum RefreshErrorLog {
    #[default]
    Error,
    Warn,
    Custom(RefreshErrorFn),
}

impl RefreshErrorLog {
    pub fn log(&self, message: &str, err: &CacheError) {
        match self {
            Self::Error => error!(error = %err, "{message}"),
            Self::Warn => warn!(error = %err, "{message}"),
            Self::Custom(consumer) => consumer(err.severity(), message, err),
        }
    }
}

impl fmt::Debug for RefreshErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("Error"),
            Self::Warn => f.write_str("Warn"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Wait budget sent with every blocking query, whole seconds
    pub watch_duration: Duration,
    /// Sleep after a failed fetch before retrying
    pub backoff_delay: Duration,
    /// Minimum time between the start of two requests
    pub min_delay_between_requests: Duration,
    /// Bound each fetch with `watch_duration + timeout_auto_adjustment_margin`
    pub timeout_auto_adjustment_enabled: bool,
    pub timeout_auto_adjustment_margin: Duration,
    pub refresh_error_log: RefreshErrorLog,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            watch_duration: Duration::from_secs(DEFAULT_WATCH_SECONDS),
            backoff_delay: Duration::from_millis(DEFAULT_BACKOFF_DELAY_MS),
            min_delay_between_requests: Duration::from_millis(DEFAULT_MIN_DELAY_BETWEEN_REQUESTS_MS),
            timeout_auto_adjustment_enabled: DEFAULT_TIMEOUT_AUTO_ADJUSTMENT_ENABLED,
            timeout_auto_adjustment_margin: Duration::from_millis(
                DEFAULT_TIMEOUT_AUTO_ADJUSTMENT_MARGIN_MS,
            ),
            refresh_error_log: RefreshErrorLog::default(),
        }
    }
}

impl CacheConfig {
    /// Defaults overlaid with `CONSULWATCH_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` if a variable is set but malformed, or the result is invalid
    pub fn from_env() -> Result<Self, CacheError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CacheError> {
        let mut config = Self::default();
        let read = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(raw) = read("WATCH_SECONDS") {
            config.watch_duration = Duration::from_secs(parse_number("WATCH_SECONDS", &raw)?);
        }
        if let Some(raw) = read("BACKOFF_MS") {
            config.backoff_delay = Duration::from_millis(parse_number("BACKOFF_MS", &raw)?);
        }
        if let Some(raw) = read("MIN_DELAY_MS") {
            config.min_delay_between_requests =
                Duration::from_millis(parse_number("MIN_DELAY_MS", &raw)?);
        }
        if let Some(raw) = read("TIMEOUT_ADJUST") {
            config.timeout_auto_adjustment_enabled = raw
                .trim()
                .parse()
                .map_err(|_| config_error("TIMEOUT_ADJUST", "expected true or false"))?;
        }
        if let Some(raw) = read("TIMEOUT_MARGIN_MS") {
            config.timeout_auto_adjustment_margin =
                Duration::from_millis(parse_number("TIMEOUT_MARGIN_MS", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `CacheError::Config` naming the first invalid field
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.watch_duration.subsec_nanos() != 0 {
            return Err(config_error("watch_duration", "must be a whole number of seconds"));
        }
        let secs = self.watch_duration.as_secs();
        if secs == 0 || secs > MAX_WATCH_SECONDS {
            return Err(config_error(
                "watch_duration",
                &format!("must be between 1 and {MAX_WATCH_SECONDS} seconds, got {secs}"),
            ));
        }
        if self.backoff_delay.is_zero() {
            return Err(config_error("backoff_delay", "must be greater than zero"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn watch_seconds(&self) -> u64 {
        self.watch_duration.as_secs()
    }

    /// Read timeout to give a fetch, if auto-adjustment is enabled
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        self.timeout_auto_adjustment_enabled
            .then(|| self.watch_duration + self.timeout_auto_adjustment_margin)
    }

    #[must_use]
    pub fn with_watch_duration(mut self, duration: Duration) -> Self {
        self.watch_duration = duration;
        self
    }

    #[must_use]
    pub fn with_backoff_delay(mut self, delay: Duration) -> Self {
        self.backoff_delay = delay;
        self
    }

    #[must_use]
    pub fn with_min_delay_between_requests(mut self, delay: Duration) -> Self {
        self.min_delay_between_requests = delay;
        self
    }

    #[must_use]
    pub fn with_timeout_auto_adjustment_margin(mut self, margin: Duration) -> Self {
        self.timeout_auto_adjustment_margin = margin;
        self
    }

    #[must_use]
    pub fn with_refresh_error_log(mut self, log: RefreshErrorLog) -> Self {
        self.refresh_error_log = log;
        self
    }
}

fn parse_number(field: &str, raw: &str) -> Result<u64, CacheError> {
    raw.trim()
        .parse()
        .map_err(|_| config_error(field, &format!("expected an unsigned integer, got {raw:?}")))
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(DEFAULT_WATCH_SECONDS > 0, "DEFAULT_WATCH_SECONDS must be greater than 0");
    assert!(DEFAULT_WATCH_SECONDS <= MAX_WATCH_SECONDS, "DEFAULT_WATCH_SECONDS exceeds MAX_WATCH_SECONDS");
    assert!(DEFAULT_BACKOFF_DELAY_MS > 0, "DEFAULT_BACKOFF_DELAY_MS must be greater than 0");
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::errors::FetchError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.watch_duration, Duration::from_secs(10));
        assert_eq!(config.backoff_delay, Duration::from_secs(10));
        assert_eq!(config.min_delay_between_requests, Duration::ZERO);
        assert!(config.timeout_auto_adjustment_enabled);
        assert_eq!(config.timeout_auto_adjustment_margin, Duration::from_secs(2));
        assert!(matches!(config.refresh_error_log, RefreshErrorLog::Error));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_timeout() {
        let mut config = CacheConfig::default();
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(12)));

        config.timeout_auto_adjustment_enabled = false;
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn test_validation() {
        let config = CacheConfig::default().with_watch_duration(Duration::from_millis(1500));
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));

        let config = CacheConfig::default().with_watch_duration(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = CacheConfig::default().with_watch_duration(Duration::from_secs(601));
        assert!(config.validate().is_err());

        let config = CacheConfig::default().with_backoff_delay(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_overlays_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CONSULWATCH_WATCH_SECONDS", "30"),
            ("CONSULWATCH_BACKOFF_MS", "250"),
            ("CONSULWATCH_TIMEOUT_ADJUST", "false"),
        ]);
        let config = CacheConfig::from_lookup(|name| vars.get(name).map(|v| (*v).to_string())).unwrap();

        assert_eq!(config.watch_duration, Duration::from_secs(30));
        assert_eq!(config.backoff_delay, Duration::from_millis(250));
        assert!(!config.timeout_auto_adjustment_enabled);
        assert_eq!(config.timeout_auto_adjustment_margin, Duration::from_secs(2));
    }

    #[test]
    fn test_from_lookup_rejects_malformed_values() {
        let result = CacheConfig::from_lookup(|name| {
            (name == "CONSULWATCH_MIN_DELAY_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(CacheError::Config(msg)) if msg.contains("MIN_DELAY_MS")));
    }

    #[test]
    fn test_custom_refresh_error_log() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let log = RefreshErrorLog::Custom(Arc::new(move |level: Level, message: &str, err: &CacheError| {
            sink.lock().unwrap().push((level, format!("{message}: {err}")));
        }));

        log.log("refresh failed", &CacheError::NoRuntime);
        log.log(
            "refresh failed",
            &CacheError::Fetch(FetchError::Transport("connection refused".to_string())),
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, Level::ERROR);
        assert!(seen[0].1.starts_with("refresh failed"));
        assert_eq!(seen[1].0, Level::WARN);
        assert!(seen[1].1.contains("connection refused"));
    }
}
