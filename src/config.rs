use std::env;

/// Notification dispatcher tuning.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Delivery attempts per (flip, channel) before giving up.
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Per-attempt transport timeout.
    pub send_timeout_secs: u64,
    /// Delivered notifications allowed per (channel, check) within the window.
    pub rate_limit: usize,
    pub rate_window_secs: u64,
    pub queue_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1,
            max_delay_secs: 300,
            send_timeout_secs: 30,
            rate_limit: 10,
            rate_window_secs: 3600,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub sweep_interval_secs: u64,
    pub notify: NotifyConfig,
    #[cfg(feature = "postgres")]
    pub database_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            sweep_interval_secs: 60,
            notify: NotifyConfig::default(),
            #[cfg(feature = "postgres")]
            database_url: String::new(),
        }
    }
}

impl AppConfig {
    /// Reads configuration from the environment, falling back to defaults
    /// for everything except the database URL when the postgres backend is
    /// compiled in.
    pub fn from_env() -> Result<Self, String> {
        let defaults = NotifyConfig::default();
        Ok(Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", 60)?,
            notify: NotifyConfig {
                max_attempts: parse_var("NOTIFY_MAX_ATTEMPTS", defaults.max_attempts)?,
                base_delay_secs: parse_var("NOTIFY_BASE_DELAY_SECS", defaults.base_delay_secs)?,
                max_delay_secs: parse_var("NOTIFY_MAX_DELAY_SECS", defaults.max_delay_secs)?,
                send_timeout_secs: parse_var("NOTIFY_SEND_TIMEOUT_SECS", defaults.send_timeout_secs)?,
                rate_limit: parse_var("NOTIFY_RATE_LIMIT", defaults.rate_limit)?,
                rate_window_secs: parse_var("NOTIFY_RATE_WINDOW_SECS", defaults.rate_window_secs)?,
                queue_capacity: parse_var("DISPATCH_QUEUE_CAPACITY", defaults.queue_capacity)?,
            },
            #[cfg(feature = "postgres")]
            database_url: env::var("DATABASE_URL")
                .map_err(|_| "DATABASE_URL must be set".to_string())?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map_err(|e| format!("{name} is not valid: {e}")),
        Err(_) => Ok(default),
    }
}
