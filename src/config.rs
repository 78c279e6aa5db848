use crate::error::{AppError, Result};

pub const AFFILIATE_API_URL: &str = "https://www.linkhaitao.com/api2.php";

/// Trailing window lengths (days) the trend pipeline classifies over.
/// Every window must fit inside TREND_WINDOW_DAYS.
pub const TREND_WINDOWS: [usize; 3] = [7, 14, 30];

/// Length of the dense zero-filled history series, in calendar days.
pub const TREND_WINDOW_DAYS: usize = 30;

/// Minimum data points before the calculator will fit a regression.
/// Shorter series classify as UNKNOWN rather than producing a junk slope.
pub const MIN_TREND_POINTS: usize = 3;

/// Classification thresholds for the trend calculator.
pub mod trend_thresholds {
    /// Regression slope above which a window is UPWARD.
    pub const UPWARD_SLOPE: f64 = 0.05;
    /// Regression slope below which a window is DOWNWARD.
    pub const DOWNWARD_SLOPE: f64 = -0.05;
    /// Max relative deviation from the window mean above which a
    /// non-trending window is VOLATILE.
    pub const VOLATILE_DEVIATION: f64 = 0.10;
}

/// Backoff per retry of a failed listing-page fetch (milliseconds).
pub const PAGE_RETRY_BACKOFF_MS: &[u64] = &[500, 1000, 2000];

/// Backoff per retry of a failed trend-history read (milliseconds).
pub const HISTORY_RETRY_BACKOFF_MS: &[u64] = &[50, 200];

/// How often the scheduler checks whether a harvest is due (seconds).
pub const SCHEDULER_TICK_SECS: u64 = 60;

/// Capacity of the control channel carrying manual harvest triggers.
pub const CONTROL_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    /// Affiliate channel identifier sent with every listing request (AFFILIATE_CHANNEL)
    pub channel: String,
    /// Salt appended to the signature base string (AFFILIATE_API_SALT)
    pub api_salt: String,
    /// Bearer-style authorization header value (AFFILIATE_AUTH_TOKEN)
    pub auth_token: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Default seconds between scheduled harvests (HARVEST_INTERVAL_SECS)
    pub harvest_interval_secs: u64,
    /// Advertisers requested per listing page (HARVEST_PAGE_SIZE)
    pub page_size: usize,
    /// Hard cap on pages fetched per harvest (HARVEST_MAX_PAGES)
    pub max_pages: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: std::env::var("AFFILIATE_API_URL")
                .unwrap_or_else(|_| AFFILIATE_API_URL.to_string()),
            channel: std::env::var("AFFILIATE_CHANNEL").unwrap_or_else(|_| "14681".to_string()),
            api_salt: std::env::var("AFFILIATE_API_SALT").unwrap_or_default(),
            auth_token: std::env::var("AFFILIATE_AUTH_TOKEN").unwrap_or_default(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "scanner.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            harvest_interval_secs: std::env::var("HARVEST_INTERVAL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse::<u64>()
                .unwrap_or(86_400),
            page_size: std::env::var("HARVEST_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<usize>()
                .unwrap_or(100),
            max_pages: std::env::var("HARVEST_MAX_PAGES")
                .unwrap_or_else(|_| "500".to_string())
                .parse::<usize>()
                .unwrap_or(500),
        })
    }
}
