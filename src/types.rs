use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Advertiser
// ---------------------------------------------------------------------------

/// One advertiser record parsed from a listing page of the affiliate API.
/// Identity fields persist to `advertisers`; `epc` / `rate` become the daily
/// observation for the harvest's snapshot day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiserRecord {
    pub adv_id: String,
    pub name: String,
    pub merchant_id: Option<String>,
    pub category: Option<String>,
    pub adv_type: Option<String>,
    pub mailing_region: Option<String>,
    pub approval_type: Option<String>,
    pub logo_url: Option<String>,
    /// Reported 30-day EPC. Missing or unparseable values are recorded as 0
    /// (no observed earnings), never skipped.
    pub epc: f64,
    pub rate: Option<f64>,
}

// ---------------------------------------------------------------------------
// EPC observation
// ---------------------------------------------------------------------------

/// One persisted EPC value for an (advertiser, calendar day) pair.
/// `day` counts days since the Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpcObservation {
    pub day: i64,
    pub epc: f64,
}

// ---------------------------------------------------------------------------
// Trend classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendCategory {
    /// Regression slope above the upward threshold.
    Upward,
    /// Regression slope below the downward threshold.
    Downward,
    /// Flat slope, low deviation from the window mean.
    Stable,
    /// Flat slope but values swing far from the window mean.
    Volatile,
    /// Too few data points to fit a regression.
    Unknown,
}

impl TrendCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendCategory::Upward => "UPWARD",
            TrendCategory::Downward => "DOWNWARD",
            TrendCategory::Stable => "STABLE",
            TrendCategory::Volatile => "VOLATILE",
            TrendCategory::Unknown => "UNKNOWN",
        }
    }

    /// Parse the persisted string form. Unrecognized input maps to UNKNOWN
    /// rather than failing the read.
    pub fn parse(s: &str) -> Self {
        match s {
            "UPWARD" => TrendCategory::Upward,
            "DOWNWARD" => TrendCategory::Downward,
            "STABLE" => TrendCategory::Stable,
            "VOLATILE" => TrendCategory::Volatile,
            _ => TrendCategory::Unknown,
        }
    }
}

impl std::fmt::Display for TrendCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of classifying one trailing window of EPC values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowTrend {
    pub slope: f64,
    pub avg_epc: f64,
    pub category: TrendCategory,
}

/// Derived trend state for one advertiser, one field set per configured
/// window. Always recomputed whole from the observation history; the window
/// fields are never edited individually.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRecord {
    pub adv_id: String,
    pub trend_7: WindowTrend,
    pub trend_14: WindowTrend,
    pub trend_30: WindowTrend,
    /// Nanosecond UTC epoch of the last recalculation.
    pub last_calculated_at: i64,
}

impl TrendRecord {
    /// Window accessor keyed by length, replacing name-mangled field lookup.
    pub fn window(&self, days: usize) -> Option<&WindowTrend> {
        match days {
            7 => Some(&self.trend_7),
            14 => Some(&self.trend_14),
            30 => Some(&self.trend_30),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Persisted harvest schedule (single row in `schedule_config`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

// ---------------------------------------------------------------------------
// Channel message types
// ---------------------------------------------------------------------------

/// Routed from the HTTP API to the harvest scheduler.
#[derive(Debug)]
pub enum ControlMsg {
    /// Run a harvest now, optionally for a specific snapshot day.
    RunNow { day: Option<i64> },
}
