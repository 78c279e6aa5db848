//! Pure windowed trend classification.
//!
//! Given a chronologically ordered series of daily EPC values (oldest first,
//! gaps already zero-filled by the caller), fits an ordinary least-squares
//! regression of value against day index and classifies the window.

use crate::config::{trend_thresholds, MIN_TREND_POINTS};
use crate::types::{TrendCategory, WindowTrend};

/// Classify one window of EPC values.
///
/// Series shorter than [`MIN_TREND_POINTS`] classify as UNKNOWN with a zero
/// slope; the average still reflects whatever values exist. Everything else
/// is a pure function of the input: same series in, same classification out.
pub fn calculate_trend(values: &[f64]) -> WindowTrend {
    if values.len() < MIN_TREND_POINTS {
        return WindowTrend {
            slope: 0.0,
            avg_epc: if values.is_empty() { 0.0 } else { mean(values) },
            category: TrendCategory::Unknown,
        };
    }

    let slope = ols_slope(values);
    let avg_epc = mean(values);

    // EPC is non-negative, so a zero mean means an all-zero window; relative
    // deviation is 0 there by definition, not a division by zero.
    let max_deviation = if avg_epc > 0.0 {
        values
            .iter()
            .map(|v| (v - avg_epc).abs() / avg_epc)
            .fold(0.0, f64::max)
    } else {
        0.0
    };

    let category = if slope > trend_thresholds::UPWARD_SLOPE {
        TrendCategory::Upward
    } else if slope < trend_thresholds::DOWNWARD_SLOPE {
        TrendCategory::Downward
    } else if max_deviation > trend_thresholds::VOLATILE_DEVIATION {
        TrendCategory::Volatile
    } else {
        TrendCategory::Stable
    };

    WindowTrend { slope, avg_epc, category }
}

/// Classify each trailing window of `dense`. `windows` entries longer than
/// the series fall back to the whole series.
pub fn compute_window_trends(dense: &[f64], windows: &[usize]) -> Vec<(usize, WindowTrend)> {
    windows
        .iter()
        .map(|&w| (w, calculate_trend(trailing(dense, w))))
        .collect()
}

/// Last `len` elements of `series` (the whole series when shorter).
pub fn trailing(series: &[f64], len: usize) -> &[f64] {
    &series[series.len().saturating_sub(len)..]
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Ordinary least-squares slope of `values` against index 0..n-1.
fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        return 0.0;
    }
    num / den
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_input_gives_identical_output() {
        let values = [1.2, 0.0, 3.4, 2.1, 2.0, 0.7, 1.9];
        let first = calculate_trend(&values);
        for _ in 0..10 {
            assert_eq!(calculate_trend(&values), first);
        }
    }

    #[test]
    fn steadily_increasing_is_upward() {
        let t = calculate_trend(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.category, TrendCategory::Upward);
        assert!((t.slope - 1.0).abs() < 1e-12, "slope={}", t.slope);
        assert!((t.avg_epc - 3.0).abs() < 1e-12);
    }

    #[test]
    fn steadily_decreasing_is_downward() {
        let t = calculate_trend(&[6.0, 5.0, 4.0, 3.0, 2.0, 1.0, 0.0]);
        assert_eq!(t.category, TrendCategory::Downward);
        assert!((t.slope + 1.0).abs() < 1e-12, "slope={}", t.slope);
    }

    #[test]
    fn flat_series_is_stable() {
        let t = calculate_trend(&[2.0; 7]);
        assert_eq!(t.category, TrendCategory::Stable);
        assert_eq!(t.slope, 0.0);
        assert!((t.avg_epc - 2.0).abs() < 1e-12);
    }

    #[test]
    fn short_series_is_unknown() {
        let t = calculate_trend(&[1.0, 2.0]);
        assert_eq!(t.category, TrendCategory::Unknown);
        assert_eq!(t.slope, 0.0);
        assert!((t.avg_epc - 1.5).abs() < 1e-12);
    }

    #[test]
    fn empty_series_is_unknown_with_zero_average() {
        let t = calculate_trend(&[]);
        assert_eq!(t.category, TrendCategory::Unknown);
        assert_eq!(t.avg_epc, 0.0);
    }

    #[test]
    fn oscillating_series_is_volatile() {
        // Near-zero slope but 100% swings around the mean.
        let t = calculate_trend(&[5.0, 0.0, 5.0, 0.0, 5.0, 0.0, 5.0]);
        assert_eq!(t.category, TrendCategory::Volatile);
        assert!(t.slope.abs() < 1e-9, "slope={}", t.slope);
    }

    #[test]
    fn all_zero_window_is_stable() {
        // Zero mean: relative deviation is defined as 0, never NaN.
        let t = calculate_trend(&[0.0; 30]);
        assert_eq!(t.category, TrendCategory::Stable);
        assert_eq!(t.slope, 0.0);
        assert_eq!(t.avg_epc, 0.0);
    }

    #[test]
    fn upward_requires_slope_strictly_above_threshold() {
        // Per-step increase of 0.04 fits a slope below 0.05: not upward.
        let below: Vec<f64> = (0..7).map(|i| i as f64 * 0.04).collect();
        let t = calculate_trend(&below);
        assert!(t.slope < 0.05, "slope={}", t.slope);
        assert_ne!(t.category, TrendCategory::Upward);

        // Per-step increase of 0.06 clears the threshold.
        let above: Vec<f64> = (0..7).map(|i| i as f64 * 0.06).collect();
        assert_eq!(calculate_trend(&above).category, TrendCategory::Upward);
    }

    #[test]
    fn trailing_windows_ignore_older_values() {
        let mut dense = vec![0.5; 30];
        dense[29] = 1.0;
        let before = compute_window_trends(&dense, &[7, 14, 30]);

        // Index 5 is the 25th-oldest day: outside both trailing sub-windows.
        dense[5] = 40.0;
        let after = compute_window_trends(&dense, &[7, 14, 30]);

        assert_eq!(before[0], after[0], "7-day window must not change");
        assert_eq!(before[1], after[1], "14-day window must not change");
        assert_ne!(before[2].1.category, after[2].1.category);
    }

    #[test]
    fn trailing_handles_short_series() {
        let series = [1.0, 2.0, 3.0];
        assert_eq!(trailing(&series, 7), &series);
        assert_eq!(trailing(&series, 2), &[2.0, 3.0]);
    }
}
