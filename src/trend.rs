//! Trend detection over dated series: moving averages, an index-based
//! least-squares line, short forecasts and month-of-year seasonality.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::TimeSeriesPoint;
use crate::stats::{self, StatsPolicy};

pub const DEFAULT_WINDOW_SIZE: usize = 3;
pub const DEFAULT_FORECAST_PERIODS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl TrendDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::InsufficientData => "insufficient_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovingAveragePoint {
    pub date: NaiveDate,
    pub value: f64,
    pub original_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendLine {
    pub slope: f64,
    pub intercept: f64,
    pub equation: String,
    pub correlation: f64,
}

impl TrendLine {
    pub fn value_at(&self, index: f64) -> f64 {
        self.intercept + self.slope * index
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub period: usize,
    pub value: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendResult {
    pub trend: TrendDirection,
    pub strength: f64,
    pub moving_averages: Vec<MovingAveragePoint>,
    pub trend_line: Option<TrendLine>,
    pub forecast: Option<Vec<ForecastPoint>>,
    /// Absent when the series is shorter than the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
    /// Month (0 = January) to average value. The outer `None` leaves the key
    /// out (insufficient data); `Some(None)` is an explicit `null` for series
    /// too short to bucket by month.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub seasonality: Option<Option<BTreeMap<u32, f64>>>,
}

/// Keeps a present `null` distinct from a missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl TrendResult {
    fn insufficient() -> Self {
        Self {
            trend: TrendDirection::InsufficientData,
            strength: 0.0,
            moving_averages: Vec::new(),
            trend_line: None,
            forecast: None,
            volatility: None,
            seasonality: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendOptions {
    pub window_size: usize,
    pub forecast_periods: usize,
}

impl Default for TrendOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            forecast_periods: DEFAULT_FORECAST_PERIODS,
        }
    }
}

/// Trailing simple moving average, one point per index from `window - 1`.
pub fn moving_averages(series: &[TimeSeriesPoint], window_size: usize) -> Vec<MovingAveragePoint> {
    let window = window_size.max(1);
    if series.len() < window {
        return Vec::new();
    }

    (window - 1..series.len())
        .map(|i| {
            let slice = &series[i + 1 - window..=i];
            let sum: f64 = slice.iter().map(|point| point.value).sum();
            MovingAveragePoint {
                date: series[i].date,
                value: sum / window as f64,
                original_value: series[i].value,
            }
        })
        .collect()
}

/// Ordinary least squares of `values` against their index `0..n`.
pub fn linear_trend(values: &[f64]) -> TrendLine {
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i * i) as f64).sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, &y)| i as f64 * y).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    let (slope, intercept) = if denominator == 0.0 {
        (0.0, stats::mean(values))
    } else {
        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        (slope, (sum_y - slope * sum_x) / n)
    };

    let indices: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    TrendLine {
        slope,
        intercept,
        equation: format!("y = {:.2}x + {:.2}", slope, intercept),
        correlation: stats::correlation(&indices, values),
    }
}

/// Projects the line `periods` steps past the last observed index.
pub fn forecast(line: &TrendLine, observations: usize, periods: usize) -> Vec<ForecastPoint> {
    let last_index = observations.saturating_sub(1) as f64;
    (1..=periods)
        .map(|i| ForecastPoint {
            period: i,
            value: line.value_at(last_index + i as f64).max(0.0),
            confidence: (1.0 - 0.1 * i as f64).max(0.5),
        })
        .collect()
}

pub fn monthly_seasonality(series: &[TimeSeriesPoint]) -> BTreeMap<u32, f64> {
    let mut buckets: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for point in series {
        let entry = buckets.entry(point.date.month0()).or_insert((0.0, 0));
        entry.0 += point.value;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(month, (total, count))| (month, total / count as f64))
        .collect()
}

fn classify(
    averages: &[MovingAveragePoint],
    policy: &StatsPolicy,
) -> (TrendDirection, f64) {
    let (Some(first), Some(last)) = (averages.first(), averages.last()) else {
        return (TrendDirection::Stable, 0.0);
    };
    if averages.len() < 2 || first.value == 0.0 {
        return (TrendDirection::Stable, 0.0);
    }

    let change = (last.value - first.value) / first.value * 100.0;
    let direction = if change > policy.trend_threshold_pct {
        TrendDirection::Increasing
    } else if change < -policy.trend_threshold_pct {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };
    (direction, change.abs().min(100.0))
}

pub fn trend_analysis(series: &[TimeSeriesPoint], window_size: usize) -> TrendResult {
    let options = TrendOptions {
        window_size,
        ..TrendOptions::default()
    };
    trend_analysis_with(series, &options, &StatsPolicy::default())
}

pub fn trend_analysis_with(
    series: &[TimeSeriesPoint],
    options: &TrendOptions,
    policy: &StatsPolicy,
) -> TrendResult {
    if series.len() < options.window_size.max(1) {
        return TrendResult::insufficient();
    }

    let values: Vec<f64> = series.iter().map(|point| point.value).collect();
    let averages = moving_averages(series, options.window_size);
    let (trend, strength) = classify(&averages, policy);
    let line = linear_trend(&values);

    let projected = if series.len() >= policy.forecast_min_points {
        Some(forecast(&line, series.len(), options.forecast_periods))
    } else {
        None
    };
    let seasonality = if series.len() >= policy.seasonality_min_points {
        Some(monthly_seasonality(series))
    } else {
        None
    };

    TrendResult {
        trend,
        strength,
        moving_averages: averages,
        trend_line: Some(line),
        forecast: projected,
        volatility: Some(stats::population_std_dev(&values)),
        seasonality: Some(seasonality),
    }
}

/// Builds a series from dated values, skipping entries without a date.
pub fn series_from_pairs<I>(pairs: I) -> Vec<TimeSeriesPoint>
where
    I: IntoIterator<Item = (Option<NaiveDate>, f64)>,
{
    pairs
        .into_iter()
        .filter_map(|(date, value)| date.map(|date| TimeSeriesPoint { date, value }))
        .collect()
}
