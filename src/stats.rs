//! Descriptive statistics over score lists.
//!
//! Every function here is total: empty or degenerate input resolves to a
//! zero-valued result instead of an error, and every division is guarded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PASS_MARK: f64 = 40.0;
pub const DEFAULT_TREND_THRESHOLD_PCT: f64 = 5.0;
pub const DEFAULT_HIGH_VARIABILITY: f64 = 20.0;
pub const DEFAULT_SEASONALITY_MIN_POINTS: usize = 12;
pub const DEFAULT_FORECAST_MIN_POINTS: usize = 3;

const PERCENTILE_RANKS: [f64; 7] = [10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeThresholds {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            a: 80.0,
            b: 70.0,
            c: 60.0,
            d: 40.0,
        }
    }
}

/// Policy constants used by the statistics and trend code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsPolicy {
    pub pass_mark: f64,
    pub grade_thresholds: GradeThresholds,
    /// Percent change between first and last moving average that counts as a trend.
    pub trend_threshold_pct: f64,
    /// Standard deviation above which a group is reported as highly variable.
    pub high_variability_std_dev: f64,
    pub seasonality_min_points: usize,
    pub forecast_min_points: usize,
}

impl Default for StatsPolicy {
    fn default() -> Self {
        Self {
            pass_mark: DEFAULT_PASS_MARK,
            grade_thresholds: GradeThresholds::default(),
            trend_threshold_pct: DEFAULT_TREND_THRESHOLD_PCT,
            high_variability_std_dev: DEFAULT_HIGH_VARIABILITY,
            seasonality_min_points: DEFAULT_SEASONALITY_MIN_POINTS,
            forecast_min_points: DEFAULT_FORECAST_MIN_POINTS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quartiles {
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Score counts in the five fixed bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreDistribution {
    #[serde(rename = "0-20")]
    pub band_0_20: usize,
    #[serde(rename = "21-40")]
    pub band_21_40: usize,
    #[serde(rename = "41-60")]
    pub band_41_60: usize,
    #[serde(rename = "61-80")]
    pub band_61_80: usize,
    #[serde(rename = "81-100")]
    pub band_81_100: usize,
}

impl ScoreDistribution {
    fn record(&mut self, score: f64) {
        if score <= 20.0 {
            self.band_0_20 += 1;
        } else if score <= 40.0 {
            self.band_21_40 += 1;
        } else if score <= 60.0 {
            self.band_41_60 += 1;
        } else if score <= 80.0 {
            self.band_61_80 += 1;
        } else {
            self.band_81_100 += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.band_0_20 + self.band_21_40 + self.band_41_60 + self.band_61_80 + self.band_81_100
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeDistribution {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "B")]
    pub b: usize,
    #[serde(rename = "C")]
    pub c: usize,
    #[serde(rename = "D")]
    pub d: usize,
    #[serde(rename = "F")]
    pub f: usize,
}

impl GradeDistribution {
    fn record(&mut self, grade: &str) {
        match grade {
            "A" => self.a += 1,
            "B" => self.b += 1,
            "C" => self.c += 1,
            "D" => self.d += 1,
            _ => self.f += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMetrics {
    pub average: f64,
    pub median: f64,
    pub standard_deviation: f64,
    pub variance: f64,
    pub range: ScoreRange,
    pub quartiles: Quartiles,
    pub distribution: ScoreDistribution,
    pub pass_rate: f64,
    pub grade_distribution: GradeDistribution,
    pub percentiles: Percentiles,
}

pub fn letter_grade(score: f64, thresholds: &GradeThresholds) -> &'static str {
    if score >= thresholds.a {
        "A"
    } else if score >= thresholds.b {
        "B"
    } else if score >= thresholds.c {
        "C"
    } else if score >= thresholds.d {
        "D"
    } else {
        "F"
    }
}

/// Drops NaN and infinite entries.
pub fn finite_scores(scores: &[f64]) -> Vec<f64> {
    scores.iter().copied().filter(|value| value.is_finite()).collect()
}

/// Extracts scores from a JSON array of numbers and/or `{"score": n}` records.
/// Anything else is skipped.
pub fn scores_from_json(value: &Value) -> Vec<f64> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Number(number) => number.as_f64(),
            Value::Object(record) => record.get("score").and_then(Value::as_f64),
            _ => None,
        })
        .filter(|score| score.is_finite())
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean squared deviation (divides by n, not n - 1).
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    values.iter().map(|value| (value - avg).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn population_std_dev(values: &[f64]) -> f64 {
    population_variance(values).sqrt()
}

/// Median of an ascending-sorted slice.
pub fn median(sorted: &[f64]) -> f64 {
    let len = sorted.len();
    if len == 0 {
        return 0.0;
    }
    if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    }
}

/// Element at `floor(len * fraction)` of an ascending-sorted slice.
pub fn nearest_rank_floor(sorted: &[f64], fraction: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (sorted.len() as f64 * fraction).floor().max(0.0) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Element at `ceil(percentile / 100 * len) - 1` (clamped at 0) of an
/// ascending-sorted slice.
pub fn nearest_rank_ceil_minus_one(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() - 1.0;
    let index = rank.max(0.0) as usize;
    sorted[index.min(sorted.len() - 1)]
}

pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn class_metrics(scores: &[f64]) -> ClassMetrics {
    class_metrics_with(scores, &StatsPolicy::default())
}

pub fn class_metrics_with(scores: &[f64], policy: &StatsPolicy) -> ClassMetrics {
    let mut sorted = finite_scores(scores);
    if sorted.is_empty() {
        return ClassMetrics::default();
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let variance = population_variance(&sorted);
    let mut distribution = ScoreDistribution::default();
    let mut grade_distribution = GradeDistribution::default();
    let mut passing = 0usize;

    for &score in sorted.iter() {
        distribution.record(score);
        grade_distribution.record(letter_grade(score, &policy.grade_thresholds));
        if score >= policy.pass_mark {
            passing += 1;
        }
    }

    let ranks: Vec<f64> = PERCENTILE_RANKS
        .iter()
        .map(|&p| nearest_rank_ceil_minus_one(&sorted, p))
        .collect();

    ClassMetrics {
        average: mean(&sorted),
        median: median(&sorted),
        standard_deviation: variance.sqrt(),
        variance,
        range: ScoreRange {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        },
        quartiles: Quartiles {
            q1: nearest_rank_floor(&sorted, 0.25),
            q2: nearest_rank_floor(&sorted, 0.5),
            q3: nearest_rank_floor(&sorted, 0.75),
        },
        distribution,
        pass_rate: percent(passing, sorted.len()),
        grade_distribution,
        percentiles: Percentiles {
            p10: ranks[0],
            p25: ranks[1],
            p50: ranks[2],
            p75: ranks[3],
            p90: ranks[4],
            p95: ranks[5],
            p99: ranks[6],
        },
    }
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[0] == pair[1])
}

/// Pearson correlation. Only the common prefix of the two slices is used;
/// callers are expected to pass equal lengths.
pub fn correlation(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    if is_constant(xs) || is_constant(ys) {
        return 0.0;
    }

    let count = n as f64;
    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs.iter().map(|x| x * x).sum();
    let sum_y2: f64 = ys.iter().map(|y| y * y).sum();

    let numerator = count * sum_xy - sum_x * sum_y;
    let denominator =
        ((count * sum_x2 - sum_x * sum_x) * (count * sum_y2 - sum_y * sum_y)).sqrt();

    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (numerator / denominator).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRanking {
    pub label: String,
    pub average: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    BestPerformer,
    LowestPerformer,
    HighVariability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparativeAnalysis {
    pub stats_by_label: BTreeMap<String, ClassMetrics>,
    pub rankings: Vec<GroupRanking>,
    pub insights: Vec<Insight>,
}

/// Groups sharing a label are merged into one group, in order of first
/// appearance.
pub fn comparative_analysis(
    groups: &[(String, Vec<f64>)],
    policy: &StatsPolicy,
) -> ComparativeAnalysis {
    let mut merged: Vec<(&str, Vec<f64>)> = Vec::with_capacity(groups.len());
    for (label, scores) in groups {
        match merged.iter_mut().find(|(seen, _)| *seen == label.as_str()) {
            Some((_, existing)) => existing.extend_from_slice(scores),
            None => merged.push((label.as_str(), scores.clone())),
        }
    }

    let mut stats_by_label = BTreeMap::new();
    let mut rankings = Vec::with_capacity(merged.len());

    for (label, scores) in merged {
        let metrics = class_metrics_with(&scores, policy);
        rankings.push(GroupRanking {
            label: label.to_string(),
            average: metrics.average,
        });
        stats_by_label.insert(label.to_string(), metrics);
    }

    rankings.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut insights = Vec::new();
    if let Some(best) = rankings.first() {
        insights.push(Insight {
            kind: InsightKind::BestPerformer,
            label: best.label.clone(),
            message: format!("{} has the highest average ({:.1})", best.label, best.average),
        });
    }
    if rankings.len() > 1 {
        if let Some(worst) = rankings.last() {
            insights.push(Insight {
                kind: InsightKind::LowestPerformer,
                label: worst.label.clone(),
                message: format!("{} has the lowest average ({:.1})", worst.label, worst.average),
            });
        }
    }
    for ranking in rankings.iter() {
        let Some(metrics) = stats_by_label.get(&ranking.label) else {
            continue;
        };
        if metrics.standard_deviation > policy.high_variability_std_dev {
            insights.push(Insight {
                kind: InsightKind::HighVariability,
                label: ranking.label.clone(),
                message: format!(
                    "{} shows high variability (standard deviation {:.1})",
                    ranking.label, metrics.standard_deviation
                ),
            });
        }
    }

    ComparativeAnalysis {
        stats_by_label,
        rankings,
        insights,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: every finite score lands in exactly one band
        #[test]
        fn distribution_sums_to_input_length(
            scores in prop::collection::vec(-50.0f64..150.0, 1..200)
        ) {
            let metrics = class_metrics(&scores);
            prop_assert_eq!(metrics.distribution.total(), scores.len());
            let grades = metrics.grade_distribution;
            prop_assert_eq!(grades.a + grades.b + grades.c + grades.d + grades.f, scores.len());
        }

        /// Property: correlation is symmetric and bounded
        #[test]
        fn correlation_is_symmetric(
            pairs in prop::collection::vec((0.0f64..100.0, 0.0f64..100.0), 0..50)
        ) {
            let xs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
            let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();
            let forward = correlation(&xs, &ys);
            prop_assert_eq!(forward, correlation(&ys, &xs));
            prop_assert!((-1.0..=1.0).contains(&forward));
        }
    }
}
