use serde::{Deserialize, Serialize};

/// Bin count used for every distribution histogram.
pub const DEFAULT_HISTOGRAM_BINS: usize = 50;

// ── Percentile helper ─────────────────────────────────────────────────────────

/// Compute the `p`-th percentile of a **sorted** slice using linear
/// interpolation between closest ranks.
///
/// Returns `None` for an empty slice.
pub fn percentile(sorted_data: &[f64], p: f64) -> Option<f64> {
    let len = sorted_data.len();
    if len == 0 {
        return None;
    }
    if len == 1 {
        return Some(sorted_data[0]);
    }
    let rank = (p / 100.0) * (len as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted_data[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted_data[lo] + frac * (sorted_data[hi] - sorted_data[lo]))
}

/// Return a sorted copy of `values`.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

// ── Histogram ─────────────────────────────────────────────────────────────────

/// One equal-width histogram bin. `upper` is exclusive except for the last bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Bucket `values` into `bins` equal-width bins spanning their range.
///
/// A constant series spans `[v - 0.5, v + 0.5]`. Returns no bins for an empty
/// series or a zero bin count.
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }

    let mut min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let mut max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        min -= 0.5;
        max += 0.5;
    }
    let width = (max - min) / bins as f64;

    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();

    for v in finite {
        let idx = (((v - min) / width).floor() as usize).min(bins - 1);
        out[idx].count += 1;
    }

    out
}

// ── DistributionSummary ───────────────────────────────────────────────────────

/// Descriptive statistics of one numeric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation; `None` below two observations.
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub p25: Option<f64>,
    pub median: Option<f64>,
    pub p75: Option<f64>,
    pub max: Option<f64>,
    pub histogram: Vec<HistogramBin>,
}

impl DistributionSummary {
    /// Summarise `values` with a [`DEFAULT_HISTOGRAM_BINS`]-bin histogram.
    pub fn from_values(values: &[f64]) -> Self {
        Self::with_bins(values, DEFAULT_HISTOGRAM_BINS)
    }

    pub fn with_bins(values: &[f64], bins: usize) -> Self {
        let data = sorted(values);
        let count = data.len();

        let mean = (count > 0).then(|| data.iter().sum::<f64>() / count as f64);
        let std = match mean {
            Some(m) if count > 1 => {
                let var = data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (count - 1) as f64;
                Some(var.sqrt())
            }
            _ => None,
        };

        Self {
            count,
            mean,
            std,
            min: data.first().copied(),
            p25: percentile(&data, 25.0),
            median: percentile(&data, 50.0),
            p75: percentile(&data, 75.0),
            max: data.last().copied(),
            histogram: histogram(&data, bins),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
