//! Strip decoder: per-chip pedestal/common-mode subtraction, gain, feature
//! extraction and retention decision for one APV25 chip's readout (spec §4.2).

use crate::geometry::Axis;

/// Policy for rejecting strips whose max sample falls at the first or last
/// time sample (`suppressfirstlast` config key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSamplePolicy {
    /// 0: allow peaking in the first or last sample.
    Allow,
    /// +1: reject peaking in either the first or the last sample.
    RejectBoth,
    /// -1: reject peaking in the first sample only.
    RejectFirstOnly,
    /// -2: reject peaking in the last sample only.
    RejectLastOnly,
}

impl EdgeSamplePolicy {
    pub fn from_config_value(v: i32) -> Self {
        match v {
            0 => EdgeSamplePolicy::Allow,
            1.. => EdgeSamplePolicy::RejectBoth,
            -1 => EdgeSamplePolicy::RejectFirstOnly,
            _ => EdgeSamplePolicy::RejectLastOnly,
        }
    }

    fn rejects(&self, is_first: bool, is_last: bool) -> bool {
        match self {
            EdgeSamplePolicy::Allow => false,
            EdgeSamplePolicy::RejectBoth => is_first || is_last,
            EdgeSamplePolicy::RejectFirstOnly => is_first,
            EdgeSamplePolicy::RejectLastOnly => is_last,
        }
    }
}

/// Per-sample `(mean fraction, sigma fraction)` template measured over a
/// known-good sample, used by the pulse-shape chi-squared cut.
#[derive(Debug, Clone)]
pub struct PulseShapeTemplate {
    pub fractions: Vec<(f64, f64)>,
}

impl PulseShapeTemplate {
    /// Pulse-shape chi-squared of `samples` against this template, using
    /// `sum` as the per-strip normalization (spec §4.2).
    pub fn chi_squared(&self, samples: &[f64], sum: f64) -> f64 {
        if sum == 0.0 {
            return f64::INFINITY;
        }
        samples
            .iter()
            .zip(self.fractions.iter())
            .map(|(&a, &(mu, sigma))| {
                if sigma == 0.0 {
                    0.0
                } else {
                    (((a / sum) - mu) / sigma).powi(2)
                }
            })
            .sum()
    }
}

/// Deconvolution weights `(w0, w1, w2)` from `x = sample_period / tau` (spec §4.2).
pub fn deconvolution_weights(sample_period: f64, tau: f64) -> (f64, f64, f64) {
    let x = sample_period / tau;
    let w0 = (x - 1.0).exp() / x;
    let w1 = -2.0 * (-1.0_f64).exp() / x;
    let w2 = (-1.0 - x).exp() / x;
    (w0, w1, w2)
}

/// Apply the three-tap deconvolution filter to `samples`, skipping taps that
/// would reach before sample 0 (spec §4.2: `d_k = w0*a_k + w1*a_{k-1} + w2*a_{k-2}`).
pub fn deconvolve(samples: &[f64], weights: (f64, f64, f64)) -> Vec<f64> {
    let (w0, w1, w2) = weights;
    samples
        .iter()
        .enumerate()
        .map(|(k, &a_k)| {
            let mut d = w0 * a_k;
            if k >= 1 {
                d += w1 * samples[k - 1];
            }
            if k >= 2 {
                d += w2 * samples[k - 2];
            }
            d
        })
        .collect()
}

/// Maximum value and its index over `samples`. Panics on an empty slice,
/// which never occurs: every strip carries `n_samples >= 1` readings.
pub fn max_sample(samples: &[f64]) -> (f64, usize) {
    samples
        .iter()
        .enumerate()
        .fold((samples[0], 0), |(best, best_i), (i, &v)| {
            if v > best { (v, i) } else { (best, best_i) }
        })
}

/// Max two-sample adjacent combo and the index of the first sample of the
/// winning pair (the final sample pairs with nothing, i.e. stands alone).
pub fn two_sample_combo_max(samples: &[f64]) -> (f64, usize) {
    let mut best = samples[0] + samples.get(1).copied().unwrap_or(0.0);
    let mut best_start = 0;
    for s in 1..samples.len() {
        let combo = samples[s] + samples.get(s + 1).copied().unwrap_or(0.0);
        if combo > best {
            best = combo;
            best_start = s;
        }
    }
    (best, best_start)
}

/// ADC-weighted mean sample time and its RMS, using sample-centre times
/// `t_k = sample_period * (k + 0.5)` (spec §4.2).
pub fn weighted_time(samples: &[f64], sample_period: f64) -> (f64, f64) {
    let sum: f64 = samples.iter().sum();
    if sum == 0.0 {
        return (0.0, 0.0);
    }
    let times: Vec<f64> = (0..samples.len())
        .map(|k| sample_period * (k as f64 + 0.5))
        .collect();
    let mean: f64 = samples
        .iter()
        .zip(times.iter())
        .map(|(&a, &t)| a * t)
        .sum::<f64>()
        / sum;
    let variance: f64 = samples
        .iter()
        .zip(times.iter())
        .map(|(&a, &t)| a * (t - mean).powi(2))
        .sum::<f64>()
        / sum;
    (mean, variance.max(0.0).sqrt())
}

/// Parameters governing strip retention (spec §4.2, §4.5).
#[derive(Debug, Clone)]
pub struct StripDecodeParams {
    pub sample_period: f64,
    pub deconv_tau: f64,
    pub n_samples: usize,
    /// N_zs: zero-suppression threshold in units of per-sample sigma.
    pub zero_suppress_nsigma: f64,
    pub zero_suppress_enabled: bool,
    pub edge_policy: EdgeSamplePolicy,
    pub ts_chi2_cut: Option<f64>,
    pub deconvolution_enabled: bool,
    /// Threshold (in ADC) the deconvoluted max sample/combo must clear when
    /// deconvolution-based retention is active.
    pub deconv_threshold_sample: f64,
    /// Record diagnostic negative-polarity strips (spec §4.2 item 7).
    pub record_negative_polarity: bool,
}

/// Fully decoded per-strip record (spec §3's per-event transient strip state).
#[derive(Debug, Clone)]
pub struct StripRecord {
    pub axis: Axis,
    pub strip: i32,
    pub raw_samples: Vec<f64>,
    /// Pedestal- and common-mode-subtracted samples, gain applied.
    pub corrected_samples: Vec<f64>,
    pub deconv_samples: Vec<f64>,
    pub sum: f64,
    pub max_sample_index: usize,
    pub max_sample_value: f64,
    pub combo_max: f64,
    pub combo_start: usize,
    pub deconv_max_value: f64,
    pub deconv_max_index: usize,
    pub deconv_combo_max: f64,
    pub deconv_combo_start: usize,
    pub t_mean: f64,
    pub t_sigma: f64,
    pub t_mean_deconv: f64,
    pub ts_chi2: Option<f64>,
    pub keep: bool,
    pub is_negative: bool,
    /// Three-point parabolic refinement of the max-sample time, diagnostic
    /// only: not used by clustering, matching the original's own comment
    /// that this is a "dumb fit method" kept for histogram filling.
    pub fit_time: f64,
}

/// Refine the peak time around `max_index` with a three-point parabolic fit;
/// falls back to the sample-centre time at a boundary or a degenerate
/// (linear or flat) triple.
fn parabolic_time_fit(samples: &[f64], max_index: usize, sample_period: f64) -> f64 {
    let centre_time = sample_period * (max_index as f64 + 0.5);
    if max_index == 0 || max_index + 1 >= samples.len() {
        return centre_time;
    }
    let (y0, y1, y2) = (samples[max_index - 1], samples[max_index], samples[max_index + 1]);
    let denom = y0 - 2.0 * y1 + y2;
    if denom == 0.0 {
        return centre_time;
    }
    let delta = 0.5 * (y0 - y2) / denom;
    sample_period * (max_index as f64 + 0.5 + delta)
}

/// Decode one strip's ordered time samples into a [`StripRecord`] and decide
/// retention, per the six/seven numbered steps of spec §4.2.
///
/// `raw_samples` must already be pedestal-subtracted (step 1: "if pedestal
/// was subtracted online, do not subtract again" is the caller's
/// responsibility before this point) and common-mode-subtracted (step 2).
/// `gain` is `chip_gain * module_gain` (spec §4.2 step 6); `strip_rms` is the
/// per-strip pedestal RMS used for the zero-suppression and chi-squared cuts.
pub fn decode_strip(
    axis: Axis,
    strip: i32,
    raw_samples: Vec<f64>,
    corrected_samples_pre_gain: Vec<f64>,
    gain: f64,
    strip_rms: f64,
    template: Option<&PulseShapeTemplate>,
    params: &StripDecodeParams,
) -> StripRecord {
    let n = corrected_samples_pre_gain.len();
    let sum: f64 = corrected_samples_pre_gain.iter().sum();
    let (max_value_pre_gain, max_index) = max_sample(&corrected_samples_pre_gain);
    let (combo_max_pre_gain, combo_start) = two_sample_combo_max(&corrected_samples_pre_gain);
    let (t_mean, t_sigma) = weighted_time(&corrected_samples_pre_gain, params.sample_period);

    let weights = deconvolution_weights(params.sample_period, params.deconv_tau);
    let deconv_pre_gain = deconvolve(&corrected_samples_pre_gain, weights);
    let (deconv_max_pre_gain, deconv_max_index) = max_sample(&deconv_pre_gain);
    let (deconv_combo_pre_gain, deconv_combo_start) = two_sample_combo_max(&deconv_pre_gain);
    let (t_mean_deconv, _) = weighted_time(&deconv_pre_gain, params.sample_period);

    let ts_chi2 = template.map(|t| t.chi_squared(&corrected_samples_pre_gain, sum));

    let avg = sum / n as f64;
    let mut keep = true;

    if params.zero_suppress_enabled && avg < params.zero_suppress_nsigma * strip_rms {
        keep = false;
    }

    if keep {
        let is_first = max_index == 0;
        let is_last = max_index + 1 == n;
        if params.edge_policy.rejects(is_first, is_last) {
            keep = false;
        }
    }

    if keep {
        if let (Some(cut), Some(chi2)) = (params.ts_chi2_cut, ts_chi2) {
            if chi2 > cut {
                keep = false;
            }
        }
    }

    if keep && params.deconvolution_enabled {
        let deconv_is_first = deconv_max_index == 0;
        let deconv_is_last = deconv_max_index + 1 == n;
        let fails_threshold = deconv_max_pre_gain < params.deconv_threshold_sample
            && deconv_combo_pre_gain < params.deconv_threshold_sample;
        if deconv_is_first || deconv_is_last || fails_threshold {
            keep = false;
        }
    }

    let is_negative = params.record_negative_polarity
        && avg < -params.zero_suppress_nsigma * strip_rms;

    let fit_time = parabolic_time_fit(&corrected_samples_pre_gain, max_index, params.sample_period);

    StripRecord {
        axis,
        strip,
        raw_samples,
        corrected_samples: corrected_samples_pre_gain.iter().map(|v| v * gain).collect(),
        deconv_samples: deconv_pre_gain.iter().map(|v| v * gain).collect(),
        sum: sum * gain,
        max_sample_index: max_index,
        max_sample_value: max_value_pre_gain * gain,
        combo_max: combo_max_pre_gain * gain,
        combo_start,
        deconv_max_value: deconv_max_pre_gain * gain,
        deconv_max_index,
        deconv_combo_max: deconv_combo_pre_gain * gain,
        deconv_combo_start,
        t_mean,
        t_sigma,
        t_mean_deconv,
        ts_chi2,
        keep,
        is_negative,
        fit_time,
    }
}
