//! Common-mode estimation: per-chip, per-time-sample baseline subtraction
//! beyond the per-strip pedestal, with four selectable algorithms and a
//! rolling-history drift correction (spec §4.1).

use std::collections::VecDeque;

use tracing::warn;

/// Error raised when a common-mode algorithm cannot be evaluated at all
/// (spec §7: `NotEnoughStrips`). Only the sorting method can actually fail
/// this way; the Danning and histogramming methods fall back to sorting
/// internally and only surface this if sorting itself then fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotEnoughStrips {
    pub have: usize,
    pub need: usize,
}

impl std::fmt::Display for NotEnoughStrips {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "not enough strips for common-mode calculation: have {}, need {}",
            self.have, self.need
        )
    }
}

impl std::error::Error for NotEnoughStrips {}

/// Which of the four common-mode algorithms to run (spec §4.1 table).
/// "Tagged variants of an Estimator capability", per the design note in
/// spec §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonModeFlag {
    /// Flag 0: trim-and-average the sorted values.
    Sorting,
    /// Flag 1: offline iterative Danning method.
    DanningOffline,
    /// Flag 2: sliding-window histogramming.
    Histogramming,
    /// Flag 3: two-pass online Danning variant (used as the online reference).
    OnlineDanningTwoPass,
    /// Flag 4: iterative online Danning variant bounded by per-strip RMS.
    OnlineDanningIterative,
}

/// Parameters shared by the common-mode algorithms, loaded from config
/// (spec §4.5's "Common mode" key group).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommonModeParams {
    /// R_lo: strips discarded from the low end by the sorting method.
    pub reject_low: usize,
    /// R_hi: strips discarded from the high end by the sorting method.
    pub reject_high: usize,
    /// M_min: minimum strips required "in range" for a method to succeed
    /// without falling back.
    pub min_strips_in_range: usize,
    /// N_iter: max Danning-method iterations.
    pub n_iter: u32,
    /// k: width of the acceptance window in units of sigma for the Danning
    /// and histogramming methods (commonmode_range_nsigma).
    pub range_nsigma: f64,
    /// The Danning offline method's iteration cut (commonmode_danning_nsigma_cut).
    pub danning_nsigma_cut: f64,
    /// W: histogram half-width, in units of sigma.
    pub bin_nsigma: f64,
    /// R (scan range), in units of sigma, for the histogramming method.
    pub scan_nsigma: f64,
    /// S: histogram stride, in units of sigma.
    pub step_nsigma: f64,
    /// sqrt(N_samples): converts a per-sample RMS to a per-sum RMS for the
    /// Danning iteration width after iteration 0 (spec §9 Open Question).
    pub rms_conversion_factor: f64,
}

impl Default for CommonModeParams {
    fn default() -> Self {
        Self {
            reject_low: 28,
            reject_high: 28,
            min_strips_in_range: 10,
            n_iter: 3,
            range_nsigma: 5.0,
            danning_nsigma_cut: 3.0,
            bin_nsigma: 1.0,
            scan_nsigma: 5.0,
            step_nsigma: 0.25,
            rms_conversion_factor: 6.0_f64.sqrt(),
        }
    }
}

/// Evaluate `flag`'s common-mode estimate for a chip's pedestal-subtracted
/// ADC values at one time sample. `mean`/`rms` are the database (or rolling)
/// reference common-mode mean/RMS for this chip; `strip_rms` is a function
/// returning the per-strip pedestal RMS for the i-th value in `values`,
/// needed by the Danning methods' per-strip iteration width.
pub fn estimate_common_mode(
    flag: CommonModeFlag,
    values: &[f64],
    mean: f64,
    rms: f64,
    strip_rms: impl Fn(usize) -> f64,
    params: &CommonModeParams,
) -> Result<f64, NotEnoughStrips> {
    match flag {
        CommonModeFlag::Sorting => sorting(values, params),
        CommonModeFlag::DanningOffline => danning_offline(values, mean, rms, &strip_rms, params),
        CommonModeFlag::Histogramming => histogramming(values, mean, rms, params),
        CommonModeFlag::OnlineDanningTwoPass => {
            Ok(online_danning_two_pass(values, mean, rms, &strip_rms))
        }
        CommonModeFlag::OnlineDanningIterative => {
            Ok(online_danning_iterative(values, mean, rms, &strip_rms, params))
        }
    }
}

fn sorting(values: &[f64], params: &CommonModeParams) -> Result<f64, NotEnoughStrips> {
    let need = params.reject_low + params.reject_high + params.min_strips_in_range;
    if values.len() < need {
        return Err(NotEnoughStrips {
            have: values.len(),
            need,
        });
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let lo = params.reject_low;
    let hi = sorted.len() - params.reject_high;
    let kept = &sorted[lo..hi];
    Ok(kept.iter().sum::<f64>() / kept.len() as f64)
}

fn danning_offline(
    values: &[f64],
    mean: f64,
    rms: f64,
    strip_rms: &impl Fn(usize) -> f64,
    params: &CommonModeParams,
) -> Result<f64, NotEnoughStrips> {
    let mut cm = 0.0_f64;
    for iter in 0..params.n_iter {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (i, &adc) in values.iter().enumerate() {
            let (min_t, max_t) = if iter == 0 {
                (mean - params.danning_nsigma_cut * rms, mean + params.danning_nsigma_cut * rms)
            } else {
                let width = params.danning_nsigma_cut * strip_rms(i) * params.rms_conversion_factor;
                (cm - width, cm + width)
            };
            if adc >= min_t && adc <= max_t {
                sum += adc;
                count += 1;
            }
        }
        if count >= params.min_strips_in_range {
            cm = sum / count as f64;
        } else if iter == 0 {
            return sorting(values, params);
        }
    }
    Ok(cm)
}

fn histogramming(
    values: &[f64],
    mean: f64,
    rms: f64,
    params: &CommonModeParams,
) -> Result<f64, NotEnoughStrips> {
    let step = rms * params.step_nsigma;
    if step <= 0.0 {
        return sorting(values, params);
    }
    let half_width = rms * params.bin_nsigma;
    let scan_min = mean - params.scan_nsigma * rms;
    let scan_max = mean + params.scan_nsigma * rms;
    let n_bins = ((scan_max - scan_min) / step).round().max(1.0) as usize;

    let mut bin_count = vec![0usize; n_bins];
    let mut bin_sum = vec![0.0_f64; n_bins];

    for &adc in values {
        let nearest = (((adc - scan_min) / step).round() as i64)
            .clamp(0, n_bins as i64 - 1) as usize;
        let mut lo = nearest as i64;
        while lo >= 0 && (adc - (scan_min + lo as f64 * step)).abs() <= half_width {
            bin_count[lo as usize] += 1;
            bin_sum[lo as usize] += adc;
            lo -= 1;
        }
        let mut hi = nearest + 1;
        while hi < n_bins && (adc - (scan_min + hi as f64 * step)).abs() <= half_width {
            bin_count[hi] += 1;
            bin_sum[hi] += adc;
            hi += 1;
        }
    }

    let (best_bin, &best_count) = bin_count
        .iter()
        .enumerate()
        .max_by_key(|&(_, c)| *c)
        .unwrap_or((0, &0));

    if best_count >= params.min_strips_in_range {
        Ok(bin_sum[best_bin] / best_count as f64)
    } else {
        sorting(values, params)
    }
}

fn online_danning_two_pass(
    values: &[f64],
    mean: f64,
    rms: f64,
    strip_rms: &impl Fn(usize) -> f64,
) -> f64 {
    let pass1_max = mean + 5.0 * rms;
    let (mut sum, mut count) = (0.0, 0usize);
    for &adc in values {
        if adc > 0.0 && adc < pass1_max {
            sum += adc;
            count += 1;
        }
    }
    let cm1 = if count > 0 { sum / count as f64 } else { 0.0 };

    let (mut sum2, mut count2) = (0.0, 0usize);
    for (i, &adc) in values.iter().enumerate() {
        let max2 = cm1 + 3.0 * strip_rms(i);
        if adc > 0.0 && adc < max2 {
            sum2 += adc;
            count2 += 1;
        }
    }
    if count2 > 0 { sum2 / count2 as f64 } else { cm1 }
}

fn online_danning_iterative(
    values: &[f64],
    mean: f64,
    rms: f64,
    strip_rms: &impl Fn(usize) -> f64,
    params: &CommonModeParams,
) -> f64 {
    let mut cm = 0.0_f64;
    for iter in 0..3 {
        let (mut sum, mut count) = (0.0, 0usize);
        for (i, &adc) in values.iter().enumerate() {
            let (min_t, max_t) = if iter == 0 {
                (mean - params.range_nsigma * rms, mean + params.range_nsigma * rms)
            } else {
                let width = params.danning_nsigma_cut * 2.5 * strip_rms(i);
                (cm - width, cm + width)
            };
            if adc >= min_t && adc <= max_t {
                sum += adc;
                count += 1;
            }
        }
        if count > 0 {
            cm = sum / count as f64;
        }
    }
    cm
}

/// A bounded rolling window over `f64` samples with O(1) running mean/RMS,
/// shared (per spec §9) between the common-mode drift tracker and the bias
/// tracker used by [`crate::commonmode::correct`].
#[derive(Debug, Clone)]
pub struct RollingAverage {
    window: VecDeque<f64>,
    max_len: usize,
    sum: f64,
    sum_sq: f64,
}

impl RollingAverage {
    pub fn new(max_len: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(max_len),
            max_len,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Push a new value, evicting the oldest entry (decrementing the running
    /// sums first) if the window is already at capacity.
    pub fn push(&mut self, value: f64) {
        if self.window.len() >= self.max_len && self.max_len > 0 {
            if let Some(evicted) = self.window.pop_front() {
                self.sum -= evicted;
                self.sum_sq -= evicted * evicted;
            }
        }
        if self.max_len == 0 {
            return;
        }
        self.window.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.sum / self.window.len() as f64
        }
    }

    pub fn rms(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            let n = self.window.len() as f64;
            let variance = (self.sum_sq / n - (self.sum / n).powi(2)).max(0.0);
            variance.sqrt()
        }
    }
}

/// Per-chip, per-event transient + rolling common-mode state (spec §3's
/// "Per chip per event" transient record, plus the cross-event rolling
/// history).
#[derive(Debug, Clone)]
pub struct ChipCommonModeState {
    /// Six online common-mode values (one per time sample), decoded from
    /// chip debug words when available.
    pub online_values: [Option<f64>; 6],
    /// Rolling history of computed common-mode values, capped at
    /// `K * n_samples`.
    pub rolling: RollingAverage,
    /// Rolling history of correction bias estimates, same cap.
    pub bias_rolling: RollingAverage,
    /// Event count contributing to `rolling`, used against the
    /// `min(100, K*n_samples)` promotion threshold (spec §4.1).
    pub n_events_rolling: u64,
}

impl ChipCommonModeState {
    pub fn new(max_len: usize) -> Self {
        Self {
            online_values: [None; 6],
            rolling: RollingAverage::new(max_len),
            bias_rolling: RollingAverage::new(max_len),
            n_events_rolling: 0,
        }
    }

    pub fn reset_event(&mut self) {
        self.online_values = [None; 6];
    }

    /// Record one freshly computed common-mode value into the rolling
    /// history.
    pub fn push_rolling(&mut self, value: f64) {
        self.rolling.push(value);
        self.n_events_rolling += 1;
    }

    /// Whether the rolling history has accumulated enough entries to
    /// replace the database mean as the drift-tracking reference.
    pub fn rolling_is_mature(&self, k_window: usize, n_samples: usize) -> bool {
        self.rolling.len() >= (100usize.min(k_window * n_samples))
    }
}

/// Parameters controlling the online zero-suppression correction path
/// (spec §4.1's "Correction" paragraph).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionParams {
    pub enabled: bool,
    pub min_strips: usize,
    pub n_corr_sigma: f64,
}

/// Compute the additive correction for a chip whose online zero suppression
/// discarded strips, per spec §4.1. Returns `None` when no correction
/// should be applied (too few surviving strips, or the online value is
/// already within `N_corr` sigma of the rolling mean).
///
/// `recompute` is called (only if a correction is warranted) with the
/// surviving ADC values after adding back the already-subtracted online
/// value, and must return the freshly estimated common mode for just those
/// strips.
#[allow(clippy::too_many_arguments)]
pub fn correct(
    params: &CorrectionParams,
    n_good: usize,
    online_value: f64,
    rolling_mean: f64,
    rolling_rms: f64,
    bias_mean: f64,
    recompute: impl FnOnce() -> f64,
) -> Option<f64> {
    if !params.enabled {
        return None;
    }
    if n_good < params.min_strips {
        return None;
    }
    if (online_value - rolling_mean).abs() < params.n_corr_sigma * rolling_rms {
        return None;
    }
    let new_cm = recompute();
    let occupancy_scale = 2.0 * (1.0 - n_good as f64 / 128.0);
    let correction = (online_value - new_cm - bias_mean) * occupancy_scale;
    if !correction.is_finite() {
        warn!(n_good, online_value, new_cm, "non-finite common-mode correction, suppressing");
        return None;
    }
    Some(correction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_strip_rms(_: usize) -> f64 {
        4.0
    }

    #[test]
    fn sorting_trims_and_averages() {
        let params = CommonModeParams {
            reject_low: 1,
            reject_high: 1,
            min_strips_in_range: 1,
            ..Default::default()
        };
        let values = vec![-100.0, 1.0, 2.0, 3.0, 100.0];
        let cm = sorting(&values, &params).unwrap();
        assert!((cm - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sorting_fails_with_too_few_strips() {
        let params = CommonModeParams::default();
        let values = vec![1.0; 10];
        let err = sorting(&values, &params).unwrap_err();
        assert_eq!(err.have, 10);
    }

    #[test]
    fn danning_offline_falls_back_to_sorting_when_sparse() {
        let params = CommonModeParams {
            reject_low: 2,
            reject_high: 2,
            min_strips_in_range: 50,
            n_iter: 3,
            danning_nsigma_cut: 3.0,
            ..Default::default()
        };
        // Only 10 values: min_strips_in_range (50) is unreachable on iteration
        // 0, so this must fall back to sorting, which itself needs >= 4+50.
        let values = vec![0.0; 10];
        let err = danning_offline(&values, 0.0, 1.0, &flat_strip_rms, &params).unwrap_err();
        assert_eq!(err.have, 10);
    }

    #[test]
    fn danning_offline_converges_on_gaussian_like_cluster() {
        let params = CommonModeParams {
            reject_low: 0,
            reject_high: 0,
            min_strips_in_range: 5,
            n_iter: 3,
            danning_nsigma_cut: 3.0,
            rms_conversion_factor: 1.0,
            ..Default::default()
        };
        let mut values = vec![10.0; 20];
        values.push(500.0); // one outlier strip with real signal
        let cm = danning_offline(&values, 10.0, 2.0, &flat_strip_rms, &params).unwrap();
        assert!((cm - 10.0).abs() < 1.0, "cm={cm}");
    }

    #[test]
    fn histogramming_picks_densest_bin() {
        let params = CommonModeParams::default();
        let mut values = vec![10.0; 40];
        values.extend(vec![200.0; 5]);
        let cm = histogramming(&values, 10.0, 2.0, &params).unwrap();
        assert!((cm - 10.0).abs() < 1.0, "cm={cm}");
    }

    #[test]
    fn online_danning_two_pass_ignores_negative_and_far_outliers() {
        let mut values = vec![10.0; 30];
        values.push(-5.0);
        values.push(1000.0);
        let cm = online_danning_two_pass(&values, 10.0, 2.0, &flat_strip_rms);
        assert!((cm - 10.0).abs() < 1.0, "cm={cm}");
    }

    #[test]
    fn rolling_average_evicts_oldest_on_overflow() {
        let mut r = RollingAverage::new(3);
        r.push(1.0);
        r.push(2.0);
        r.push(3.0);
        assert_eq!(r.len(), 3);
        assert!((r.mean() - 2.0).abs() < 1e-12);
        r.push(4.0); // evicts the 1.0
        assert_eq!(r.len(), 3);
        assert!((r.mean() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rolling_maturity_threshold() {
        let mut state = ChipCommonModeState::new(600);
        assert!(!state.rolling_is_mature(100, 6));
        for _ in 0..100 {
            state.push_rolling(0.0);
        }
        assert!(state.rolling_is_mature(100, 6));
    }

    #[test]
    fn correction_suppressed_when_close_to_rolling_mean() {
        let params = CorrectionParams {
            enabled: true,
            min_strips: 5,
            n_corr_sigma: 3.0,
        };
        let result = correct(&params, 20, 10.1, 10.0, 1.0, 0.0, || 10.0);
        assert!(result.is_none());
    }

    #[test]
    fn correction_emitted_and_scaled_by_occupancy() {
        let params = CorrectionParams {
            enabled: true,
            min_strips: 5,
            n_corr_sigma: 3.0,
        };
        // online reads 40 above rolling mean (well beyond 3 sigma), recompute
        // on survivors gives back the "true" value (rolling mean); bias is 0.
        let result = correct(&params, 20, 40.0, 0.0, 1.0, 0.0, || 0.0).unwrap();
        let expected_scale = 2.0 * (1.0 - 20.0 / 128.0);
        assert!((result - 40.0 * expected_scale).abs() < 1e-9);
    }

    #[test]
    fn correction_suppressed_when_too_few_strips() {
        let params = CorrectionParams {
            enabled: true,
            min_strips: 30,
            n_corr_sigma: 3.0,
        };
        let result = correct(&params, 20, 40.0, 0.0, 1.0, 0.0, || 0.0);
        assert!(result.is_none());
    }
}
