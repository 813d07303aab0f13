//! Two-dimensional hit assembler: crosses U and V clusters into (x, y)
//! candidates with quality filters (spec §4.4).

use crate::cluster1d::{correlation_coefficient, Cluster1D, FilterMode};
use crate::geometry::UvXyTransform;
use crate::strip::StripRecord;

/// Axis-aligned rectangle in detector-plane (X, Y), used both for the
/// active-area bound and for an externally-supplied constraint region.
#[derive(Debug, Clone, Copy)]
pub struct Rect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Rect {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    pub fn centered(half_x: f64, half_y: f64) -> Self {
        Rect {
            x_min: -half_x,
            x_max: half_x,
            y_min: -half_y,
            y_max: half_y,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HitAssemblerParams {
    pub adc_asym_cut: f64,
    pub deltat_cut: f64,
    pub corrcoeff_cut: f64,
    pub threshold_clustersum: f64,
    pub max_hits: usize,
    pub active_area: Rect,
    pub constraint: Option<Rect>,
    pub filter_deltat_mode: FilterMode,
    pub filter_corr_mode: FilterMode,
    pub filter_asym_mode: FilterMode,
}

/// A single U x V crossing candidate (spec §4.4).
#[derive(Debug, Clone)]
pub struct Hit2D {
    pub u_cluster_index: usize,
    pub v_cluster_index: usize,
    pub x: f64,
    pub y: f64,
    pub time: f64,
    pub energy: f64,
    pub asymmetry: f64,
    pub delta_t: f64,
    pub corr_cluster_shaped: f64,
    pub corr_strip_shaped: f64,
    pub corr_cluster_deconv: f64,
    pub corr_strip_deconv: f64,
    pub time_deconv: f64,
    pub energy_deconv: f64,
    pub asymmetry_deconv: f64,
    pub delta_t_deconv: f64,
    pub highquality: bool,
    pub keep: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HitAssemblerStats {
    pub candidates_considered: u64,
    pub capped: bool,
}

fn asymmetry(sum_u: f64, sum_v: f64) -> f64 {
    let denom = sum_u + sum_v;
    if denom == 0.0 {
        0.0
    } else {
        (sum_u - sum_v) / denom
    }
}

fn strip_record_for<'a>(strips: &'a [StripRecord], record_index: usize) -> &'a StripRecord {
    &strips[record_index]
}

/// Cross every kept U cluster against every kept V cluster, transform to
/// (x, y), reject out-of-area/out-of-constraint candidates, compute
/// observables, and determine `highquality`. Hits past `max_hits` are
/// dropped and reported via `HitAssemblerStats::capped` (spec §7:
/// `CapExceeded`, a single warning, not an error that aborts the event).
pub fn find_hits(
    u_clusters: &[Cluster1D],
    u_strips: &[StripRecord],
    v_clusters: &[Cluster1D],
    v_strips: &[StripRecord],
    transform: &UvXyTransform,
    params: &HitAssemblerParams,
) -> (Vec<Hit2D>, HitAssemblerStats) {
    let mut hits = Vec::new();
    let mut stats = HitAssemblerStats::default();

    'outer: for (iu, uc) in u_clusters.iter().enumerate() {
        if !uc.keep {
            continue;
        }
        for (iv, vc) in v_clusters.iter().enumerate() {
            if !vc.keep {
                continue;
            }
            stats.candidates_considered += 1;

            let (x, y) = transform.uv_to_xy(uc.hitpos_mean, vc.hitpos_mean);
            if !params.active_area.contains(x, y) {
                continue;
            }
            if let Some(rect) = params.constraint {
                if !rect.contains(x, y) {
                    continue;
                }
            }

            let time = 0.5 * (uc.t_mean + vc.t_mean);
            let energy = 0.5 * (uc.sum + vc.sum);
            let asym = asymmetry(uc.sum, vc.sum);
            let dt = uc.t_mean - vc.t_mean;

            let corr_cluster_shaped = correlation_coefficient(&uc.samples, &vc.samples);
            let corr_cluster_deconv = correlation_coefficient(&uc.deconv_samples, &vc.deconv_samples);

            let u_peak_strip = strip_record_for(u_strips, uc.peak_record_index);
            let v_peak_strip = strip_record_for(v_strips, vc.peak_record_index);
            let corr_strip_shaped =
                correlation_coefficient(&u_peak_strip.corrected_samples, &v_peak_strip.corrected_samples);
            let corr_strip_deconv =
                correlation_coefficient(&u_peak_strip.deconv_samples, &v_peak_strip.deconv_samples);

            let time_deconv = 0.5 * (uc.t_mean_deconv + vc.t_mean_deconv);
            let energy_deconv = 0.5 * (uc.deconv_sum + vc.deconv_sum);
            let asymmetry_deconv = asymmetry(uc.deconv_sum, vc.deconv_sum);
            let delta_t_deconv = uc.t_mean_deconv - vc.t_mean_deconv;

            let both_multi_strip = uc.n_strips >= 2 && vc.n_strips >= 2;
            let both_sum_ok = uc.sum >= params.threshold_clustersum && vc.sum >= params.threshold_clustersum;

            let base_quality = asym.abs() <= params.adc_asym_cut
                && corr_cluster_shaped >= params.corrcoeff_cut
                && corr_strip_shaped >= params.corrcoeff_cut
                && corr_cluster_deconv >= params.corrcoeff_cut
                && corr_strip_deconv >= params.corrcoeff_cut
                && dt.abs() <= params.deltat_cut
                && asymmetry_deconv.abs() <= params.adc_asym_cut;

            let highquality = base_quality && both_multi_strip && both_sum_ok;

            let keep = if uc.n_strips == 1 || vc.n_strips == 1 {
                // Single-strip cluster: require the full stricter cut set,
                // including both deconvoluted correlation coefficients.
                asym.abs() <= params.adc_asym_cut
                    && dt.abs() <= params.deltat_cut
                    && corr_cluster_shaped >= params.corrcoeff_cut
                    && corr_strip_shaped >= params.corrcoeff_cut
                    && corr_cluster_deconv >= params.corrcoeff_cut
                    && corr_strip_deconv >= params.corrcoeff_cut
            } else {
                true
            };

            if hits.len() >= params.max_hits {
                stats.capped = true;
                break 'outer;
            }

            hits.push(Hit2D {
                u_cluster_index: iu,
                v_cluster_index: iv,
                x,
                y,
                time,
                energy,
                asymmetry: asym,
                delta_t: dt,
                corr_cluster_shaped,
                corr_strip_shaped,
                corr_cluster_deconv,
                corr_strip_deconv,
                time_deconv,
                energy_deconv,
                asymmetry_deconv,
                delta_t_deconv,
                highquality,
                keep,
            });
        }
    }

    (hits, stats)
}

fn apply_soft_hard(hits: &mut [Hit2D], mode: FilterMode, passes: impl Fn(&Hit2D) -> bool) {
    let any_kept_pass = hits.iter().filter(|h| h.keep).any(&passes);
    for h in hits.iter_mut() {
        if !h.keep {
            continue;
        }
        if !passes(h) {
            match mode {
                FilterMode::Hard => h.keep = false,
                FilterMode::Soft => {
                    if any_kept_pass {
                        h.keep = false;
                    }
                }
            }
        }
    }
}

/// Post-pass filter stage 1: |delta t| <= cut (spec §4.4).
pub fn filter_by_deltat(hits: &mut [Hit2D], cut: f64, mode: FilterMode) {
    apply_soft_hard(hits, mode, |h| h.delta_t.abs() <= cut);
}

/// Post-pass filter stage 2: cluster correlation coefficient >= cut.
pub fn filter_by_correlation(hits: &mut [Hit2D], cut: f64, mode: FilterMode) {
    apply_soft_hard(hits, mode, |h| h.corr_cluster_shaped >= cut);
}

/// Post-pass filter stage 3: |asymmetry| <= cut.
pub fn filter_by_asymmetry(hits: &mut [Hit2D], cut: f64, mode: FilterMode) {
    apply_soft_hard(hits, mode, |h| h.asymmetry.abs() <= cut);
}

/// Run all three post-pass stages in spec order: delta-t, correlation, asymmetry.
pub fn apply_post_pass_filters(hits: &mut [Hit2D], params: &HitAssemblerParams) {
    filter_by_deltat(hits, params.deltat_cut, params.filter_deltat_mode);
    filter_by_correlation(hits, params.corrcoeff_cut, params.filter_corr_mode);
    filter_by_asymmetry(hits, params.adc_asym_cut, params.filter_asym_mode);
}
