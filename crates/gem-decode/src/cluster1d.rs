//! One-dimensional cluster finder: local-maxima detection, prominence
//! pruning, growth, Cauchy-weighted splitting and summarization for one
//! readout axis (spec §4.3).

use crate::geometry::strip_center;

/// One retained strip as seen by the cluster finder. Carries only what
/// clustering needs plus `record_index`, a back-reference into the caller's
/// full per-event strip array (spec §9: "back-reference ... uses an index
/// into the strip array, never a pointer").
#[derive(Debug, Clone)]
pub struct ClusterStripInput<'a> {
    pub record_index: usize,
    pub strip: i32,
    /// The quantity used for local-maxima search and Cauchy-weight
    /// splitting: either the shaped strip sum or the deconvoluted two-sample
    /// combo, selected by `ClusterFinderParams::use_deconv_combo_for_clustering`.
    pub clustering_quantity: f64,
    pub max_sample_value: f64,
    pub sum: f64,
    pub t_mean: f64,
    pub shaped_samples: &'a [f64],
    pub deconv_samples: &'a [f64],
    pub deconv_combo_max: f64,
}

/// Soft/hard semantics shared by the 1D and 2D post-pass filters (spec
/// §4.3, §4.4): soft mode only rejects failing entries if at least one
/// entry on that pass already survived; hard mode rejects unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Soft,
    Hard,
}

/// Parameters governing clustering on one axis (spec §4.3, §4.5).
#[derive(Debug, Clone)]
pub struct ClusterFinderParams {
    pub pitch: f64,
    pub n_strips: usize,
    pub offset: f64,
    /// maxsep: maximum strip separation from the peak during growth and
    /// splitting.
    pub max_sep: i32,
    /// maxsep_pos: restricts the strip range used for the ADC-weighted
    /// position/RMS summary (separately from the growth maxsep).
    pub max_sep_pos: i32,
    pub threshold_sample: f64,
    pub threshold_stripsum: f64,
    pub threshold_clustersum: f64,
    pub peak_prominence_min_sigma: f64,
    pub peak_prominence_min_fraction: f64,
    /// sigma_sum = n_samples * sigma_strip (per-sum RMS), used with
    /// `peak_prominence_min_sigma`.
    pub sigma_sum: f64,
    pub sigma_hit_shape: f64,
    pub use_strip_timing_cut: bool,
    pub strip_t0: f64,
    pub strip_t_window: f64,
    pub add_strip_t_cut: f64,
    pub add_strip_corr_cut: f64,
    pub use_deconv_combo_for_clustering: bool,
    pub filter_sum_mode: FilterMode,
    pub filter_strip_count_mode: FilterMode,
}

/// A completed 1D cluster (spec §3's per-axis cluster record).
#[derive(Debug, Clone)]
pub struct Cluster1D {
    pub istriplo: i32,
    pub istriphi: i32,
    pub istripmax: i32,
    /// Index into the caller's strip array of the peak strip.
    pub peak_record_index: usize,
    /// Cluster-summed shaped ADC samples (split-fraction-weighted).
    pub samples: Vec<f64>,
    /// Cluster-summed deconvoluted ADC samples (split-fraction-weighted).
    pub deconv_samples: Vec<f64>,
    pub sum: f64,
    pub deconv_sum: f64,
    pub deconv_sum_max_combo: f64,
    pub hitpos_mean: f64,
    pub hitpos_sigma: f64,
    pub t_mean: f64,
    pub t_mean_deconv: f64,
    pub isampmax: usize,
    pub isampmax_deconv: usize,
    /// Indices (within the caller's strip array) of every strip
    /// contributing to this cluster.
    pub member_record_indices: Vec<usize>,
    pub n_strips: usize,
    pub keep: bool,
    pub in_constraint: bool,
    pub is_negative: bool,
}

/// Counters the caller reports alongside the cluster list: the
/// "total-found" counter increments for every candidate cluster with >= 2
/// strips meeting the cluster-sum threshold, regardless of the constraint
/// window (spec §4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterFinderStats {
    pub total_found: u64,
}

fn candidate_is_local_max(
    strips: &[ClusterStripInput],
    i: usize,
    params: &ClusterFinderParams,
) -> bool {
    let this = &strips[i];
    if this.max_sample_value < params.threshold_sample {
        return false;
    }
    if this.sum < params.threshold_stripsum {
        return false;
    }
    if params.use_strip_timing_cut
        && (this.t_mean - params.strip_t0).abs() > params.strip_t_window
    {
        return false;
    }
    let left_ok = i == 0
        || strips[i - 1].strip != this.strip - 1
        || strips[i - 1].clustering_quantity <= this.clustering_quantity;
    let right_ok = i + 1 >= strips.len()
        || strips[i + 1].strip != this.strip + 1
        || strips[i + 1].clustering_quantity <= this.clustering_quantity;
    left_ok && right_ok
}

/// Walk one direction from `peak_pos` looking for a strictly higher
/// clustering quantity among physically contiguous strips. Returns
/// `Some((valley, distance))` if a higher strip was found (the lowest value
/// seen along the way, and the strip distance to the higher strip), or
/// `None` if the walk ran off the end of contiguous strips without finding
/// one (in which case this side does not constrain the prominence).
fn scan_side(
    strips: &[ClusterStripInput],
    peak_pos: usize,
    peak_strip: i32,
    peak_value: f64,
    dir: i64,
) -> Option<(f64, i32)> {
    let mut valley = f64::INFINITY;
    let mut prev_strip = peak_strip;
    let mut idx = peak_pos as i64;
    loop {
        idx += dir;
        if idx < 0 || idx as usize >= strips.len() {
            return None;
        }
        let s = &strips[idx as usize];
        if (s.strip - prev_strip).abs() != 1 {
            return None;
        }
        prev_strip = s.strip;
        if s.clustering_quantity > peak_value {
            return Some((valley, (s.strip - peak_strip).abs()));
        }
        valley = valley.min(s.clustering_quantity);
    }
}

struct Peak {
    pos: usize,
    strip: i32,
    value: f64,
}

fn prune_by_prominence(
    strips: &[ClusterStripInput],
    candidates: Vec<Peak>,
    params: &ClusterFinderParams,
) -> Vec<Peak> {
    candidates
        .into_iter()
        .filter(|peak| {
            let left = scan_side(strips, peak.pos, peak.strip, peak.value, -1);
            let right = scan_side(strips, peak.pos, peak.strip, peak.value, 1);
            let key_col = [left, right]
                .into_iter()
                .flatten()
                .map(|(v, _)| v)
                .fold(f64::NEG_INFINITY, f64::max);
            let prominence = peak.value - key_col;
            let nearby_higher = [left, right]
                .into_iter()
                .flatten()
                .any(|(_, d)| d <= 2 * params.max_sep);
            // "Below both" bars means the peak must clear both to survive: drop it if
            // it falls short of either (an inclusive-OR on the two failure conditions).
            let drop = nearby_higher
                && (prominence < params.peak_prominence_min_sigma * params.sigma_sum
                    || prominence < params.peak_prominence_min_fraction * peak.value);
            !drop
        })
        .collect()
}

/// Strip/peak correlation coefficient over all N samples (spec §4.3, §9:
/// "this spec chooses always over all N for clarity"). Returns the sentinel
/// -10 when fewer than 2 samples are available or either side has zero
/// variance.
pub fn correlation_coefficient(u: &[f64], v: &[f64]) -> f64 {
    let n = u.len().min(v.len());
    if n < 2 {
        return -10.0;
    }
    let nf = n as f64;
    let mu_u = u[..n].iter().sum::<f64>() / nf;
    let mu_v = v[..n].iter().sum::<f64>() / nf;
    let mut cov = 0.0;
    let mut var_u = 0.0;
    let mut var_v = 0.0;
    for k in 0..n {
        let du = u[k] - mu_u;
        let dv = v[k] - mu_v;
        cov += du * dv;
        var_u += du * du;
        var_v += dv * dv;
    }
    let sigma_u = (var_u / nf).sqrt();
    let sigma_v = (var_v / nf).sqrt();
    if sigma_u == 0.0 || sigma_v == 0.0 {
        return -10.0;
    }
    (cov / nf) / (sigma_u * sigma_v)
}

struct Span {
    lo: usize,
    hi: usize,
}

fn grow_cluster(strips: &[ClusterStripInput], peak: &Peak, params: &ClusterFinderParams) -> Span {
    let mut lo = peak.pos;
    let mut prev_strip = peak.strip;
    while lo > 0 {
        let cand = &strips[lo - 1];
        if cand.strip != prev_strip - 1 {
            break;
        }
        if (peak.strip - cand.strip).abs() > params.max_sep {
            break;
        }
        if params.use_strip_timing_cut
            && (cand.t_mean - strips[peak.pos].t_mean).abs() > params.add_strip_t_cut
        {
            break;
        }
        let c_shaped = correlation_coefficient(cand.shaped_samples, strips[peak.pos].shaped_samples);
        let c_deconv = correlation_coefficient(cand.deconv_samples, strips[peak.pos].deconv_samples);
        if c_shaped < params.add_strip_corr_cut && c_deconv < params.add_strip_corr_cut {
            break;
        }
        lo -= 1;
        prev_strip = cand.strip;
    }

    let mut hi = peak.pos;
    let mut prev_strip = peak.strip;
    while hi + 1 < strips.len() {
        let cand = &strips[hi + 1];
        if cand.strip != prev_strip + 1 {
            break;
        }
        if (cand.strip - peak.strip).abs() > params.max_sep {
            break;
        }
        if params.use_strip_timing_cut
            && (cand.t_mean - strips[peak.pos].t_mean).abs() > params.add_strip_t_cut
        {
            break;
        }
        let c_shaped = correlation_coefficient(cand.shaped_samples, strips[peak.pos].shaped_samples);
        let c_deconv = correlation_coefficient(cand.deconv_samples, strips[peak.pos].deconv_samples);
        if c_shaped < params.add_strip_corr_cut && c_deconv < params.add_strip_corr_cut {
            break;
        }
        hi += 1;
        prev_strip = cand.strip;
    }

    Span { lo, hi }
}

fn cauchy_weight(peak_value: f64, distance_strips: f64, pitch: f64, sigma_shape: f64) -> f64 {
    let d = distance_strips * pitch / sigma_shape;
    peak_value / (1.0 + d * d)
}

/// Run the full 1D cluster-finding pipeline for one axis's retained strips.
/// `strips` must be sorted ascending by `strip`. `constraint` is an optional
/// `(centre, half_width)` in length units (spec §4.3's "constraint filter").
pub fn find_clusters(
    mut strips: Vec<ClusterStripInput>,
    params: &ClusterFinderParams,
    constraint: Option<(f64, f64)>,
) -> (Vec<Cluster1D>, ClusterFinderStats) {
    strips.sort_by_key(|s| s.strip);

    let mut candidates = Vec::new();
    for i in 0..strips.len() {
        if candidate_is_local_max(&strips, i, params) {
            candidates.push(Peak {
                pos: i,
                strip: strips[i].strip,
                value: strips[i].clustering_quantity,
            });
        }
    }

    let peaks = prune_by_prominence(&strips, candidates, params);
    let spans: Vec<Span> = peaks.iter().map(|p| grow_cluster(&strips, p, params)).collect();

    let mut stats = ClusterFinderStats::default();
    let mut clusters = Vec::with_capacity(peaks.len());

    for (peak, span) in peaks.iter().zip(spans.iter()) {
        let n_samples = strips[peak.pos].shaped_samples.len();
        let mut samples = vec![0.0_f64; n_samples];
        let mut deconv_samples = vec![0.0_f64; n_samples];
        let mut sum = 0.0;
        let mut deconv_sum = 0.0;
        let mut member_record_indices = Vec::with_capacity(span.hi - span.lo + 1);
        let mut weighted_pos_sum = 0.0;
        let mut weighted_pos_sq_sum = 0.0;
        let mut weighted_pos_weight = 0.0;
        let mut weighted_t_sum = 0.0;
        let mut weighted_t_deconv_sum = 0.0;

        for idx in span.lo..=span.hi {
            let strip = &strips[idx];
            member_record_indices.push(strip.record_index);

            let w_peak = cauchy_weight(
                peak.value,
                (peak.strip - strip.strip) as f64,
                params.pitch,
                params.sigma_hit_shape,
            );
            let mut w_total = w_peak;
            for other in peaks.iter() {
                if other.pos == peak.pos {
                    continue;
                }
                if (other.strip - strip.strip).abs() > params.max_sep {
                    continue;
                }
                w_total += cauchy_weight(
                    other.value,
                    (other.strip - strip.strip) as f64,
                    params.pitch,
                    params.sigma_hit_shape,
                );
            }
            let share = if w_total > 0.0 { w_peak / w_total } else { 0.0 };

            for k in 0..n_samples {
                samples[k] += strip.shaped_samples[k] * share;
                deconv_samples[k] += strip.deconv_samples.get(k).copied().unwrap_or(0.0) * share;
            }
            sum += strip.sum * share;
            deconv_sum += strip.deconv_samples.iter().sum::<f64>() * share;

            if (peak.strip - strip.strip).abs() <= params.max_sep_pos.min(params.max_sep) {
                let pos = strip_center(strip.strip as i64, params.n_strips, params.pitch, params.offset);
                weighted_pos_sum += pos * strip.sum * share;
                weighted_pos_sq_sum += pos * pos * strip.sum * share;
                weighted_pos_weight += strip.sum * share;
            }
            weighted_t_sum += strip.t_mean * strip.sum * share;
            weighted_t_deconv_sum += strip.t_mean * strip.deconv_combo_max * share;
        }

        let hitpos_mean = if weighted_pos_weight > 0.0 {
            weighted_pos_sum / weighted_pos_weight
        } else {
            strip_center(peak.strip as i64, params.n_strips, params.pitch, params.offset)
        };
        let hitpos_sigma = if weighted_pos_weight > 0.0 {
            (weighted_pos_sq_sum / weighted_pos_weight - hitpos_mean * hitpos_mean)
                .max(0.0)
                .sqrt()
        } else {
            0.0
        };
        let t_mean = if sum > 0.0 { weighted_t_sum / sum } else { 0.0 };
        let t_mean_deconv = if deconv_sum > 0.0 {
            weighted_t_deconv_sum / deconv_sum
        } else {
            0.0
        };

        let (_, isampmax) = crate::strip::max_sample(&samples);
        let (_, isampmax_deconv) = crate::strip::max_sample(&deconv_samples);
        let (deconv_sum_max_combo, _) = crate::strip::two_sample_combo_max(&deconv_samples);

        let n_strips = span.hi - span.lo + 1;
        if n_strips >= 2 && sum >= params.threshold_clustersum {
            stats.total_found += 1;
        }

        let in_constraint = match constraint {
            Some((centre, half_width)) => (hitpos_mean - centre).abs() <= half_width,
            None => true,
        };

        clusters.push(Cluster1D {
            istriplo: strips[span.lo].strip,
            istriphi: strips[span.hi].strip,
            istripmax: peak.strip,
            peak_record_index: strips[peak.pos].record_index,
            samples,
            deconv_samples,
            sum,
            deconv_sum,
            deconv_sum_max_combo,
            hitpos_mean,
            hitpos_sigma,
            t_mean,
            t_mean_deconv,
            isampmax,
            isampmax_deconv,
            member_record_indices,
            n_strips,
            keep: true,
            in_constraint,
            is_negative: false,
        });
    }

    (clusters, stats)
}

/// Post-pass filter: cluster sum >= threshold (spec §4.3's first post-pass
/// stage). Soft mode only rejects failing clusters if at least one cluster
/// passed; hard mode rejects unconditionally.
pub fn filter_by_cluster_sum(clusters: &mut [Cluster1D], threshold: f64, mode: FilterMode) {
    apply_soft_hard(clusters, mode, |c| c.sum >= threshold);
}

/// Post-pass filter: strip count >= 2 (spec §4.3's second post-pass stage).
pub fn filter_by_strip_count(clusters: &mut [Cluster1D], mode: FilterMode) {
    apply_soft_hard(clusters, mode, |c| c.n_strips >= 2);
}

fn apply_soft_hard(clusters: &mut [Cluster1D], mode: FilterMode, passes: impl Fn(&Cluster1D) -> bool) {
    let any_kept_pass = clusters.iter().filter(|c| c.keep).any(&passes);
    for c in clusters.iter_mut() {
        if !c.keep {
            continue;
        }
        if !passes(c) {
            match mode {
                FilterMode::Hard => c.keep = false,
                FilterMode::Soft => {
                    if any_kept_pass {
                        c.keep = false;
                    }
                }
            }
        }
    }
}
