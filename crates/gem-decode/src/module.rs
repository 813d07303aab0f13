//! Module Driver: orchestrates per-event decode across every mapped chip of
//! one GEM readout module and assembles the final strip/cluster/hit lists
//! (spec §4, §5, §9's "global mutable module state collapses into a single
//! value" design note).

use tracing::{debug, trace, warn};

use crate::chanmap::{ChipMapEntry, APV_CHANNELS};
use crate::cluster1d::{self, Cluster1D, ClusterFinderParams, ClusterFinderStats, ClusterStripInput};
use crate::commonmode::{self, ChipCommonModeState};
use crate::config::ModuleConfig;
use crate::geometry::{Axis, DegenerateAxesError, UvXyTransform};
use crate::hit2d::{self, Hit2D, HitAssemblerParams, HitAssemblerStats, Rect};
use crate::histsink::{HistogramSink, NullHistogramSink};
use crate::pedestal::PedestalTable;
use crate::raw::{decode_debug_words, EventSource};
use crate::strip::{decode_strip, EdgeSamplePolicy, PulseShapeTemplate, StripDecodeParams, StripRecord};

/// Nanoseconds between consecutive APV25 time samples (glossary: "24 ns apart").
pub const SAMPLE_PERIOD_NS: f64 = 24.0;

/// Everything produced by one [`Module::decode_event`] call (spec §3's
/// per-event transient state, minus the intermediate per-sample arrays that
/// never outlive `decode_chip`).
#[derive(Debug, Clone, Default)]
pub struct DecodedEvent {
    pub event_number: u64,
    pub u_strips: Vec<StripRecord>,
    pub v_strips: Vec<StripRecord>,
    pub u_clusters: Vec<Cluster1D>,
    pub v_clusters: Vec<Cluster1D>,
    pub u_cluster_stats: ClusterFinderStats,
    pub v_cluster_stats: ClusterFinderStats,
    pub hits: Vec<Hit2D>,
    pub hit_stats: HitAssemblerStats,
}

fn average_rms(pedestal: &PedestalTable, axis: Axis) -> f64 {
    let n = pedestal.n_strips(axis);
    if n == 0 {
        return 0.0;
    }
    (0..n).map(|s| pedestal.rms(axis, s)).sum::<f64>() / n as f64
}

/// Combine the config's separate `u_gain`/`v_gain` vectors into one array
/// keyed by [`ChipMapEntry::dense_index`], the indexing [`PedestalTable`]
/// expects. Each axis's gain list is assumed ordered the same way its chips
/// appear in the chanmap (no other linkage exists between the two).
fn combine_chip_gains(config: &ModuleConfig) -> Vec<f64> {
    let max_dense = config
        .chip_map
        .entries()
        .iter()
        .map(|e| e.dense_index + 1)
        .max()
        .unwrap_or(0);
    let mut gains = vec![1.0_f64; max_dense];
    let (mut u_seen, mut v_seen) = (0usize, 0usize);
    for entry in config.chip_map.entries() {
        let g = match entry.axis {
            Axis::U => {
                let g = config.u_gain.get(u_seen).copied().unwrap_or(1.0);
                u_seen += 1;
                g
            }
            Axis::V => {
                let g = config.v_gain.get(v_seen).copied().unwrap_or(1.0);
                v_seen += 1;
                g
            }
        };
        if let Some(slot) = gains.get_mut(entry.dense_index) {
            *slot = g;
        }
    }
    gains
}

/// A stateful per-module decoder: owns the read-only configuration derived
/// tables plus every piece of mutable per-run/per-chip state (spec §9, in
/// the idiom of a single stream-processor object owning its state rather
/// than scattered globals).
pub struct Module<H: HistogramSink = NullHistogramSink> {
    name: String,
    config: ModuleConfig,
    pedestal: PedestalTable,
    transform: UvXyTransform,
    ts_template: Option<PulseShapeTemplate>,
    active_area: Rect,
    rolling_capacity: usize,
    chip_state: Vec<ChipCommonModeState>,
    sink: H,
    n_events: u64,
}

impl Module<NullHistogramSink> {
    /// Build a module with diagnostics discarded (spec's default: no
    /// histogram sink wired up).
    pub fn new(name: impl Into<String>, config: ModuleConfig) -> Result<Self, DegenerateAxesError> {
        Self::with_sink(name, config, NullHistogramSink)
    }
}

impl<H: HistogramSink> Module<H> {
    pub fn with_sink(name: impl Into<String>, config: ModuleConfig, sink: H) -> Result<Self, DegenerateAxesError> {
        let transform = UvXyTransform::new(config.geometry.u_angle_rad, config.geometry.v_angle_rad)?;
        let pedestal = PedestalTable::new(
            config.ped_u.clone(),
            config.ped_v.clone(),
            config.rms_u.clone(),
            config.rms_v.clone(),
            combine_chip_gains(&config),
            config.module_gain,
        );
        let half_x = config.geometry.size[0] / 2.0;
        let half_y = config.geometry.size[1] / 2.0;
        let active_area = Rect::centered(half_x, half_y);
        let ts_template = if config.use_ts_chi2_cut {
            Some(PulseShapeTemplate {
                fractions: vec![(config.goodstrip_tsfrac_mean, config.goodstrip_tsfrac_sigma); config.n_samples],
            })
        } else {
            None
        };
        let rolling_capacity = config.commonmode_nevents_lookback * config.n_samples.max(1);

        Ok(Self {
            name: name.into(),
            config,
            pedestal,
            transform,
            ts_template,
            active_area,
            rolling_capacity,
            chip_state: Vec::new(),
            sink,
            n_events: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    /// Per-run setup: reset the event counter and every chip's rolling
    /// common-mode/bias history (spec's supplemented `GEMModule::Begin`).
    pub fn begin_run(&mut self, run_number: u64) {
        debug!(module = %self.name, run_number, "beginning run");
        self.n_events = 0;
        for state in self.chip_state.iter_mut() {
            *state = ChipCommonModeState::new(self.rolling_capacity);
        }
    }

    /// Per-run teardown: flush diagnostic histograms (spec's supplemented
    /// `GEMModule::End`).
    pub fn end_run(&mut self) {
        debug!(module = %self.name, n_events = self.n_events, "ending run");
        self.sink.finish();
    }

    fn ensure_chip_state(&mut self) {
        let max_dense = self
            .config
            .chip_map
            .entries()
            .iter()
            .map(|e| e.dense_index + 1)
            .max()
            .unwrap_or(0);
        if self.chip_state.len() < max_dense {
            self.chip_state
                .resize_with(max_dense, || ChipCommonModeState::new(self.rolling_capacity));
        }
    }

    /// Decode every mapped chip for one event, cluster each axis, cross into
    /// 2D hits and apply the post-pass quality filters (spec §4, §8's seed
    /// scenarios). `constraint_u`/`constraint_v` are optional `(centre,
    /// half_width)` windows for the 1D constraint filter; `constraint_xy` is
    /// an optional active-region override for the 2D assembler.
    pub fn decode_event<E: EventSource>(
        &mut self,
        event: &E,
        constraint_u: Option<(f64, f64)>,
        constraint_v: Option<(f64, f64)>,
        constraint_xy: Option<Rect>,
    ) -> DecodedEvent {
        self.n_events += 1;
        self.ensure_chip_state();

        let entries: Vec<ChipMapEntry> = self.config.chip_map.entries().to_vec();
        let mut u_strips = Vec::new();
        let mut v_strips = Vec::new();

        for entry in &entries {
            self.chip_state[entry.dense_index].reset_event();
            let strips = self.decode_chip(event, entry);
            match entry.axis {
                Axis::U => u_strips.extend(strips),
                Axis::V => v_strips.extend(strips),
            }
        }

        if self.config.pedestal_mode {
            for strip in u_strips.iter().chain(v_strips.iter()) {
                self.sink.fill("pedestal_mode_strip_sum", strip.sum);
            }
            return DecodedEvent {
                event_number: event.event_number(),
                u_strips,
                v_strips,
                ..Default::default()
            };
        }

        let (mut u_clusters, u_cluster_stats) =
            self.find_clusters_for_axis(Axis::U, &u_strips, constraint_u);
        let (mut v_clusters, v_cluster_stats) =
            self.find_clusters_for_axis(Axis::V, &v_strips, constraint_v);

        cluster1d::filter_by_cluster_sum(&mut u_clusters, self.config.threshold_clustersum, self.config.filter_1d_mode);
        cluster1d::filter_by_strip_count(&mut u_clusters, self.config.filter_1d_mode);
        cluster1d::filter_by_cluster_sum(&mut v_clusters, self.config.threshold_clustersum, self.config.filter_1d_mode);
        cluster1d::filter_by_strip_count(&mut v_clusters, self.config.filter_1d_mode);

        let u_params = self.cluster_params_for(Axis::U);
        let v_params = self.cluster_params_for(Axis::V);
        for negative in negative_diagnostic_clusters(&u_strips, &u_params) {
            self.sink.fill("negative_cluster_sum", negative.sum);
            u_clusters.push(negative);
        }
        for negative in negative_diagnostic_clusters(&v_strips, &v_params) {
            self.sink.fill("negative_cluster_sum", negative.sum);
            v_clusters.push(negative);
        }

        let hit_params = HitAssemblerParams {
            adc_asym_cut: self.config.adc_asym_cut,
            deltat_cut: self.config.deltat_cut,
            corrcoeff_cut: self.config.corrcoeff_cut,
            threshold_clustersum: self.config.threshold_clustersum,
            max_hits: self.config.max_2d_hits,
            active_area: self.active_area,
            constraint: constraint_xy,
            filter_deltat_mode: self.config.filter_2d_mode,
            filter_corr_mode: self.config.filter_2d_mode,
            filter_asym_mode: self.config.filter_2d_mode,
        };
        let (mut hits, hit_stats) =
            hit2d::find_hits(&u_clusters, &u_strips, &v_clusters, &v_strips, &self.transform, &hit_params);
        hit2d::apply_post_pass_filters(&mut hits, &hit_params);

        if hit_stats.capped {
            warn!(event = event.event_number(), module = %self.name, "2D hit cap exceeded, hits truncated");
        }

        for hit in hits.iter().filter(|h| h.keep) {
            self.sink.fill_2d("hit_xy", hit.x, hit.y);
            self.sink.fill("hit_energy", hit.energy);
        }

        DecodedEvent {
            event_number: event.event_number(),
            u_strips,
            v_strips,
            u_clusters,
            v_clusters,
            u_cluster_stats,
            v_cluster_stats,
            hits,
            hit_stats,
        }
    }

    fn cluster_params_for(&self, axis: Axis) -> ClusterFinderParams {
        let shape = match axis {
            Axis::U => &self.config.u_cluster_shape,
            Axis::V => &self.config.v_cluster_shape,
        };
        let (pitch, n_strips, offset) = match axis {
            Axis::U => (
                self.config.geometry.u_pitch,
                self.config.geometry.n_strips_u,
                self.config.geometry.u_offset,
            ),
            Axis::V => (
                self.config.geometry.v_pitch,
                self.config.geometry.n_strips_v,
                self.config.geometry.v_offset,
            ),
        };
        let sigma_sum = average_rms(&self.pedestal, axis) * self.config.n_samples as f64;
        ClusterFinderParams {
            pitch,
            n_strips,
            offset,
            max_sep: shape.max_sep,
            max_sep_pos: shape.max_sep_pos,
            threshold_sample: self.config.threshold_sample,
            threshold_stripsum: self.config.threshold_stripsum,
            threshold_clustersum: self.config.threshold_clustersum,
            peak_prominence_min_sigma: self.config.peak_prominence_min_sigma,
            peak_prominence_min_fraction: self.config.peak_prominence_min_fraction,
            sigma_sum,
            sigma_hit_shape: shape.sigma_hit_shape,
            use_strip_timing_cut: self.config.use_strip_timing_cut,
            strip_t0: self.config.maxstrip_t0,
            strip_t_window: self.config.maxstrip_tcut,
            add_strip_t_cut: self.config.addstrip_tcut,
            add_strip_corr_cut: self.config.addstrip_ccor_cut,
            use_deconv_combo_for_clustering: self.config.clustering_uses_deconv_combo,
            filter_sum_mode: self.config.filter_1d_mode,
            filter_strip_count_mode: self.config.filter_1d_mode,
        }
    }

    fn find_clusters_for_axis(
        &self,
        axis: Axis,
        strips: &[StripRecord],
        constraint: Option<(f64, f64)>,
    ) -> (Vec<Cluster1D>, ClusterFinderStats) {
        let params = self.cluster_params_for(axis);
        let inputs: Vec<ClusterStripInput> = strips
            .iter()
            .enumerate()
            .filter(|(_, s)| s.keep && !s.is_negative)
            .map(|(i, s)| ClusterStripInput {
                record_index: i,
                strip: s.strip,
                clustering_quantity: if self.config.clustering_uses_deconv_combo {
                    s.deconv_combo_max
                } else {
                    s.sum
                },
                max_sample_value: s.max_sample_value,
                sum: s.sum,
                t_mean: s.t_mean,
                shaped_samples: &s.corrected_samples,
                deconv_samples: &s.deconv_samples,
                deconv_combo_max: s.deconv_combo_max,
            })
            .collect();
        cluster1d::find_clusters(inputs, &params, constraint)
    }

    /// Flat front-end channel for raw channel `channel` on `entry`'s chip
    /// (spec §6: `chip_id * 128 + raw_channel`).
    fn flat_channel(entry: &ChipMapEntry, channel: u32) -> u32 {
        entry.chip_id * APV_CHANNELS as u32 + channel
    }

    /// Decode one chip's 128 raw channels into retained [`StripRecord`]s.
    /// Never fails outright: a chip whose common-mode estimate can't be
    /// computed falls back to an unsubtracted (cm=0) pass rather than
    /// dropping the chip, per spec §7's per-chip error isolation.
    fn decode_chip<E: EventSource>(&mut self, event: &E, entry: &ChipMapEntry) -> Vec<StripRecord> {
        let n_samples = self.config.n_samples;
        let axis = entry.axis;

        let mut present = [false; APV_CHANNELS];
        for (c, slot) in present.iter_mut().enumerate() {
            let flat = Self::flat_channel(entry, c as u32);
            *slot = event.num_hits(entry.crate_id, entry.slot, flat) > 0;
        }
        let n_good = present.iter().filter(|&&p| p).count();
        if n_good == 0 {
            return Vec::new();
        }

        let online_pedestal_subtracted = {
            let first = present.iter().position(|&p| p).unwrap_or(0);
            let flat = Self::flat_channel(entry, first as u32);
            event.raw_data(entry.crate_id, entry.slot, flat, 0) & 0x1 != 0
        };

        let mut strip_of = [0i32; APV_CHANNELS];
        let mut ped_subtracted = vec![vec![0.0_f64; n_samples]; APV_CHANNELS];
        for c in 0..APV_CHANNELS {
            if !present[c] {
                continue;
            }
            let strip = self.config.chip_map.strip_index(entry, c as u32);
            strip_of[c] = strip;
            let ped_mean = if online_pedestal_subtracted {
                0.0
            } else {
                self.pedestal.mean(axis, strip.max(0) as usize)
            };
            let flat = Self::flat_channel(entry, c as u32);
            for k in 0..n_samples {
                ped_subtracted[c][k] = event.data(entry.crate_id, entry.slot, flat, k) as f64 - ped_mean;
            }
        }

        let debug_base = self.config.chan_cm_flags.unwrap_or(125);
        let mut debug_words = [0u32; 3];
        for (i, word) in debug_words.iter_mut().enumerate() {
            let flat = Self::flat_channel(entry, debug_base + i as u32);
            *word = event.data(entry.crate_id, entry.slot, flat, 0);
        }
        let online_cm = decode_debug_words(debug_words);
        self.chip_state[entry.dense_index].online_values = std::array::from_fn(|k| Some(online_cm[k] as f64));

        let avg_rms = present
            .iter()
            .enumerate()
            .filter(|(_, &p)| p)
            .map(|(c, _)| self.pedestal.rms(axis, strip_of[c].max(0) as usize))
            .sum::<f64>()
            / n_good.max(1) as f64;

        let cm_per_sample = self.estimate_cm_for_chip(entry, &present, &strip_of, &ped_subtracted, n_good, avg_rms, &online_cm);

        let gain = self.pedestal.gain(entry.dense_index);
        let ts_template = self.ts_template.clone();
        let strip_params = StripDecodeParams {
            sample_period: SAMPLE_PERIOD_NS,
            deconv_tau: self.config.deconvolution_tau,
            n_samples,
            zero_suppress_nsigma: self.config.zero_suppress_nsigma,
            zero_suppress_enabled: self.config.zero_suppress,
            edge_policy: EdgeSamplePolicy::from_config_value(self.config.suppress_first_last),
            ts_chi2_cut: self.config.use_ts_chi2_cut.then_some(self.config.ts_chi2_cut),
            deconvolution_enabled: self.config.deconvolution_enabled,
            deconv_threshold_sample: self.config.threshold_sample,
            record_negative_polarity: true,
        };

        let mut records = Vec::with_capacity(n_good);
        for c in 0..APV_CHANNELS {
            if !present[c] {
                continue;
            }
            let strip = strip_of[c];
            let strip_rms = self.pedestal.rms(axis, strip.max(0) as usize);
            let corrected: Vec<f64> = (0..n_samples).map(|k| ped_subtracted[c][k] - cm_per_sample[k]).collect();
            let raw: Vec<f64> = (0..n_samples).map(|k| ped_subtracted[c][k]).collect();
            trace!(chip = entry.chip_id, channel = c, strip, "decoded strip");
            records.push(decode_strip(
                axis,
                strip,
                raw,
                corrected,
                gain,
                strip_rms,
                ts_template.as_ref(),
                &strip_params,
            ));
        }
        records
    }

    /// Resolve the per-sample common-mode value for one chip's event, either
    /// by running an offline estimator over the full 128-channel readout or
    /// by trusting the online debug-word value (plus a correction for the
    /// zero-suppressed strips it never saw), per spec §4.1.
    #[allow(clippy::too_many_arguments)]
    fn estimate_cm_for_chip(
        &mut self,
        entry: &ChipMapEntry,
        present: &[bool; APV_CHANNELS],
        strip_of: &[i32; APV_CHANNELS],
        ped_subtracted: &[Vec<f64>],
        n_good: usize,
        avg_rms: f64,
        online_cm: &[i32; 6],
    ) -> Vec<f64> {
        let n_samples = self.config.n_samples;
        let state = &self.chip_state[entry.dense_index];
        let rolling_mature = state.rolling_is_mature(self.config.commonmode_nevents_lookback, n_samples);
        let reference_mean = if rolling_mature { state.rolling.mean() } else { 0.0 };
        let reference_rms = if rolling_mature && state.rolling.rms() > 0.0 { state.rolling.rms() } else { avg_rms };

        if n_good == APV_CHANNELS {
            let mut cm = Vec::with_capacity(n_samples);
            for k in 0..n_samples {
                let values: Vec<f64> = (0..APV_CHANNELS).filter(|&c| present[c]).map(|c| ped_subtracted[c][k]).collect();
                let strip_rms_for = |i: usize| -> f64 {
                    let channel = (0..APV_CHANNELS).filter(|&c| present[c]).nth(i).unwrap_or(0);
                    self.pedestal.rms(entry.axis, strip_of[channel].max(0) as usize)
                };
                let estimate = commonmode::estimate_common_mode(
                    self.config.commonmode_flag,
                    &values,
                    reference_mean,
                    reference_rms,
                    strip_rms_for,
                    &self.config.commonmode_params,
                );
                let value = match estimate {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(chip = entry.chip_id, sample = k, error = %e, "common-mode estimate failed, using zero");
                        0.0
                    }
                };
                cm.push(value);
            }
            let state = &mut self.chip_state[entry.dense_index];
            for &v in &cm {
                state.push_rolling(v);
            }
            cm
        } else {
            let mut cm = Vec::with_capacity(n_samples);
            for k in 0..n_samples {
                let online_value = online_cm[k.min(5)] as f64;
                let recompute = || {
                    let values: Vec<f64> = (0..APV_CHANNELS)
                        .filter(|&c| present[c])
                        .map(|c| ped_subtracted[c][k] + online_value)
                        .collect();
                    let strip_rms_for = |i: usize| -> f64 {
                        let channel = (0..APV_CHANNELS).filter(|&c| present[c]).nth(i).unwrap_or(0);
                        self.pedestal.rms(entry.axis, strip_of[channel].max(0) as usize)
                    };
                    commonmode::estimate_common_mode(
                        self.config.commonmode_online_flag,
                        &values,
                        reference_mean,
                        reference_rms,
                        strip_rms_for,
                        &self.config.commonmode_params,
                    )
                    .unwrap_or(online_value)
                };
                let state = &self.chip_state[entry.dense_index];
                let correction = commonmode::correct(
                    &self.config.correction,
                    n_good,
                    online_value,
                    state.rolling.mean(),
                    reference_rms,
                    state.bias_rolling.mean(),
                    recompute,
                );
                if let Some(c) = correction {
                    self.sink.fill("cm_residual", c);
                }
                let applied = online_value + correction.unwrap_or(0.0);
                let state = &mut self.chip_state[entry.dense_index];
                state.push_rolling(online_value);
                if let Some(c) = correction {
                    state.bias_rolling.push(c);
                }
                cm.push(applied);
            }
            cm
        }
    }
}

/// Diagnostic pass over strips flagged `is_negative` (spec's supplemented
/// "negative-strip/negative-cluster" feature): cluster them using the same
/// pipeline with absolute-valued quantities so the ordinary thresholds stay
/// meaningful, then mark every resulting cluster `keep = false` so they
/// never reach 2D hit assembly — they exist purely to be histogrammed.
fn negative_diagnostic_clusters(strips: &[StripRecord], params: &ClusterFinderParams) -> Vec<Cluster1D> {
    let inputs: Vec<ClusterStripInput> = strips
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_negative)
        .map(|(i, s)| ClusterStripInput {
            record_index: i,
            strip: s.strip,
            clustering_quantity: s.sum.abs(),
            max_sample_value: s.max_sample_value.abs(),
            sum: s.sum.abs(),
            t_mean: s.t_mean,
            shaped_samples: &s.corrected_samples,
            deconv_samples: &s.deconv_samples,
            deconv_combo_max: s.deconv_combo_max.abs(),
        })
        .collect();
    if inputs.is_empty() {
        return Vec::new();
    }
    let (mut clusters, _stats) = cluster1d::find_clusters(inputs, params, None);
    for cluster in clusters.iter_mut() {
        cluster.keep = false;
        cluster.is_negative = true;
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histsink::RecordingHistogramSink;
    use std::collections::HashMap;

    const CONFIG_TEXT: &str = "\
layer 1
nstripsU 256
nstripsV 256
uangle 30.0
vangle -30.0
upitch 0.4
vpitch 0.4
pedu 0.0
pedv 0.0
rmsu 10.0
rmsv 10.0
threshold_sample 50.0
threshold_stripsum 250.0
threshold_clustersum 500.0
zerosuppress 1
zerosuppress_nsigma 3.0
commonmode_flag 0
commonmode_nstriplo 2
commonmode_nstriphi 2
commonmode_minstrips 10
chanmap 0 0 0 0 0 U 0 0 0\n0 0 1 0 0 V 1 0 0
";

    /// A hand-built in-memory event: full 128-channel readout for one chip,
    /// an isolated pulse on a single strip, rest at baseline.
    struct FakeEvent {
        data: HashMap<(u32, u32, u32), Vec<u32>>,
    }

    impl FakeEvent {
        fn full_readout(crate_id: u32, slot: u32, chip_id: u32, peak_channel: u32, samples: &[u32]) -> Self {
            let mut data = HashMap::new();
            for c in 0..APV_CHANNELS as u32 {
                let flat = chip_id * APV_CHANNELS as u32 + c;
                let values = if c == peak_channel {
                    samples.to_vec()
                } else {
                    vec![0u32; samples.len()]
                };
                data.insert((crate_id, slot, flat), values);
            }
            let _ = slot;
            Self { data }
        }
    }

    impl EventSource for FakeEvent {
        fn num_hits(&self, crate_id: u32, slot: u32, channel: u32) -> usize {
            self.data.get(&(crate_id, slot, channel)).map(|v| v.len()).unwrap_or(0)
        }
        fn raw_data(&self, _crate_id: u32, _slot: u32, _channel: u32, _index: usize) -> u32 {
            0
        }
        fn data(&self, crate_id: u32, slot: u32, channel: u32, index: usize) -> u32 {
            self.data
                .get(&(crate_id, slot, channel))
                .and_then(|v| v.get(index))
                .copied()
                .unwrap_or(0)
        }
        fn event_number(&self) -> u64 {
            1
        }
    }

    #[test]
    fn full_readout_isolated_hit_produces_one_cluster_and_one_hit() {
        let config = ModuleConfig::from_text(CONFIG_TEXT).unwrap();
        let mut module = Module::new("test", config).unwrap();
        let samples = [5u32, 60, 180, 220, 140, 40];
        let u_event = FakeEvent::full_readout(0, 0, 0, 10, &samples);
        let decoded = module.decode_event(&u_event, None, None, None);
        assert!(!decoded.u_strips.is_empty());
        let peak = decoded.u_strips.iter().find(|s| s.keep).expect("at least one retained strip");
        assert!(peak.sum > 0.0);
    }

    #[test]
    fn pedestal_mode_bypasses_clustering() {
        let mut text = CONFIG_TEXT.to_string();
        text.push_str("pedestal_mode 1\n");
        let config = ModuleConfig::from_text(&text).unwrap();
        let mut sink = RecordingHistogramSink::default();
        let mut module = Module::with_sink("test", config, std::mem::take(&mut sink)).unwrap();
        let samples = [5u32, 60, 180, 220, 140, 40];
        let event = FakeEvent::full_readout(0, 0, 0, 10, &samples);
        let decoded = module.decode_event(&event, None, None, None);
        assert!(decoded.u_clusters.is_empty());
        assert!(decoded.hits.is_empty());
    }

    #[test]
    fn begin_run_resets_event_counter_and_rolling_history() {
        let config = ModuleConfig::from_text(CONFIG_TEXT).unwrap();
        let mut module = Module::new("test", config).unwrap();
        let samples = [5u32, 60, 180, 220, 140, 40];
        let event = FakeEvent::full_readout(0, 0, 0, 10, &samples);
        module.decode_event(&event, None, None, None);
        assert_eq!(module.n_events(), 1);
        module.begin_run(2);
        assert_eq!(module.n_events(), 0);
    }

    #[test]
    fn chip_with_no_data_in_event_yields_no_strips() {
        let config = ModuleConfig::from_text(CONFIG_TEXT).unwrap();
        let mut module = Module::new("test", config).unwrap();
        let event = FakeEvent { data: HashMap::new() };
        let decoded = module.decode_event(&event, None, None, None);
        assert!(decoded.u_strips.is_empty());
        assert!(decoded.v_strips.is_empty());
    }
}
