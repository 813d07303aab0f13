//! Key/value configuration loader (spec §4.5, §7): every option carries a
//! documented default so the loader only fails on the handful of mandatory
//! geometry/mapping keys that have no sane default.

use std::collections::HashMap;
use std::fmt;

use crate::chanmap::{ApvMapFamily, ChipMap, ChipMapEntry};
use crate::cluster1d::FilterMode;
use crate::commonmode::{CommonModeFlag, CommonModeParams, CorrectionParams};
use crate::geometry::Axis;
use crate::pedestal::expand_per_strip;

/// Configuration load error (spec §7: `ConfigMissing` is fatal at load time;
/// `ConfigParse` covers a present key whose value doesn't parse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ConfigMissing { key: String },
    ConfigParse { key: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ConfigMissing { key } => write!(f, "missing mandatory config key: {key}"),
            ConfigError::ConfigParse { key, reason } => {
                write!(f, "failed to parse config key {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Raw key -> whitespace-separated value tokens, as read from the config
/// text file (one key per line, spec §6's "Persistent state").
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    entries: HashMap<String, Vec<String>>,
}

impl RawConfig {
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else { continue };
            let values: Vec<String> = tokens.map(|s| s.to_string()).collect();
            entries.insert(key.to_string(), values);
        }
        Self { entries }
    }

    fn tokens(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    fn require(&self, key: &str) -> Result<&[String], ConfigError> {
        self.tokens(key).ok_or_else(|| ConfigError::ConfigMissing { key: key.to_string() })
    }

    fn parse_token<T: std::str::FromStr>(&self, key: &str, token: &str) -> Result<T, ConfigError> {
        token.parse().map_err(|_| ConfigError::ConfigParse {
            key: key.to_string(),
            reason: format!("could not parse '{token}'"),
        })
    }

    fn f64(&self, key: &str, default: f64) -> f64 {
        self.tokens(key)
            .and_then(|t| t.first())
            .and_then(|t| t.parse().ok())
            .unwrap_or(default)
    }

    fn require_f64(&self, key: &str) -> Result<f64, ConfigError> {
        let tokens = self.require(key)?;
        let first = tokens.first().ok_or_else(|| ConfigError::ConfigMissing { key: key.to_string() })?;
        self.parse_token(key, first)
    }

    fn usize_val(&self, key: &str, default: usize) -> usize {
        self.tokens(key)
            .and_then(|t| t.first())
            .and_then(|t| t.parse().ok())
            .unwrap_or(default)
    }

    fn require_usize(&self, key: &str) -> Result<usize, ConfigError> {
        let tokens = self.require(key)?;
        let first = tokens.first().ok_or_else(|| ConfigError::ConfigMissing { key: key.to_string() })?;
        self.parse_token(key, first)
    }

    fn u32_val(&self, key: &str, default: u32) -> u32 {
        self.tokens(key)
            .and_then(|t| t.first())
            .and_then(|t| t.parse().ok())
            .unwrap_or(default)
    }

    fn bool_val(&self, key: &str, default: bool) -> bool {
        self.tokens(key)
            .and_then(|t| t.first())
            .map(|t| matches!(t.as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(default)
    }

    fn f64_vec(&self, key: &str) -> Vec<f64> {
        self.tokens(key)
            .map(|t| t.iter().filter_map(|s| s.parse().ok()).collect())
            .unwrap_or_default()
    }

    fn string_val(&self, key: &str, default: &str) -> String {
        self.tokens(key)
            .and_then(|t| t.first())
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

/// Geometry keys (spec §4.5 "Geometry" group).
#[derive(Debug, Clone)]
pub struct GeometryConfig {
    pub layer: u32,
    pub n_strips_u: usize,
    pub n_strips_v: usize,
    pub u_angle_rad: f64,
    pub v_angle_rad: f64,
    pub u_pitch: f64,
    pub v_pitch: f64,
    pub u_offset: f64,
    pub v_offset: f64,
    pub position: [f64; 3],
    pub size: [f64; 3],
    /// Module rotation: either a single in-plane angle or a full 3-angle set.
    pub angle: Vec<f64>,
}

/// Cluster-shape keys ("Cluster shape" group), one instance per axis.
#[derive(Debug, Clone)]
pub struct ClusterShapeConfig {
    pub max_sep: i32,
    pub max_sep_pos: i32,
    pub sigma_hit_shape: f64,
}

/// Full per-module configuration assembled from a [`RawConfig`] (spec §4.5).
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub geometry: GeometryConfig,

    pub ped_u: Vec<f64>,
    pub ped_v: Vec<f64>,
    pub rms_u: Vec<f64>,
    pub rms_v: Vec<f64>,
    pub u_gain: Vec<f64>,
    pub v_gain: Vec<f64>,
    pub module_gain: f64,

    pub threshold_sample: f64,
    pub threshold_stripsum: f64,
    pub threshold_clustersum: f64,
    pub peak_prominence_min_sigma: f64,
    pub peak_prominence_min_fraction: f64,

    pub u_cluster_shape: ClusterShapeConfig,
    pub v_cluster_shape: ClusterShapeConfig,

    pub adc_asym_cut: f64,
    pub deltat_cut: f64,
    pub corrcoeff_cut: f64,
    pub filter_1d_mode: FilterMode,
    pub filter_2d_mode: FilterMode,

    pub zero_suppress: bool,
    pub zero_suppress_nsigma: f64,
    pub online_zero_suppress: bool,

    pub commonmode_flag: CommonModeFlag,
    pub commonmode_online_flag: CommonModeFlag,
    pub commonmode_params: CommonModeParams,
    pub use_commonmode_rolling_average: bool,
    pub commonmode_nevents_lookback: usize,
    pub correction: CorrectionParams,

    pub use_strip_timing_cut: bool,
    pub use_ts_chi2_cut: bool,
    pub maxstrip_t0: f64,
    pub maxstrip_tcut: f64,
    pub addstrip_tcut: f64,
    pub addstrip_ccor_cut: f64,
    pub goodstrip_tsfrac_mean: f64,
    pub goodstrip_tsfrac_sigma: f64,
    pub suppress_first_last: i32,
    pub deconvolution_tau: f64,
    /// Pulse-shape chi-squared cut (not named as a distinct key in the original
    /// table; derived from `goodstrip_tschi2cut`, defaulting to a generous
    /// `2 * n_samples`, one dof's worth of slack per sample).
    pub ts_chi2_cut: f64,

    pub chip_map: ChipMap,
    pub chan_cm_flags: Option<u32>,
    pub chan_timestamp_low: Option<u32>,
    pub chan_timestamp_high: Option<u32>,
    pub chan_event_count: Option<u32>,

    pub max_2d_hits: usize,
    pub clustering_uses_deconv_combo: bool,
    pub deconvolution_enabled: bool,
    /// Time samples per strip per trigger (glossary: "typically 6").
    pub n_samples: usize,
    /// Pedestal-mode run: bypass zero suppression and clustering entirely,
    /// fill a raw strip-sum histogram per decoded strip. Used to take
    /// pedestal/RMS calibration data rather than physics events.
    pub pedestal_mode: bool,
}

fn parse_filter_flag(raw: &RawConfig, key: &str) -> FilterMode {
    if raw.bool_val(key, false) {
        FilterMode::Hard
    } else {
        FilterMode::Soft
    }
}

fn parse_commonmode_flag(raw: &RawConfig, key: &str, default: CommonModeFlag) -> CommonModeFlag {
    match raw.u32_val(key, u32::MAX) {
        0 => CommonModeFlag::Sorting,
        1 => CommonModeFlag::DanningOffline,
        2 => CommonModeFlag::Histogramming,
        3 => CommonModeFlag::OnlineDanningTwoPass,
        4 => CommonModeFlag::OnlineDanningIterative,
        _ => default,
    }
}

/// Parse the `chanmap` key's sequence of 9-tuples:
/// `crate slot chip_id position invert axis_tag dense_index cm_flag_channel reserved`.
/// Only the first 7 fields are consumed into a [`ChipMapEntry`]; the trailing
/// two are per-entry diagnostics channel tags handled by the caller.
fn parse_chanmap(raw: &RawConfig) -> Result<Vec<ChipMapEntry>, ConfigError> {
    let tokens = raw.require("chanmap")?;
    if tokens.len() % 9 != 0 {
        return Err(ConfigError::ConfigParse {
            key: "chanmap".to_string(),
            reason: format!("expected a multiple of 9 tokens, got {}", tokens.len()),
        });
    }
    let mut entries = Vec::with_capacity(tokens.len() / 9);
    for (i, chunk) in tokens.chunks(9).enumerate() {
        let parse_u32 = |t: &str| -> Result<u32, ConfigError> {
            t.parse().map_err(|_| ConfigError::ConfigParse {
                key: "chanmap".to_string(),
                reason: format!("entry {i}: could not parse '{t}'"),
            })
        };
        let crate_id = parse_u32(&chunk[0])?;
        let slot = parse_u32(&chunk[1])?;
        let chip_id = parse_u32(&chunk[2])?;
        let position = parse_u32(&chunk[3])?;
        let invert = chunk[4] != "0";
        let axis = match chunk[5].as_str() {
            "U" | "u" => Axis::U,
            "V" | "v" => Axis::V,
            other => {
                return Err(ConfigError::ConfigParse {
                    key: "chanmap".to_string(),
                    reason: format!("entry {i}: unknown axis tag '{other}'"),
                })
            }
        };
        let dense_index = parse_u32(&chunk[6])? as usize;
        entries.push(ChipMapEntry {
            crate_id,
            slot,
            chip_id,
            position,
            invert,
            axis,
            dense_index,
        });
    }
    Ok(entries)
}

impl ModuleConfig {
    /// Build a validated [`ModuleConfig`] from raw key/value text (spec
    /// §4.5). Returns [`ConfigError::ConfigMissing`] for any of the
    /// mandatory geometry/mapping keys.
    pub fn from_text(text: &str) -> Result<Self, ConfigError> {
        let raw = RawConfig::parse(text);

        let layer = raw.require_usize("layer")? as u32;
        let n_strips_u = raw.require_usize("nstripsU")?;
        let n_strips_v = raw.require_usize("nstripsV")?;
        let u_angle_rad = raw.require_f64("uangle")?.to_radians();
        let v_angle_rad = raw.require_f64("vangle")?.to_radians();
        let u_pitch = raw.require_f64("upitch")?;
        let v_pitch = raw.require_f64("vpitch")?;
        let u_offset = raw.f64("uoffset", 0.0);
        let v_offset = raw.f64("voffset", 0.0);

        let position_vals = raw.f64_vec("position");
        let position = [
            position_vals.first().copied().unwrap_or(0.0),
            position_vals.get(1).copied().unwrap_or(0.0),
            position_vals.get(2).copied().unwrap_or(0.0),
        ];
        let size_vals = raw.f64_vec("size");
        let size = [
            size_vals.first().copied().unwrap_or(f64::INFINITY),
            size_vals.get(1).copied().unwrap_or(f64::INFINITY),
            size_vals.get(2).copied().unwrap_or(f64::INFINITY),
        ];
        let angle = raw.f64_vec("angle");

        let geometry = GeometryConfig {
            layer,
            n_strips_u,
            n_strips_v,
            u_angle_rad,
            v_angle_rad,
            u_pitch,
            v_pitch,
            u_offset,
            v_offset,
            position,
            size,
            angle,
        };

        let ped_u = expand_per_strip(&raw.f64_vec("pedu"), n_strips_u);
        let ped_v = expand_per_strip(&raw.f64_vec("pedv"), n_strips_v);
        let rms_u = expand_per_strip(&raw.f64_vec("rmsu"), n_strips_u);
        let rms_v = expand_per_strip(&raw.f64_vec("rmsv"), n_strips_v);
        let u_gain = raw.f64_vec("ugain");
        let v_gain = raw.f64_vec("vgain");
        let module_gain = raw.f64("modulegain", 1.0);

        let u_cluster_shape = ClusterShapeConfig {
            max_sep: raw.u32_val("maxnu_charge", 3) as i32,
            max_sep_pos: raw.u32_val("maxnu_pos", 2) as i32,
            sigma_hit_shape: raw.f64("sigmahitshape", 0.3),
        };
        let v_cluster_shape = ClusterShapeConfig {
            max_sep: raw.u32_val("maxnv_charge", 3) as i32,
            max_sep_pos: raw.u32_val("maxnv_pos", 2) as i32,
            sigma_hit_shape: raw.f64("sigmahitshape", 0.3),
        };

        let n_samples = raw.usize_val("nsamples", 6);
        let commonmode_params = CommonModeParams {
            reject_low: raw.usize_val("commonmode_nstriplo", 28),
            reject_high: raw.usize_val("commonmode_nstriphi", 28),
            min_strips_in_range: raw.usize_val("commonmode_minstrips", 10),
            n_iter: raw.u32_val("commonmode_niter", 3),
            range_nsigma: raw.f64("commonmode_range_nsigma", 5.0),
            danning_nsigma_cut: raw.f64("commonmode_danning_nsigma_cut", 3.0),
            bin_nsigma: raw.f64("commonmode_bin_nsigma", 1.0),
            scan_nsigma: raw.f64("commonmode_scan_nsigma", 5.0),
            step_nsigma: raw.f64("commonmode_step_nsigma", 0.25),
            rms_conversion_factor: raw.f64("fRMS_ConversionFactor", (n_samples as f64).sqrt()),
        };

        let correction = CorrectionParams {
            enabled: raw.bool_val("correct_common_mode", false),
            min_strips: raw.usize_val("correct_common_mode_minstrips", 5),
            n_corr_sigma: raw.f64("correct_common_mode_nsigma", 3.0),
        };

        let chanmap_entries = parse_chanmap(&raw)?;
        let apvmap_tag = raw.string_val("apvmap", "infn");
        let chip_map = ChipMap::new(chanmap_entries, ApvMapFamily::from_tag(&apvmap_tag));

        Ok(ModuleConfig {
            geometry,
            ped_u,
            ped_v,
            rms_u,
            rms_v,
            u_gain,
            v_gain,
            module_gain,

            threshold_sample: raw.f64("threshold_sample", 50.0),
            threshold_stripsum: raw.f64("threshold_stripsum", 250.0),
            threshold_clustersum: raw.f64("threshold_clustersum", 500.0),
            peak_prominence_min_sigma: raw.f64("peakprominence_minsigma", 3.0),
            peak_prominence_min_fraction: raw.f64("peakprominence_minfraction", 0.0),

            u_cluster_shape,
            v_cluster_shape,

            adc_asym_cut: raw.f64("ADCasym_cut", 0.2),
            deltat_cut: raw.f64("deltat_cut", 20.0),
            corrcoeff_cut: raw.f64("corrcoeff_cut", 0.5),
            filter_1d_mode: parse_filter_flag(&raw, "filterflag1D"),
            filter_2d_mode: parse_filter_flag(&raw, "filterflag2D"),

            zero_suppress: raw.bool_val("zerosuppress", true),
            zero_suppress_nsigma: raw.f64("zerosuppress_nsigma", 5.0),
            online_zero_suppress: raw.bool_val("onlinezerosuppress", false),

            commonmode_flag: parse_commonmode_flag(&raw, "commonmode_flag", CommonModeFlag::Sorting),
            commonmode_online_flag: parse_commonmode_flag(
                &raw,
                "commonmode_online_flag",
                CommonModeFlag::OnlineDanningTwoPass,
            ),
            commonmode_params,
            use_commonmode_rolling_average: raw.bool_val("use_commonmode_rolling_average", false),
            commonmode_nevents_lookback: raw.usize_val("commonmode_nevents_lookback", 100),
            correction,

            use_strip_timing_cut: raw.bool_val("usestriptimingcut", false),
            use_ts_chi2_cut: raw.bool_val("useTSchi2cut", false),
            maxstrip_t0: raw.f64("maxstrip_t0", 0.0),
            maxstrip_tcut: raw.f64("maxstrip_tcut", 1000.0),
            addstrip_tcut: raw.f64("addstrip_tcut", 1000.0),
            addstrip_ccor_cut: raw.f64("addstrip_ccor_cut", -1.0),
            goodstrip_tsfrac_mean: raw.f64("goodstrip_TSfrac_mean", 0.0),
            goodstrip_tsfrac_sigma: raw.f64("goodstrip_TSfrac_sigma", 1000.0),
            suppress_first_last: raw.u32_val("suppressfirstlast", 0) as i32,
            deconvolution_tau: raw.f64("deconvolution_tau", 50.0),
            ts_chi2_cut: raw.f64("goodstrip_tschi2cut", 2.0 * n_samples as f64),

            chip_map,
            chan_cm_flags: raw.tokens("chan_cm_flags").and_then(|t| t.first()).and_then(|s| s.parse().ok()),
            chan_timestamp_low: raw
                .tokens("chan_timestamp_low")
                .and_then(|t| t.first())
                .and_then(|s| s.parse().ok()),
            chan_timestamp_high: raw
                .tokens("chan_timestamp_high")
                .and_then(|t| t.first())
                .and_then(|s| s.parse().ok()),
            chan_event_count: raw
                .tokens("chan_event_count")
                .and_then(|t| t.first())
                .and_then(|s| s.parse().ok()),

            max_2d_hits: raw.usize_val("max2Dhits", 10_000),
            clustering_uses_deconv_combo: raw.bool_val("clustering_flag", false),
            deconvolution_enabled: raw.bool_val("deconvolution_flag", false),
            n_samples,
            pedestal_mode: raw.bool_val("pedestal_mode", false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\
layer 1
nstripsU 256
nstripsV 256
uangle 30.0
vangle -30.0
upitch 0.4
vpitch 0.4
chanmap 1 2 3 0 0 U 0 0 0
";

    #[test]
    fn missing_mandatory_key_is_reported() {
        let err = ModuleConfig::from_text("nstripsU 256\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::ConfigMissing {
                key: "layer".to_string()
            }
        );
    }

    #[test]
    fn defaults_fill_in_everything_else() {
        let cfg = ModuleConfig::from_text(MINIMAL).unwrap();
        assert_eq!(cfg.geometry.n_strips_u, 256);
        assert!((cfg.threshold_sample - 50.0).abs() < 1e-9);
        assert_eq!(cfg.commonmode_flag, CommonModeFlag::Sorting);
        assert_eq!(cfg.chip_map.entries().len(), 1);
        assert!(!cfg.pedestal_mode);
    }

    #[test]
    fn pedestal_scalar_expands_to_full_strip_array() {
        let mut text = MINIMAL.to_string();
        text.push_str("pedu 100.0\n");
        let cfg = ModuleConfig::from_text(&text).unwrap();
        assert_eq!(cfg.ped_u.len(), 256);
        assert!(cfg.ped_u.iter().all(|&v| (v - 100.0).abs() < 1e-9));
    }

    #[test]
    fn malformed_chanmap_length_is_rejected() {
        let text = "layer 1\nnstripsU 1\nnstripsV 1\nuangle 0\nvangle 90\nupitch 1\nvpitch 1\nchanmap 1 2 3\n";
        let err = ModuleConfig::from_text(text).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigParse { key, .. } if key == "chanmap"));
    }
}
