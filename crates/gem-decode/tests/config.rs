use gem_decode::config::{ConfigError, ModuleConfig};

const BASE: &str = "\
layer 3
nstripsU 128
nstripsV 128
uangle 0.0
vangle 90.0
upitch 0.4
vpitch 0.4
chanmap 0 0 0 0 0 U 0 0 0\n0 0 1 0 0 V 1 0 0
";

#[test]
fn missing_required_geometry_key_is_a_fatal_config_missing() {
    let err = ModuleConfig::from_text("nstripsU 128\n").unwrap_err();
    assert_eq!(err, ConfigError::ConfigMissing { key: "layer".to_string() });
}

#[test]
fn per_chip_gain_vectors_are_kept_distinct_per_axis() {
    let mut text = BASE.to_string();
    text.push_str("ugain 1.1\nvgain 0.9\n");
    let config = ModuleConfig::from_text(&text).unwrap();
    assert_eq!(config.u_gain, vec![1.1]);
    assert_eq!(config.v_gain, vec![0.9]);
}

#[test]
fn commonmode_params_fall_back_to_documented_defaults() {
    let config = ModuleConfig::from_text(BASE).unwrap();
    assert_eq!(config.commonmode_params.min_strips_in_range, 10);
    assert!((config.commonmode_params.rms_conversion_factor - (config.n_samples as f64).sqrt()).abs() < 1e-9);
}

#[test]
fn unknown_axis_tag_in_chanmap_is_rejected() {
    let text = "layer 1\nnstripsU 1\nnstripsV 1\nuangle 0\nvangle 90\nupitch 1\nvpitch 1\nchanmap 0 0 0 0 0 Q 0 0 0\n";
    let err = ModuleConfig::from_text(text).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigParse { key, .. } if key == "chanmap"));
}

#[test]
fn pedestal_mode_defaults_to_off() {
    let config = ModuleConfig::from_text(BASE).unwrap();
    assert!(!config.pedestal_mode);
}
