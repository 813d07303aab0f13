use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets::NOTHING, Cell, ContentArrangement, Table};

use gem_decode::config::ModuleConfig;

pub fn run(config_path: &Path) -> Result<()> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("reading config {}", config_path.display()))?;
    let config = ModuleConfig::from_text(&text)
        .with_context(|| format!("parsing config {}", config_path.display()))?;

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![Cell::new("key"), Cell::new("value")]);

    let rows: Vec<(&str, String)> = vec![
        ("layer", config.geometry.layer.to_string()),
        ("n_strips_u", config.geometry.n_strips_u.to_string()),
        ("n_strips_v", config.geometry.n_strips_v.to_string()),
        ("u_angle_rad", format!("{:.4}", config.geometry.u_angle_rad)),
        ("v_angle_rad", format!("{:.4}", config.geometry.v_angle_rad)),
        ("u_pitch", config.geometry.u_pitch.to_string()),
        ("v_pitch", config.geometry.v_pitch.to_string()),
        ("chip_map entries", config.chip_map.entries().len().to_string()),
        ("apv_map family", format!("{:?}", config.chip_map.family())),
        ("n_samples", config.n_samples.to_string()),
        ("commonmode_flag", format!("{:?}", config.commonmode_flag)),
        ("zero_suppress", config.zero_suppress.to_string()),
        ("pedestal_mode", config.pedestal_mode.to_string()),
        ("max_2d_hits", config.max_2d_hits.to_string()),
    ];
    for (key, value) in rows {
        table.add_row(vec![Cell::new(key), Cell::new(value)]);
    }

    println!("{table}");
    println!("{}: OK ({} chips mapped)", config_path.display(), config.chip_map.entries().len());
    Ok(())
}
