use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets::NOTHING, Cell, ContentArrangement, Table};

use gem_decode::config::ModuleConfig;

/// Summarize a module config's pedestal/RMS arrays: per-axis mean and RMS
/// over all strips, plus the first few individual strip values so an
/// obviously-misloaded calibration (all zero, wrong length) is easy to spot.
pub fn run(config_path: &Path) -> Result<()> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("reading config {}", config_path.display()))?;
    let config = ModuleConfig::from_text(&text)
        .with_context(|| format!("parsing config {}", config_path.display()))?;

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("axis"),
        Cell::new("n_strips"),
        Cell::new("mean(ped)"),
        Cell::new("mean(rms)"),
        Cell::new("first 4 ped"),
        Cell::new("first 4 rms"),
    ]);

    for (axis, ped, rms) in [
        ("U", &config.ped_u, &config.rms_u),
        ("V", &config.ped_v, &config.rms_v),
    ] {
        let n = ped.len();
        let mean_ped = if n == 0 { 0.0 } else { ped.iter().sum::<f64>() / n as f64 };
        let mean_rms = if n == 0 { 0.0 } else { rms.iter().sum::<f64>() / n as f64 };
        let preview = |v: &[f64]| {
            v.iter()
                .take(4)
                .map(|x| format!("{x:.1}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        table.add_row(vec![
            Cell::new(axis),
            Cell::new(n),
            Cell::new(format!("{mean_ped:.2}")),
            Cell::new(format!("{mean_rms:.2}")),
            Cell::new(preview(ped)),
            Cell::new(preview(rms)),
        ]);
    }

    println!("{table}");
    Ok(())
}
