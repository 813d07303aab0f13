use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets::NOTHING, Cell, ContentArrangement, Table};
use unicode_width::UnicodeWidthStr;

use gem_decode::config::ModuleConfig;
use gem_decode::module::Module;
use gem_decode::raw::parse_event;

use crate::wordfile::read_event_frames;

/// Right-pad a label to a target display width, accounting for fullwidth
/// characters in module names (unicode-aware, matching comfy-table's own
/// column measurement).
fn pad_to_width(s: &str, width: usize) -> String {
    let w = UnicodeWidthStr::width(s);
    if w >= width {
        s.to_string()
    } else {
        format!("{}{}", s, " ".repeat(width - w))
    }
}

pub fn run(config_path: &Path, event_path: &Path, verbose: bool) -> Result<()> {
    let config_text = fs::read_to_string(config_path)
        .with_context(|| format!("reading config {}", config_path.display()))?;
    let config = ModuleConfig::from_text(&config_text)
        .with_context(|| format!("parsing config {}", config_path.display()))?;
    let mut module = Module::new(
        config_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string()),
        config,
    )
    .context("building module from config")?;

    let frames = read_event_frames(event_path)?;
    module.begin_run(0);

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("event"),
        Cell::new("u_strip"),
        Cell::new("v_strip"),
        Cell::new("x"),
        Cell::new("y"),
        Cell::new("energy"),
        Cell::new("delta_t"),
    ]);

    for (i, words) in frames.iter().enumerate() {
        let event_number = i as u64;
        let event = match parse_event(words, event_number, 0, &[]) {
            Ok(e) => e,
            Err(err) => {
                if verbose {
                    eprintln!("event {event_number}: malformed frame, skipped: {err}");
                }
                continue;
            }
        };
        let decoded = module.decode_event(&event, None, None, None);
        for hit in decoded.hits.iter().filter(|h| h.keep) {
            let u_cluster = &decoded.u_clusters[hit.u_cluster_index];
            let v_cluster = &decoded.v_clusters[hit.v_cluster_index];
            table.add_row(vec![
                Cell::new(event_number),
                Cell::new(u_cluster.istripmax),
                Cell::new(v_cluster.istripmax),
                Cell::new(format!("{:.3}", hit.x)),
                Cell::new(format!("{:.3}", hit.y)),
                Cell::new(format!("{:.1}", hit.energy)),
                Cell::new(format!("{:.1}", hit.delta_t)),
            ]);
        }
    }
    module.end_run();

    println!("{table}");
    println!(
        "{} {} event(s) from {}",
        pad_to_width("decoded", 10),
        frames.len(),
        event_path.display()
    );
    Ok(())
}
