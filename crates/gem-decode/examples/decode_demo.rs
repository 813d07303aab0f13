//! Example demonstrating a single-event decode through `Module`.
//!
//! This builds a minimal two-chip module in memory (one U chip, one V
//! chip) and decodes one event with a matching pulse on both axes,
//! printing the resulting clusters and hits.

use std::collections::HashMap;

use gem_decode::chanmap::APV_CHANNELS;
use gem_decode::config::ModuleConfig;
use gem_decode::module::Module;
use gem_decode::raw::EventSource;

const CONFIG_TEXT: &str = "\
layer 1
nstripsU 256
nstripsV 256
uangle 30.0
vangle -30.0
upitch 0.4
vpitch 0.4
apvmap mc
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

struct InMemoryEvent {
    data: HashMap<(u32, u32, u32), Vec<u32>>,
}

impl InMemoryEvent {
    fn empty() -> Self {
        Self { data: HashMap::new() }
    }

    fn with_chip(mut self, chip_id: u32, peak_channel: u32, samples: &[u32]) -> Self {
        for c in 0..APV_CHANNELS as u32 {
            let flat = chip_id * APV_CHANNELS as u32 + c;
            let values = if c == peak_channel {
                samples.to_vec()
            } else {
                vec![0u32; samples.len()]
            };
            self.data.insert((0, 0, flat), values);
        }
        self
    }
}

impl EventSource for InMemoryEvent {
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

fn main() {
    println!("gem-decode single-event demo\n");

    let config = ModuleConfig::from_text(CONFIG_TEXT).expect("valid config");
    let mut module = Module::new("demo-module", config).expect("non-degenerate U/V axes");
    module.begin_run(1);

    let samples = [5u32, 60, 180, 220, 140, 40];
    let event = InMemoryEvent::empty()
        .with_chip(0, 50, &samples)
        .with_chip(1, 50, &samples);

    let decoded = module.decode_event(&event, None, None, None);
    module.end_run();

    println!(
        "U strips kept: {}  V strips kept: {}",
        decoded.u_strips.iter().filter(|s| s.keep).count(),
        decoded.v_strips.iter().filter(|s| s.keep).count(),
    );
    println!(
        "U clusters kept: {}  V clusters kept: {}",
        decoded.u_clusters.iter().filter(|c| c.keep).count(),
        decoded.v_clusters.iter().filter(|c| c.keep).count(),
    );
    for hit in decoded.hits.iter().filter(|h| h.keep) {
        println!(
            "hit: x={:.3} y={:.3} energy={:.1} asymmetry={:.3} highquality={}",
            hit.x, hit.y, hit.energy, hit.asymmetry, hit.highquality
        );
    }
}
