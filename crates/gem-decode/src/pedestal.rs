//! Per-strip pedestal/RMS table and per-chip gain (spec §3, §4.5).

use crate::geometry::Axis;

/// Per-strip expected baseline (pedestal mean) and noise (RMS), one array per
/// axis, plus per-chip gain. Read-only after configuration (spec §5).
#[derive(Debug, Clone)]
pub struct PedestalTable {
    mean_u: Vec<f64>,
    mean_v: Vec<f64>,
    rms_u: Vec<f64>,
    rms_v: Vec<f64>,
    /// Per-chip gain, indexed by dense chip index.
    chip_gain: Vec<f64>,
    /// Module-wide scalar gain multiplier applied to every chip's gain.
    module_gain: f64,
}

impl PedestalTable {
    pub fn new(
        mean_u: Vec<f64>,
        mean_v: Vec<f64>,
        rms_u: Vec<f64>,
        rms_v: Vec<f64>,
        chip_gain: Vec<f64>,
        module_gain: f64,
    ) -> Self {
        Self {
            mean_u,
            mean_v,
            rms_u,
            rms_v,
            chip_gain,
            module_gain,
        }
    }

    pub fn mean(&self, axis: Axis, strip: usize) -> f64 {
        match axis {
            Axis::U => self.mean_u.get(strip).copied().unwrap_or(0.0),
            Axis::V => self.mean_v.get(strip).copied().unwrap_or(0.0),
        }
    }

    pub fn rms(&self, axis: Axis, strip: usize) -> f64 {
        match axis {
            Axis::U => self.rms_u.get(strip).copied().unwrap_or(0.0),
            Axis::V => self.rms_v.get(strip).copied().unwrap_or(0.0),
        }
    }

    /// Effective gain for `dense_chip_index`: per-chip gain times the
    /// module-wide scalar multiplier.
    pub fn gain(&self, dense_chip_index: usize) -> f64 {
        self.chip_gain
            .get(dense_chip_index)
            .copied()
            .unwrap_or(1.0)
            * self.module_gain
    }

    pub fn n_strips(&self, axis: Axis) -> usize {
        match axis {
            Axis::U => self.mean_u.len(),
            Axis::V => self.mean_v.len(),
        }
    }
}

/// Build a per-strip array from a config value that may have been given as a
/// single scalar (applies to all strips), a per-chip vector (one value per
/// 128-strip chip span), or a full per-strip vector — disambiguated by
/// length against `n_strips`, per spec §4.5.
pub fn expand_per_strip(values: &[f64], n_strips: usize) -> Vec<f64> {
    if values.is_empty() {
        return vec![0.0; n_strips];
    }
    if values.len() == n_strips {
        return values.to_vec();
    }
    if values.len() == 1 {
        return vec![values[0]; n_strips];
    }
    // Per-chip: one value per 128-channel chip, broadcast across that chip's strips.
    let mut out = Vec::with_capacity(n_strips);
    for strip in 0..n_strips {
        let chip = strip / 128;
        out.push(values.get(chip).copied().unwrap_or(0.0));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_scalar_broadcasts() {
        let out = expand_per_strip(&[3.5], 10);
        assert_eq!(out, vec![3.5; 10]);
    }

    #[test]
    fn expand_full_length_passes_through() {
        let v: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert_eq!(expand_per_strip(&v, 10), v);
    }

    #[test]
    fn expand_per_chip_broadcasts_within_chip() {
        let out = expand_per_strip(&[1.0, 2.0], 256);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[127], 1.0);
        assert_eq!(out[128], 2.0);
        assert_eq!(out[255], 2.0);
    }

    #[test]
    fn gain_combines_chip_and_module_factor() {
        let table = PedestalTable::new(vec![], vec![], vec![], vec![], vec![2.0, 3.0], 1.5);
        assert!((table.gain(0) - 3.0).abs() < 1e-12);
        assert!((table.gain(1) - 4.5).abs() < 1e-12);
        assert!((table.gain(99) - 1.5).abs() < 1e-12);
    }
}
