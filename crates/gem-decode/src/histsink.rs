//! Diagnostic histogram sink (spec §6, §9): the core never links a specific
//! histogram library. Callers implement [`HistogramSink`] against whatever
//! backend they use (an in-memory accumulator for tests, a real scientific
//! histogram file writer for production).

/// A named 1D histogram fill target. The core calls `fill` once per
/// observation during decode and `finish` once at run end; it never reads
/// the accumulated values back.
pub trait HistogramSink {
    fn fill(&mut self, name: &str, value: f64);

    /// Fill a 2D observation (e.g. hit position, asymmetry-vs-energy).
    fn fill_2d(&mut self, name: &str, x: f64, y: f64) {
        let _ = (name, x, y);
    }

    /// Flush accumulated histograms to their persistent form (spec §6:
    /// "diagnostic histograms written at run end to a binary scientific
    /// histogram file"). Default is a no-op for sinks with nothing to flush.
    fn finish(&mut self) {}
}

/// A sink that discards every fill; the default when no diagnostics are
/// wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHistogramSink;

impl HistogramSink for NullHistogramSink {}

/// In-memory sink used by tests and the CLI's `--dump-histograms` mode:
/// keeps every fill in insertion order per named histogram.
#[derive(Debug, Default, Clone)]
pub struct RecordingHistogramSink {
    pub fills: std::collections::HashMap<String, Vec<f64>>,
    pub fills_2d: std::collections::HashMap<String, Vec<(f64, f64)>>,
    pub finished: bool,
}

impl HistogramSink for RecordingHistogramSink {
    fn fill(&mut self, name: &str, value: f64) {
        self.fills.entry(name.to_string()).or_default().push(value);
    }

    fn fill_2d(&mut self, name: &str, x: f64, y: f64) {
        self.fills_2d.entry(name.to_string()).or_default().push((x, y));
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl RecordingHistogramSink {
    pub fn mean(&self, name: &str) -> Option<f64> {
        let values = self.fills.get(name)?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn rms(&self, name: &str) -> Option<f64> {
        let values = self.fills.get(name)?;
        if values.is_empty() {
            return None;
        }
        let mean = self.mean(name)?;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        Some(var.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_tracks_mean_and_rms() {
        let mut sink = RecordingHistogramSink::default();
        for v in [-1.0, 0.0, 1.0] {
            sink.fill("residual", v);
        }
        assert!((sink.mean("residual").unwrap() - 0.0).abs() < 1e-12);
        assert!((sink.rms("residual").unwrap() - (2.0_f64 / 3.0).sqrt()).abs() < 1e-9);
        sink.finish();
        assert!(sink.finished);
    }

    #[test]
    fn null_sink_accepts_fills_without_panicking() {
        let mut sink = NullHistogramSink;
        sink.fill("anything", 1.0);
        sink.fill_2d("pos", 1.0, 2.0);
        sink.finish();
    }
}
