//! Per-module decode and reconstruction engine for GEM tracking-detector
//! readout.
//!
//! A GEM module reads out two orthogonal strip axes (`U` and `V`) through
//! APV25 front-end chips, each sampling 128 channels `N` times per trigger.
//! [`module::Module`] is the single entry point: feed it one event through
//! the [`raw::EventSource`] trait and it walks every mapped chip, applies
//! pedestal subtraction and common-mode correction, deconvolves and
//! zero-suppresses the surviving strips, clusters each axis, and crosses
//! `U`/`V` clusters into 2D hits.
//!
//! ```
//! use gem_decode::config::ModuleConfig;
//! use gem_decode::module::Module;
//!
//! const CONFIG: &str = "\
//! layer 1
//! nstripsU 256
//! nstripsV 256
//! uangle 30.0
//! vangle -30.0
//! upitch 0.4
//! vpitch 0.4
//! chanmap 0 0 0 0 0 U 0 0 0\n0 0 1 0 0 V 1 0 0
//! ";
//!
//! let config = ModuleConfig::from_text(CONFIG).expect("valid config");
//! let module = Module::new("module-1", config).expect("non-degenerate axes");
//! assert_eq!(module.name(), "module-1");
//! ```
//!
//! Decoding one event:
//!
//! ```
//! use gem_decode::config::ModuleConfig;
//! use gem_decode::module::Module;
//! use gem_decode::raw::EventSource;
//!
//! # const CONFIG: &str = "\
//! # layer 1
//! # nstripsU 256
//! # nstripsV 256
//! # uangle 30.0
//! # vangle -30.0
//! # upitch 0.4
//! # vpitch 0.4
//! # chanmap 0 0 0 0 0 U 0 0 0\n0 0 1 0 0 V 1 0 0
//! # ";
//! struct NoHits;
//! impl EventSource for NoHits {
//!     fn num_hits(&self, _crate_id: u32, _slot: u32, _channel: u32) -> usize { 0 }
//!     fn raw_data(&self, _crate_id: u32, _slot: u32, _channel: u32, _index: usize) -> u32 { 0 }
//!     fn data(&self, _crate_id: u32, _slot: u32, _channel: u32, _index: usize) -> u32 { 0 }
//!     fn event_number(&self) -> u64 { 1 }
//! }
//!
//! let config = ModuleConfig::from_text(CONFIG).unwrap();
//! let mut module = Module::new("module-1", config).unwrap();
//! let decoded = module.decode_event(&NoHits, None, None, None);
//! assert!(decoded.hits.is_empty());
//! ```
//!
//! Persistent calibration (pedestal means/RMS, gain, the chip map) and the
//! per-event decode knobs all come from one [`config::ModuleConfig`], loaded
//! from a plain key/value text format via [`config::ModuleConfig::from_text`]
//! — there is no binary calibration database in this crate; the collaborator
//! owns that and renders it to text before a run starts.
//!
//! Diagnostics are opt-in: [`histsink::HistogramSink`] is a narrow trait a
//! caller implements to receive named fills (`hit_xy`, `cm_residual`,
//! `negative_cluster_sum`, ...); [`histsink::NullHistogramSink`] (the
//! default) discards everything, so a caller who doesn't care about
//! diagnostics pays no cost for them.

mod binutil;
pub mod chanmap;
pub mod cluster1d;
pub mod commonmode;
pub mod config;
pub mod geometry;
pub mod histsink;
pub mod hit2d;
pub mod module;
pub mod pedestal;
pub mod raw;
pub mod strip;

pub use binutil::RawEventError;
pub use config::{ConfigError, ModuleConfig};
pub use module::{DecodedEvent, Module};
pub use raw::{EventSource, RawEvent};
