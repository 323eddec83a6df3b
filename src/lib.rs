//! `gpmf-frames` decodes GoPro GPMF telemetry into time-indexed frame stores.
//!
//! This crate provides:
//! - A KLV container decoder ([`gpmf`]) and a type interpreter ([`interpret`])
//!   that turns leaf payloads into typed, scaled values.
//! - A visitor protocol ([`visit`]) for walking the decoded tree.
//! - Per-sample timing ([`timing`]), from a shutter-stream anchor or from a
//!   sample-rate regression against video frame timing.
//! - A GPS lock filter chain ([`filters`]).
//! - [`FrameMeta`], an interpolating store keyed by stream time, with
//!   windowed views and in-place processing passes ([`process`]).
//! - A Tokio-based async `Stream` wrapper (enabled by default) that runs the
//!   extraction passes in parallel.
//!
//! ## Quick start (sync)
//! - Read a raw metadata stream and extract the merged GPS store with
//!   [`load_from_path`] or [`parse_gopro`].
//!
//! ## Quick start (async)
//! - Use [`stores_from_bytes`] to get a Tokio `Stream` of per-kind stores.
//!
//! ## Features
//! - `async` (default): enables Tokio stream helpers.

pub mod error;

pub mod config;
pub mod diagnostics;
pub mod entry;
pub mod extract;
pub mod filters;
pub mod framemeta;
pub mod gpmf;
pub mod interpret;
pub mod logging;
pub mod point;
pub mod process;
pub mod streams;
pub mod timeunit;
pub mod timing;
pub mod visit;

#[cfg(feature = "async")]
pub mod async_extract;

pub use config::{GpsFilterSettings, LoadFlags, Speed, SpeedUnit, VideoStreamMeta};
pub use diagnostics::{Diagnostics, LogDiagnostics, NullDiagnostics, SharedDiagnostics, Source};
pub use entry::{Entry, Field, FieldValue, Updates};
pub use extract::{
    extract, for_each_entry, load_from_path, load_from_reader, merge, parse_gopro, ExtractOptions, Extraction,
    StreamKind,
};
pub use filters::{GpsLockComponents, GpsLockFilter, ReasonCounter};
pub use framemeta::{FrameMeta, View, Window};
pub use gpmf::{FourCC, Gpmd, RawRecord};
pub use interpret::{GpsFix, Value};
pub use point::{BoundingBox, Point, Point3, Quaternion};
pub use timeunit::Timeunit;
pub use visit::Visitor;

pub use error::Error;

#[cfg(feature = "async")]
pub use async_extract::{stores_from_bytes, stores_from_path};
