//! Stress log decoder
//!
//! Reads a stress log store (a live snapshot or a store file), filters its
//! messages and renders them in global time order. The store is only ever
//! read; every link in it is bounds checked and damage is reported as a
//! warning instead of failing the decode.
//!
//! # Key Components
//!
//! - **Source** ([`StoreFile`]): a read-only mapping or copy of a store
//! - **Filter** ([`MessageFilter`]): time, level, facility, format, thread,
//!   value, GC index and earliest-message selection
//! - **Pipeline** ([`Decoder`]): parallel per-log walk, cross-log filters and
//!   the global sort
//! - **Renderer** ([`Renderer`]): printf-style expansion of format strings
//!   into text or JSON lines
//!
//! # Example
//!
//! ```
//! use stresslog_core::{StoreImage, StressLog, StressLogConfig};
//! use stresslog_decoder::{Decoder, MessageFilter, OutputFormat, Renderer};
//!
//! let log = StressLog::initialize(StressLogConfig::default())?;
//! log.gc_start(1, 2, false);
//! let snapshot = log.snapshot();
//!
//! let image = StoreImage::parse(&snapshot)?;
//! let report = Decoder::new(&image, MessageFilter::new()).decode();
//! assert_eq!(report.messages.len(), 1);
//!
//! let mut out = Vec::new();
//! Renderer::new(&image).write_report(&mut out, &report, OutputFormat::Text, false)?;
//! assert!(String::from_utf8_lossy(&out).contains("BEGINGC 1"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod buffer;
pub mod error;
pub mod filter;
mod gc_epoch;
mod interesting;
pub mod pipeline;
pub mod render;
pub mod roles;
pub mod source;
mod walk;
pub mod work;

pub use error::{DecodeError, Result};
pub use filter::{
    FormatPattern, GcRange, LevelRange, MessageFilter, ThreadSelector, TimeWindow, ValueRange,
};
pub use pipeline::{DecodeOptions, DecodeReport, Decoder, Message};
pub use render::{NoSymbols, OutputFormat, PointerKind, Renderer, SymbolResolver};
pub use roles::{RoleMap, ThreadRole};
pub use source::StoreFile;
pub use work::{MAX_WORKERS, WorkItems, WorkState};
