//! Stress log core library
//!
//! A lock-light, per-thread, memory-mapped circular log for recording
//! diagnostic messages under load without perturbing the program that
//! writes them.
//!
//! # Key Components
//!
//! - **Registry** ([`StressLog`]): owns the store, the per-thread logs, the
//!   byte budgets and the module table; the write entry point
//! - **Thread logs**: a ring of fixed-size chunks per thread, written right
//!   to left, wrapping over the oldest data once the budget is spent
//! - **Store**: one position-independent region (anonymous memory or a
//!   mapped file) with a self-describing header and an embedded copy of
//!   every format string
//! - **Reader** ([`StoreImage`], [`ReadCursor`]): bounds-checked, read-only
//!   walk over a snapshot or store file
//!
//! # Example
//!
//! ```
//! use stresslog_core::facility::{LF_GC, LL_INFO10};
//! use stresslog_core::{StoreImage, StressLog, StressLogConfig, stress_log};
//!
//! let log = StressLog::initialize(StressLogConfig::default())?;
//! stress_log!(log, LF_GC, LL_INFO10, "collected %d bytes\n", 4096u64);
//!
//! let snapshot = log.snapshot();
//! let image = StoreImage::parse(&snapshot)?;
//! assert_eq!(image.logs().count(), 1);
//! # Ok::<(), stresslog_core::StressLogError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod chunk;
pub mod clock;
pub mod config;
pub mod error;
pub mod facility;
pub mod host;
pub mod layout;
mod macros;
pub mod messages;
mod modules;
pub mod reader;
pub mod record;
mod region;
mod registry;
mod thread_log;

pub use clock::{ManualTicks, MonotonicTicks, TickSource};
pub use config::StressLogConfig;
pub use error::{Result, StressLogError};
pub use facility::Facility;
pub use host::{CantAllocRegion, Host, StdHost};
pub use layout::{ModuleDesc, StoreHeader};
pub use macros::StressArg;
pub use modules::{FormatSite, ModuleId};
pub use reader::{Corruption, LogView, ReadCursor, RecordAt, StoreImage};
pub use record::RecordView;
pub use registry::{StressLog, StressLogBuilder, StressLogStats};
