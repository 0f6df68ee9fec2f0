//! This crate parses raw crash report text and symbolicates it: every raw
//! memory address in every stack frame is resolved to a human-readable
//! symbol string, using externally supplied debug-symbol archives and
//! external address-resolution tools (`atos`, `dwarfdump`,
//! `symbolicatecrash`).
//!
//! The pieces, leaves first:
//!
//!  - [`subprocess`]: launches the external tools and narrowly parses their
//!    stdout. The [`subprocess::CommandRunner`] trait is the seam tests (and
//!    unusual callers) substitute.
//!  - [`queue`]: a bounded FIFO task queue (ceiling 4 by default) with
//!    cooperative cancellation, on which all tool invocations run.
//!  - [`parser`]: format detection and structural parsing of report text
//!    into a [`crash::Crash`].
//!  - [`registry`]: the UUID → symbol-archive mapping, populated by
//!    importing archives and queried during symbolication.
//!  - [`symbolicate`]: the per-format backends that batch frame addresses,
//!    fan them out over the queue, and deliver the finished crash through a
//!    delegate callback.
//!
//! There is no hidden global state: a caller constructs one
//! [`queue::TaskQueue`], one [`registry::DsymRegistry`], and one
//! [`subprocess::SystemCommandRunner`] at startup and threads them through.
//! Symbolication is best effort; the only synchronous failures are
//! unrecognized input and rejected archive imports (see [`error::Error`]).

pub mod crash;
pub mod error;
pub mod parser;
pub mod queue;
pub mod registry;
pub mod subprocess;
pub mod symbolicate;

pub use crash::{BinaryImage, Crash, CrashType, Frame, Thread};
pub use error::Error;
pub use parser::{detect_crash_type, parse, try_parse};
pub use queue::{CancellationToken, TaskHandle, TaskQueue, DEFAULT_CONCURRENCY};
pub use registry::{DsymRegistry, SymbolArchive};
pub use subprocess::{CommandRunner, SystemCommandRunner};
pub use symbolicate::{
    backend_for_type, AtosSymbolicator, FullReportSymbolicator, SymDelegate, SymbolicationHandle,
    Symbolicator,
};
