//! A trace recorder and optimiser for a lazy functional language's bytecode interpreter.
//!
//! The interpreter drives a [Recorder] through one iteration of a hot loop; the recorder turns
//! the bytecode executed into a linear SSA [Trace], specialised on the values seen and protected
//! by guards, which a code generator can then compile.

#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::new_without_default)]

mod errors;
pub mod heapinfo;
pub mod interp;
pub mod ir;
mod jitstate;
mod log;
mod opt;
mod record;
mod slots;
pub mod snapshot;
#[cfg(test)]
mod testing;
mod trace;

pub use errors::{AbortReason, RecordingError};
pub use log::{Log, Verbosity};
pub use opt::OptFlags;
pub use record::{Progress, Recorder, RecorderBuilder, RecorderState, DEFAULT_MAX_SNAPSHOTS};
pub use trace::Trace;
