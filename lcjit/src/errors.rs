//! Errors that can occur while recording a trace.

use std::{collections::TryReserveError, fmt};
use thiserror::Error;

/// A failure to record (or finish) a trace.
#[derive(Error, Debug)]
pub enum RecordingError {
    /// The trace could not be recorded, but the interpreter can carry on safely: it should discard
    /// the trace and continue executing without tracing from the current point.
    #[error("Trace aborted: {0}")]
    Abort(#[from] AbortReason),
    /// Something went wrong that is almost certainly the result of a bug in the recorder itself.
    #[error("Internal error: {0}")]
    InternalError(String),
    /// A buffer could not be grown because memory is exhausted.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(#[from] TryReserveError),
}

impl RecordingError {
    /// Is this error fatal for the whole process (`true`) or just for the current trace (`false`)?
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RecordingError::Abort(_))
    }
}

/// Reasons that recording of a trace can be abandoned.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum AbortReason {
    /// A bytecode instruction the recorder does not (yet) know how to record.
    #[error("unsupported bytecode instruction {0}")]
    UnsupportedInstruction(&'static str),
    /// `EVAL` found an indirection: following indirections is not recorded.
    #[error("evaluation of an indirection")]
    Indirection,
    /// A tail call whose target is not a function of exactly the supplied arity.
    #[error("tail call is not an exact-arity function call")]
    NotExactCall,
    /// A return was recorded without a matching frame pushed inside the trace.
    #[error("return from a frame entered before the trace started")]
    FrameUnderflow,
    /// Simulating a frame push would exhaust the interpreter's stack.
    #[error("stack overflow while simulating a frame push")]
    StackOverflow,
    /// A slot outside the simulated stack window was referenced.
    #[error("slot {0} outside of the recorded stack window")]
    SlotOutOfRange(i32),
    /// The trace being recorded was too long and tracing was aborted.
    #[error("trace too long")]
    TraceTooLong,
    /// More snapshots were needed than are permitted.
    #[error("too many snapshots")]
    TooManySnapshots,
    /// The loop head was reached again in a different frame than the one recording started in.
    #[error("loop closed in a different frame (frame depth {0})")]
    DifferentFrame(i32),
}

/// Helper to create internal errors.
pub(crate) fn internal_error(msg: impl fmt::Display) -> RecordingError {
    RecordingError::InternalError(msg.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fatality() {
        assert!(!RecordingError::from(AbortReason::TraceTooLong).is_fatal());
        assert!(internal_error("x").is_fatal());
        let e = Vec::<u64>::new().try_reserve(usize::MAX).unwrap_err();
        assert!(RecordingError::from(e).is_fatal());
    }

    #[test]
    fn messages() {
        assert_eq!(
            RecordingError::from(AbortReason::UnsupportedInstruction("CALL")).to_string(),
            "Trace aborted: unsupported bytecode instruction CALL"
        );
        assert_eq!(
            internal_error("no PHI for 0004").to_string(),
            "Internal error: no PHI for 0004"
        );
    }
}
