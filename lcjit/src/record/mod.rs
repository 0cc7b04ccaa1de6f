//! The trace recorder.
//!
//! An interpreter that has found a hot loop head creates a recording session with
//! [Recorder::start] and then calls [Recorder::advance] before executing each bytecode
//! instruction. The first pass through the loop head only arms the recorder; instructions are
//! recorded from the second time the loop head is reached until the third, at which point the
//! loop is closed, optimised and handed back as a [Trace].

use crate::{
    errors::{internal_error, RecordingError},
    interp::{BcIns, ExecContext, Pc},
    ir::{IRRef, IrOp, IrTy},
    jitstate::{JitConfig, JitState},
    log::{
        log_ir, should_log_ir,
        stats::{Counter, Stats},
        IRPhase, Log, Verbosity,
    },
    opt::OptFlags,
    trace::{IrDump, Trace},
    AbortReason,
};
use std::{error::Error, time::Instant};

mod ins;

/// The default maximum number of snapshots a trace may have.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 500;

/// Configure a [Recorder].
pub struct RecorderBuilder {
    opt_flags: OptFlags,
    max_trace_len: usize,
    max_snapshots: usize,
    log: Option<Log>,
}

impl RecorderBuilder {
    /// Create a recorder builder with default parameters.
    pub fn new() -> Self {
        Self {
            opt_flags: OptFlags::default(),
            max_trace_len: usize::MAX,
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            log: None,
        }
    }

    /// Select which optimisations are applied.
    pub fn opt_flags(mut self, opt_flags: OptFlags) -> Self {
        self.opt_flags = opt_flags;
        self
    }

    /// Abort traces with more than `max_trace_len` instructions.
    pub fn max_trace_len(mut self, max_trace_len: usize) -> Self {
        self.max_trace_len = max_trace_len;
        self
    }

    /// Abort traces needing more than `max_snapshots` snapshots.
    pub fn max_snapshots(mut self, max_snapshots: usize) -> Self {
        self.max_snapshots = max_snapshots;
        self
    }

    /// Log to `log` rather than to the logger described by `LCD_LOG`.
    pub fn log(mut self, log: Log) -> Self {
        self.log = Some(log);
        self
    }

    /// Consume the `RecorderBuilder` and create a [Recorder].
    pub fn build(self) -> Result<Recorder, Box<dyn Error>> {
        let log = match self.log {
            Some(log) => log,
            None => Log::new()?,
        };
        Ok(Recorder {
            config: JitConfig {
                flags: self.opt_flags,
                max_trace_len: self.max_trace_len,
                max_snapshots: self.max_snapshots,
            },
            log,
            stats: Stats::new(),
            state: RecorderState::Idle,
            jit: None,
            started: None,
        })
    }
}

impl Default for RecorderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a [Recorder] is in its session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RecorderState {
    /// No session has been started.
    Idle,
    /// Waiting for execution to reach the loop head for the first time.
    Armed,
    /// Recording the loop body.
    Recording,
    /// The session has produced a trace or been aborted.
    Finished,
}

/// What the interpreter should do after [Recorder::advance].
pub enum Progress {
    /// Execute the instruction and keep calling [Recorder::advance].
    Continue,
    /// The loop has been closed: recording is over.
    Complete(Box<Trace>),
}

/// Records one trace at a time.
pub struct Recorder {
    config: JitConfig,
    log: Log,
    stats: Stats,
    state: RecorderState,
    /// The trace under construction. Only `Some` while armed or recording.
    jit: Option<JitState>,
    /// When recording proper started.
    started: Option<Instant>,
}

impl Recorder {
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Start a session whose loop head is `start_pc`. Any session in progress is discarded.
    pub fn start<C: ExecContext + ?Sized>(
        &mut self,
        start_pc: Pc,
        ctx: &C,
    ) -> Result<(), RecordingError> {
        if self.jit.is_some() {
            self.abort();
        }
        let jit = JitState::new(start_pc, ctx.top(), &self.config, self.log.clone())?;
        self.jit = Some(jit);
        self.state = RecorderState::Armed;
        self.log
            .log(Verbosity::JITEvent, &format!("start-recording {start_pc}"));
        Ok(())
    }

    /// Inform the recorder that the interpreter is about to execute `ins` at `pc`, with `ctx`
    /// describing its state before doing so.
    ///
    /// If this returns an error, the session is over: nothing recorded so far is kept and the
    /// interpreter must carry on without recording (or, if [RecordingError::is_fatal], stop).
    pub fn advance<C: ExecContext + ?Sized>(
        &mut self,
        pc: Pc,
        ins: &BcIns,
        ctx: &C,
    ) -> Result<Progress, RecordingError> {
        self.dispatch(pc, ins, ctx).inspect_err(|e| self.aborted(e))
    }

    fn dispatch<C: ExecContext + ?Sized>(
        &mut self,
        pc: Pc,
        ins: &BcIns,
        ctx: &C,
    ) -> Result<Progress, RecordingError> {
        match self.state {
            RecorderState::Armed => {
                let start_pc = self.jit_mut()?.start_pc;
                if pc != start_pc {
                    return Ok(Progress::Continue);
                }
                self.state = RecorderState::Recording;
                self.started = Some(Instant::now());
                self.step(pc, ins, ctx)
            }
            RecorderState::Recording => {
                if pc == self.jit_mut()?.start_pc {
                    self.finish()
                } else {
                    self.step(pc, ins, ctx)
                }
            }
            RecorderState::Idle | RecorderState::Finished => {
                Err(internal_error("advance called with no recording in progress"))
            }
        }
    }

    /// Abandon the session in progress, if any.
    pub fn abort(&mut self) {
        if self.jit.is_some() {
            self.discard();
            self.log
                .log(Verbosity::JITEvent, "trace-aborted: abandoned by the interpreter");
        }
    }

    fn jit_mut(&mut self) -> Result<&mut JitState, RecordingError> {
        self.jit
            .as_mut()
            .ok_or_else(|| internal_error("no trace under construction"))
    }

    /// Record one instruction.
    fn step<C: ExecContext + ?Sized>(
        &mut self,
        pc: Pc,
        ins: &BcIns,
        ctx: &C,
    ) -> Result<Progress, RecordingError> {
        let jit = self.jit_mut()?;
        jit.set_pc(pc);
        if jit.need_snap {
            jit.force_snapshot()?;
            jit.need_snap = false;
        }
        jit.record_ins(ins, ctx)?;
        Ok(Progress::Continue)
    }

    /// Close the loop and optimise the trace.
    fn finish(&mut self) -> Result<Progress, RecordingError> {
        let mut jit = self
            .jit
            .take()
            .ok_or_else(|| internal_error("no trace under construction"))?;
        // On error the state is put back so that it is discarded like any other abort.
        if jit.framedepth != 0 {
            let depth = jit.framedepth;
            self.jit = Some(jit);
            return Err(AbortReason::DifferentFrame(depth).into());
        }
        let nloop = match Self::close_loop(&mut jit) {
            Ok(nloop) => nloop,
            Err(e) => {
                self.jit = Some(jit);
                return Err(e);
            }
        };
        jit.counts.flush(&self.stats);
        let dce = jit.flags.dce();
        let trace = Trace::new(jit, nloop, dce);
        if should_log_ir(IRPhase::PostOpt) {
            log_ir(&format!(
                "--- Begin jit-post-opt ---\n{trace}\n--- End jit-post-opt ---\n"
            ));
        }
        self.stats.add(Counter::TraceRecordedOk, 1);
        self.end_session();
        self.log.log(
            Verbosity::JITEvent,
            &format!("stop-recording {}", trace.start_pc()),
        );
        Ok(Progress::Complete(Box::new(trace)))
    }

    fn close_loop(jit: &mut JitState) -> Result<IRRef, RecordingError> {
        // The snapshot for the loop back edge.
        let start_pc = jit.start_pc;
        jit.set_pc(start_pc);
        jit.force_snapshot()?;
        let nloop = jit.emit_raw(IrOp::Loop, IrTy::Void, 0, 0)?;
        jit.nloop = Some(nloop);
        if should_log_ir(IRPhase::Recorded) {
            log_ir(&format!(
                "--- Begin jit-recorded ---\n{}\n--- End jit-recorded ---\n",
                IrDump::of_jit(jit)
            ));
        }
        if jit.flags.unroll() {
            jit.unroll()?;
        }
        if jit.flags.dce() {
            jit.dce()?;
        }
        Ok(nloop)
    }

    /// Throw away the trace under construction after `e`.
    fn aborted(&mut self, e: &RecordingError) {
        self.discard();
        let level = if e.is_fatal() {
            Verbosity::Error
        } else {
            Verbosity::JITEvent
        };
        self.log.log(level, &format!("trace-aborted: {e}"));
    }

    fn discard(&mut self) {
        if let Some(jit) = self.jit.take() {
            jit.counts.flush(&self.stats);
            self.stats.add(Counter::TraceRecordedErr, 1);
        }
        self.end_session();
    }

    fn end_session(&mut self) {
        if let Some(started) = self.started.take() {
            self.stats.recording_duration(started.elapsed());
        }
        self.state = RecorderState::Finished;
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stats.output();
    }
}
