//! The optimiser.
//!
//! Every instruction the recorder (or the loop unroller) wants to append is first passed, as a
//! *fold candidate*, through [JitState::emit], which tries in order:
//!
//!   1. peephole folding (see [fold]);
//!   2. for `fload`s, store-to-load forwarding;
//!   3. common subexpression elimination;
//!
//! before appending the instruction to the trace. Allocations, stores and control instructions
//! are never deduplicated, and slot / result loads are only ever folded by the slot table
//! peephole: an untracked slot always gets a fresh load.
//!
//! After recording, the loop is closed by [unroll] and the trace cleaned up by [dce].

use crate::{
    errors::{internal_error, RecordingError},
    interp::Word,
    ir::{IRRef, IrIns, IrOp, IrTy, LitKind, OpClass},
    jitstate::JitState,
};

mod cse;
pub(crate) mod dce;
mod flags;
mod fold;
pub(crate) mod unroll;

pub use flags::OptFlags;

/// The outcome of trying to fold a candidate.
pub(crate) enum FoldResult {
    /// The candidate has no effect and should not be emitted.
    NoOp,
    /// The candidate is equivalent to an existing instruction or constant.
    Ref(IRRef),
    /// The candidate could not be folded.
    Emit,
}

impl JitState {
    /// Optimise and (if needed) append the instruction `op op1 op2` of type `ty`. Returns `None`
    /// if the instruction was optimised away entirely.
    pub(crate) fn emit(
        &mut self,
        op: IrOp,
        ty: IrTy,
        op1: u16,
        op2: u16,
    ) -> Result<Option<IRRef>, RecordingError> {
        let ins = IrIns::new(op, ty, op1, op2);
        if self.flags.fold() {
            match self.fold(&ins)? {
                FoldResult::NoOp => {
                    self.counts.folded += 1;
                    return Ok(None);
                }
                FoldResult::Ref(r) => {
                    self.counts.folded += 1;
                    return Ok(Some(r));
                }
                FoldResult::Emit => (),
            }
        }
        let r = match op.class() {
            OpClass::Alloc | OpClass::Store | OpClass::Control => self.emit_ins(ins)?,
            OpClass::Load => match op {
                IrOp::FLoad if self.flags.fwd() => match self.forward(&ins) {
                    Some(r) => r,
                    None => self.cse(ins)?,
                },
                IrOp::FLoad | IrOp::ILoad => self.cse(ins)?,
                _ => self.emit_ins(ins)?,
            },
            OpClass::Normal | OpClass::Guard => self.cse(ins)?,
            OpClass::Constant => {
                return Err(internal_error(format!(
                    "constant {} passed to the optimiser",
                    op.mnemonic()
                )))
            }
        };
        Ok(Some(r))
    }

    /// As [Self::emit], for instructions whose value is needed.
    pub(crate) fn emit_val(
        &mut self,
        op: IrOp,
        ty: IrTy,
        op1: IRRef,
        op2: u16,
    ) -> Result<IRRef, RecordingError> {
        self.emit(op, ty, op1.raw(), op2)?.ok_or_else(|| {
            internal_error(format!("{} {op1} folded to nothing", op.mnemonic()))
        })
    }

    /// Emit a guard that `r` is the word constant `w` of kind `kind`.
    pub(crate) fn guard_eq_kword(
        &mut self,
        r: IRRef,
        w: Word,
        kind: LitKind,
    ) -> Result<(), RecordingError> {
        let k = self.intern_word(w, kind)?;
        self.emit(IrOp::Eq, IrTy::Void, r.raw(), k.raw())?;
        Ok(())
    }
}
