//! Interning of constants.
//!
//! Every constant lives in the constant region of the [IrBuffer] and is interned: asking for the
//! same literal twice returns the same reference, so references to constants can be compared
//! for equality directly.

use super::{buffer::IrBuffer, split_i32, IRRef, IrIns, IrOp, IrTy};
use crate::{
    errors::{internal_error, RecordingError},
    interp::Word,
    AbortReason,
};
use strum::FromRepr;

/// The kind of a literal in the interpreter's literal tables.
#[derive(Clone, Copy, Debug, Eq, FromRepr, PartialEq)]
#[repr(u8)]
pub enum LitKind {
    Int,
    String,
    Char,
    Word,
    Float,
    /// A pointer to an info table.
    Info,
    /// A pointer to a (static) closure.
    Closure,
    Pc,
}

impl LitKind {
    /// Decode a raw literal kind tag as used by the interpreter.
    pub fn from_raw(x: u8) -> Result<Self, RecordingError> {
        LitKind::from_repr(x).ok_or_else(|| internal_error(format!("unknown literal kind {x}")))
    }

    /// The IR type of a constant of this kind.
    pub fn ir_ty(self) -> IrTy {
        match self {
            LitKind::Int | LitKind::Char => IrTy::I32,
            LitKind::String => IrTy::Ptr,
            LitKind::Word => IrTy::U32,
            LitKind::Float => IrTy::F32,
            LitKind::Info => IrTy::Info,
            LitKind::Closure => IrTy::Clos,
            LitKind::Pc => IrTy::Pc,
        }
    }
}

impl IrBuffer {
    /// Intern the 32-bit integer `x`.
    pub(crate) fn intern_int(&mut self, x: i32) -> Result<IRRef, RecordingError> {
        self.intern_i32_payload(IrOp::KInt, IrTy::I32, x)
    }

    /// Intern the base offset `x`, i.e. a pointer `x` slots from the trace's entry base.
    pub(crate) fn intern_base_offset(&mut self, x: i32) -> Result<IRRef, RecordingError> {
        self.intern_i32_payload(IrOp::KBaseO, IrTy::Ptr, x)
    }

    fn intern_i32_payload(&mut self, op: IrOp, ty: IrTy, x: i32) -> Result<IRRef, RecordingError> {
        let (op1, op2) = split_i32(x);
        let ins = IrIns::new(op, ty, op1, op2);
        if let Some((r, _)) = self
            .chain_iter(op)
            .find(|(_, k)| k.op12() == ins.op12())
        {
            return Ok(r);
        }
        self.push_const(ins)
    }

    /// Intern the word `w`, which is a literal of kind `kind`. The same word interned with two
    /// different kinds yields two different constants.
    pub(crate) fn intern_word(&mut self, w: Word, kind: LitKind) -> Result<IRRef, RecordingError> {
        let ty = kind.ir_ty();
        if let Some((r, _)) = self
            .chain_iter(IrOp::KWord)
            .find(|(_, k)| k.ty() == ty && self.kwords[usize::from(k.op1())] == w)
        {
            return Ok(r);
        }
        let idx = u16::try_from(self.kwords.len())
            .map_err(|_| RecordingError::from(AbortReason::TraceTooLong))?;
        self.kwords.try_reserve(1)?;
        self.kwords.push(w);
        self.push_const(IrIns::new(IrOp::KWord, ty, idx, 0))
    }
}
