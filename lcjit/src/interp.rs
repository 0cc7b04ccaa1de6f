//! The boundary between the interpreter and the recorder.
//!
//! The interpreter decodes each bytecode instruction into a [BcIns] and hands it, together with a
//! view of its live state (an [ExecContext]), to the recorder before executing it. The recorder
//! only ever reads interpreter state to decide *which* guards and specialisations to emit: no
//! heap objects are created while recording.

use std::fmt;

/// A machine word as stored in stack slots and closure fields.
pub type Word = u64;

/// A signed view of a [Word].
pub type WordInt = i64;

/// A bytecode address, counted in instruction words.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Pc(pub usize);

impl Pc {
    /// The PC `n` instruction words after this one.
    pub fn offset(self, n: usize) -> Pc {
        Pc(self.0 + n)
    }

    /// The signed distance from `base` to `self` in instruction words.
    pub(crate) fn delta_from(self, base: Pc) -> i32 {
        // Traces are bounded far below `i32::MAX` instructions.
        (self.0 as isize - base.0 as isize) as i32
    }

    /// The PC `delta` instruction words from `self`.
    pub(crate) fn with_delta(self, delta: i32) -> Pc {
        Pc((self.0 as isize + delta as isize) as usize)
    }
}

impl fmt::Display for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pc:{:#x}", self.0)
    }
}

/// The number of instruction words taken up by an `EVAL` instruction.
pub const EVAL_INS_WORDS: usize = 2;

/// A decoded bytecode instruction. Operand names follow the interpreter's `A`, `B`, `C`, `D`
/// operand fields: register operands are slot indices relative to the current base.
#[derive(Clone, Debug, PartialEq)]
pub enum BcIns {
    IsLt { a: u8, d: u16 },
    IsGe { a: u8, d: u16 },
    IsLe { a: u8, d: u16 },
    IsGt { a: u8, d: u16 },
    IsEq { a: u8, d: u16 },
    IsNe { a: u8, d: u16 },
    Mov { a: u8, d: u16 },
    /// Move the result of the last evaluation / call into `a`.
    MovRes { a: u8 },
    AddRR { a: u8, b: u8, c: u8 },
    SubRR { a: u8, b: u8, c: u8 },
    MulRR { a: u8, b: u8, c: u8 },
    Jmp,
    /// Load literal number `d` of the current function into `a`.
    LoadK { a: u8, d: u16 },
    /// Load free variable `d` of the current closure (slot -1) into `a`.
    LoadFV { a: u8, d: u16 },
    /// Load field `c` of the closure in `b` into `a`.
    LoadF { a: u8, b: u8, c: u8 },
    Eval { a: u8 },
    /// Tail call the function in `a` with `nargs` arguments.
    CallT { a: u8, nargs: u16 },
    /// Update the thunk in `a` with the value in `d` and return.
    Update { a: u8, d: u16 },
    Ret1 { a: u8 },
    /// Allocate a one-field object with info table `b` and payload `c`.
    Alloc1 { a: u8, b: u8, c: u8 },
    /// Allocate an object with info table `b` and the payload slots `args`.
    Alloc { a: u8, b: u8, args: Vec<u8> },
    Case { a: u8 },
    /// Any instruction the recorder does not handle.
    Unsupported(&'static str),
}

/// What kind of object an info table describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InfoKind {
    /// A constructor with `fields` payload words.
    Constructor { fields: u32 },
    /// A function of `arity` arguments needing a frame of `framesize` slots.
    Function { arity: u32, framesize: u32 },
    /// A partial application.
    Pap,
    /// An unevaluated thunk whose code needs a frame of `framesize` slots.
    Thunk { framesize: u32 },
    /// An indirection to another object.
    Indirection,
    Other,
}

impl InfoKind {
    /// Is an object with this info table in head normal form?
    pub fn is_hnf(&self) -> bool {
        matches!(
            self,
            InfoKind::Constructor { .. } | InfoKind::Function { .. } | InfoKind::Pap
        )
    }
}

/// A read-only view of the interpreter's state at the instruction about to be executed.
pub trait ExecContext {
    /// The value in slot `slot` relative to the current base.
    fn slot(&self, slot: i32) -> Word;

    /// The offset (in slots) of the top of the stack from the current base.
    fn top(&self) -> u32;

    /// The distance (in slots) from the current base back to the caller's base.
    fn caller_base_distance(&self) -> u32;

    /// Is there room for `words` more words above the top of the stack?
    fn stack_has_room(&self, words: u32) -> bool;

    /// The info table of the closure at `closure`.
    fn info_of(&self, closure: Word) -> Word;

    /// The shape of the object described by the info table `info`.
    fn info_kind(&self, info: Word) -> InfoKind;

    /// Literal `idx` of the function being executed: its value and its raw literal kind tag.
    fn literal(&self, idx: u16) -> (Word, u8);

    /// The address of the shared update-closure used in update frames.
    fn update_closure(&self) -> Word;

    /// The PC update frames return to.
    fn update_return_pc(&self) -> Pc;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pc_deltas() {
        let start = Pc(100);
        assert_eq!(Pc(96).delta_from(start), -4);
        assert_eq!(start.with_delta(-4), Pc(96));
        assert_eq!(start.offset(EVAL_INS_WORDS), Pc(102));
        assert_eq!(start.with_delta(Pc(107).delta_from(start)), Pc(107));
    }

    #[test]
    fn hnf() {
        assert!(InfoKind::Constructor { fields: 2 }.is_hnf());
        assert!(InfoKind::Pap.is_hnf());
        assert!(!InfoKind::Thunk { framesize: 3 }.is_hnf());
        assert!(!InfoKind::Indirection.is_hnf());
    }
}
