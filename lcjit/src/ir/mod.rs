//! The trace Intermediate Representation (IR).
//!
//! ## References
//!
//! An [IRRef] is a biased 16-bit index into one conceptual array that is split into two regions:
//!
//!   * The *constant region* holds interned literals. Its references are below [REF_BIAS] and
//!     grow downwards as new constants are interned.
//!   * The *instruction region* holds the recorded operations. Its references start at
//!     [REF_BIAS] (occupied by the `base` instruction) and grow upwards.
//!
//! Thus `ref.is_const()` is a single comparison, and for instructions a higher reference always
//! means "recorded later". Since traces are linear, every operand of an instruction has a lower
//! reference than the instruction itself: CSE and store forwarding rely on this to bound their
//! searches.
//!
//! ## Instruction layout
//!
//! Each instruction ([IrIns]) is 8 bytes: an opcode, a type (which also carries the "PHI" and
//! "mark" flags), two 16-bit operands, and a link to the previous instruction with the same
//! opcode. Whether an operand is a reference or a literal payload depends on the opcode (see
//! [IrOp::op1_kind] and [IrOp::op2_kind]). Integer constants store their 32-bit payload across
//! both operand fields.
//!
//! ## Abbreviations
//!
//!  * `k`: a constant (e.g. `kint`, `kword`).
//!  * `nk`: the lowest constant reference in use.
//!  * `nins`: the next free instruction reference.
//!  * `nloop`: the reference of the `loop` marker.

use std::{fmt, mem};
use strum::{EnumCount, FromRepr};

pub(crate) mod buffer;
mod consts;

pub(crate) use buffer::IrBuffer;
pub use consts::LitKind;

/// The bias separating the constant region (below) from the instruction region (at or above).
pub const REF_BIAS: u16 = 0x8000;
/// The reference of the `base` instruction that starts every trace.
pub const REF_BASE: u16 = REF_BIAS;
/// The reference of the first recorded instruction.
pub const REF_FIRST: u16 = REF_BIAS + 1;

/// A reference to a constant or to an instruction in the IR buffer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct IRRef(u16);

impl IRRef {
    pub(crate) const BASE: IRRef = IRRef(REF_BASE);
    pub(crate) const FIRST: IRRef = IRRef(REF_FIRST);

    /// Reinterpret a raw operand field as a reference.
    pub(crate) fn from_raw(x: u16) -> Self {
        debug_assert_ne!(x, 0);
        IRRef(x)
    }

    /// The raw biased value of this reference.
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Does this reference a constant?
    pub fn is_const(self) -> bool {
        self.0 < REF_BIAS
    }

    /// The reference immediately after this one.
    #[cfg(test)]
    pub(crate) fn next(self) -> IRRef {
        IRRef(self.0 + 1)
    }
}

impl fmt::Display for IRRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const() {
            write!(f, "K{:03}", REF_BIAS - self.0)
        } else {
            write!(f, "{:04}", self.0 - REF_BIAS)
        }
    }
}

/// How an operand field of an instruction should be interpreted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpKind {
    /// The operand is an [IRRef].
    Ref,
    /// The operand is a literal payload.
    Lit,
    /// The operand is unused.
    None,
}

/// The broad class of an opcode, which determines how the optimiser treats it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpClass {
    /// A pure operation that can be folded and CSEd.
    Normal,
    /// A marker or bookkeeping instruction: always emitted verbatim, never deduplicated.
    Control,
    /// An interned literal: lives in the constant region.
    Constant,
    /// A load.
    Load,
    /// A store: has an effect on the heap.
    Store,
    /// A guard: if its condition fails at run-time, execution leaves the trace.
    Guard,
    /// An allocation.
    Alloc,
}

// Define the IR opcodes: one line per opcode giving its name, its printed mnemonic, its class,
// and the kinds of its two operands.
macro_rules! irdef {
    ($($name:ident, $mnemonic:literal, $class:ident, $op1:ident, $op2:ident;)*) => {
        /// An IR opcode.
        #[derive(Clone, Copy, Debug, EnumCount, Eq, FromRepr, Hash, PartialEq)]
        #[repr(u8)]
        pub enum IrOp {
            $($name),*
        }

        impl IrOp {
            /// The name this opcode is printed as.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(IrOp::$name => $mnemonic),*
                }
            }

            pub fn class(self) -> OpClass {
                match self {
                    $(IrOp::$name => OpClass::$class),*
                }
            }

            pub fn op1_kind(self) -> OpKind {
                match self {
                    $(IrOp::$name => OpKind::$op1),*
                }
            }

            pub fn op2_kind(self) -> OpKind {
                match self {
                    $(IrOp::$name => OpKind::$op2),*
                }
            }
        }
    };
}

// Note: the comparisons must come first and in this order: `op ^ 1` inverts a comparison.
irdef! {
    Lt,     "lt",     Guard,    Ref,  Ref;
    Ge,     "ge",     Guard,    Ref,  Ref;
    Le,     "le",     Guard,    Ref,  Ref;
    Gt,     "gt",     Guard,    Ref,  Ref;
    Eq,     "eq",     Guard,    Ref,  Ref;
    Ne,     "ne",     Guard,    Ref,  Ref;
    Nop,    "nop",    Control,  None, None;
    Base,   "base",   Control,  None, None;
    Loop,   "loop",   Control,  None, None;
    Phi,    "phi",    Control,  Ref,  Ref;
    Frame,  "frame",  Control,  Lit,  Lit;
    Ret,    "ret",    Control,  Lit,  None;
    KInt,   "kint",   Constant, Lit,  Lit;
    KWord,  "kword",  Constant, Lit,  None;
    KBaseO, "kbaseo", Constant, Lit,  Lit;
    Add,    "add",    Normal,   Ref,  Ref;
    Sub,    "sub",    Normal,   Ref,  Ref;
    Mul,    "mul",    Normal,   Ref,  Ref;
    SLoad,  "sload",  Load,     Lit,  None;
    RLoad,  "rload",  Load,     None, None;
    FRef,   "fref",   Normal,   Ref,  Lit;
    FLoad,  "fload",  Load,     Ref,  None;
    ILoad,  "iload",  Load,     Ref,  None;
    FStore, "fstore", Store,    Ref,  Ref;
    Update, "update", Store,    Ref,  Ref;
    New,    "new",    Alloc,    Ref,  Lit;
}

impl IrOp {
    /// Is this one of the comparison guards?
    pub fn is_comparison(self) -> bool {
        (self as u8) <= (IrOp::Ne as u8)
    }

    /// The comparison with the opposite outcome.
    pub(crate) fn inverted(self) -> IrOp {
        match self {
            IrOp::Lt => IrOp::Ge,
            IrOp::Ge => IrOp::Lt,
            IrOp::Le => IrOp::Gt,
            IrOp::Gt => IrOp::Le,
            IrOp::Eq => IrOp::Ne,
            IrOp::Ne => IrOp::Eq,
            x => panic!("{x:?} is not a comparison"),
        }
    }

    /// Must an instruction with this opcode be kept even if its value is unused?
    pub fn has_side_effect(self) -> bool {
        match self.class() {
            OpClass::Store | OpClass::Guard => true,
            OpClass::Control => matches!(
                self,
                IrOp::Base | IrOp::Loop | IrOp::Frame | IrOp::Ret
            ),
            OpClass::Normal | OpClass::Constant | OpClass::Load | OpClass::Alloc => false,
        }
    }

    /// Evaluate the comparison `op` on `x` and `y`.
    pub(crate) fn eval_comparison(self, x: i64, y: i64) -> bool {
        match self {
            IrOp::Lt => x < y,
            IrOp::Ge => x >= y,
            IrOp::Le => x <= y,
            IrOp::Gt => x > y,
            IrOp::Eq => x == y,
            IrOp::Ne => x != y,
            x => panic!("{x:?} is not a comparison"),
        }
    }
}

/// The type of the value an instruction produces.
#[derive(Clone, Copy, Debug, EnumCount, Eq, FromRepr, PartialEq)]
#[repr(u8)]
pub enum IrTy {
    /// No value.
    Void,
    /// A value whose type is not (yet) known, e.g. a value loaded from a slot.
    Unk,
    I32,
    U32,
    F32,
    Ptr,
    /// A pointer to an info table.
    Info,
    /// A pointer to a closure.
    Clos,
    /// A program counter.
    Pc,
}

impl fmt::Display for IrTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IrTy::Void => "void",
            IrTy::Unk => "unk",
            IrTy::I32 => "i32",
            IrTy::U32 => "u32",
            IrTy::F32 => "f32",
            IrTy::Ptr => "ptr",
            IrTy::Info => "info",
            IrTy::Clos => "clos",
            IrTy::Pc => "pc",
        };
        write!(f, "{s}")
    }
}

const TY_MASK: u8 = 0x3f;
const TY_PHI: u8 = 0x40;
const TY_MARK: u8 = 0x80;

/// An [IrTy] packed together with the instruction's flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IrType(u8);

impl IrType {
    pub(crate) fn new(ty: IrTy) -> Self {
        IrType(ty as u8)
    }

    pub fn ty(self) -> IrTy {
        match IrTy::from_repr(self.0 & TY_MASK) {
            Some(x) => x,
            None => unreachable!(),
        }
    }

    /// Is this value defined differently in the first and later loop iterations?
    pub fn is_phi(self) -> bool {
        self.0 & TY_PHI != 0
    }

    pub(crate) fn set_phi(&mut self) {
        self.0 |= TY_PHI;
    }

    /// Has dead-code elimination marked this instruction as live?
    pub fn is_marked(self) -> bool {
        self.0 & TY_MARK != 0
    }

    pub(crate) fn set_mark(&mut self) {
        self.0 |= TY_MARK;
    }
}

/// A single IR instruction (or constant).
#[derive(Clone, Copy, Debug)]
pub struct IrIns {
    op1: u16,
    op2: u16,
    /// The previous instruction with the same opcode, or 0 if there is none.
    prev: u16,
    op: IrOp,
    t: IrType,
}

static_assertions::const_assert_eq!(mem::size_of::<IrIns>(), 8);

impl IrIns {
    pub(crate) const NOP: IrIns = IrIns {
        op1: 0,
        op2: 0,
        prev: 0,
        op: IrOp::Nop,
        t: IrType(IrTy::Void as u8),
    };

    pub(crate) fn new(op: IrOp, ty: IrTy, op1: u16, op2: u16) -> Self {
        IrIns {
            op1,
            op2,
            prev: 0,
            op,
            t: IrType::new(ty),
        }
    }

    pub fn op(&self) -> IrOp {
        self.op
    }

    pub fn ty(&self) -> IrTy {
        self.t.ty()
    }

    pub fn irtype(&self) -> IrType {
        self.t
    }

    pub(crate) fn irtype_mut(&mut self) -> &mut IrType {
        &mut self.t
    }

    /// The raw first operand.
    pub fn op1(&self) -> u16 {
        self.op1
    }

    /// The raw second operand.
    pub fn op2(&self) -> u16 {
        self.op2
    }

    /// The first operand as a reference. Only meaningful if `op1_kind() == OpKind::Ref`.
    pub fn op1_ref(&self) -> IRRef {
        IRRef::from_raw(self.op1)
    }

    /// The second operand as a reference. Only meaningful if `op2_kind() == OpKind::Ref`.
    pub fn op2_ref(&self) -> IRRef {
        IRRef::from_raw(self.op2)
    }

    /// The reference-valued operands of this instruction.
    pub fn ref_operands(&self) -> impl Iterator<Item = IRRef> {
        let op1 = (self.op.op1_kind() == OpKind::Ref).then(|| self.op1_ref());
        let op2 = (self.op.op2_kind() == OpKind::Ref).then(|| self.op2_ref());
        op1.into_iter().chain(op2)
    }

    /// Both operands packed into one word: two instructions with the same opcode are equivalent
    /// iff their packed operands are equal.
    pub(crate) fn op12(&self) -> u32 {
        u32::from(self.op1) | (u32::from(self.op2) << 16)
    }

    /// The 32-bit literal payload of a `kint` or `kbaseo` constant.
    pub fn lit_i32(&self) -> i32 {
        self.op12() as i32
    }

    pub(crate) fn set_op2(&mut self, op2: u16) {
        self.op2 = op2;
    }

    pub(crate) fn prev(&self) -> Option<IRRef> {
        (self.prev != 0).then(|| IRRef::from_raw(self.prev))
    }

    pub(crate) fn set_prev(&mut self, prev: Option<IRRef>) {
        self.prev = prev.map(|x| x.raw()).unwrap_or(0);
    }
}

/// Split a 32-bit payload into the two operand fields of a constant.
pub(crate) fn split_i32(x: i32) -> (u16, u16) {
    let x = x as u32;
    (x as u16, (x >> 16) as u16)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ref_display() {
        assert_eq!(IRRef(REF_BIAS).to_string(), "0000");
        assert_eq!(IRRef(REF_BIAS + 12).to_string(), "0012");
        assert_eq!(IRRef(REF_BIAS - 3).to_string(), "K003");
        assert!(IRRef(REF_BIAS - 1).is_const());
        assert!(!IRRef::BASE.is_const());
    }

    #[test]
    fn comparison_inversion() {
        for op in [IrOp::Lt, IrOp::Ge, IrOp::Le, IrOp::Gt, IrOp::Eq, IrOp::Ne] {
            assert!(op.is_comparison());
            assert_eq!(IrOp::from_repr(op as u8 ^ 1), Some(op.inverted()));
            assert_eq!(op.inverted().inverted(), op);
            for (x, y) in [(1, 2), (2, 2), (3, 2)] {
                assert_ne!(op.eval_comparison(x, y), op.inverted().eval_comparison(x, y));
            }
        }
        assert!(!IrOp::Nop.is_comparison());
    }

    #[test]
    fn type_flags() {
        let mut t = IrType::new(IrTy::I32);
        assert!(!t.is_phi() && !t.is_marked());
        t.set_phi();
        t.set_mark();
        assert!(t.is_phi() && t.is_marked());
        assert_eq!(t.ty(), IrTy::I32);
    }

    #[test]
    fn payloads() {
        for x in [0, 1, -1, i32::MAX, i32::MIN, 0x1234_5678] {
            let (op1, op2) = split_i32(x);
            assert_eq!(IrIns::new(IrOp::KInt, IrTy::I32, op1, op2).lit_i32(), x);
        }
    }

    #[test]
    fn operands() {
        let i = IrIns::new(IrOp::FRef, IrTy::Ptr, REF_FIRST, 3);
        assert_eq!(i.ref_operands().collect::<Vec<_>>(), vec![IRRef::FIRST]);
        let i = IrIns::new(IrOp::Add, IrTy::I32, REF_FIRST, REF_BIAS - 1);
        assert_eq!(i.ref_operands().count(), 2);
        assert_eq!(IrIns::NOP.ref_operands().count(), 0);
    }

    #[test]
    fn side_effects() {
        assert!(IrOp::FStore.has_side_effect());
        assert!(IrOp::Eq.has_side_effect());
        assert!(IrOp::Frame.has_side_effect());
        assert!(!IrOp::Add.has_side_effect());
        assert!(!IrOp::Phi.has_side_effect());
        assert!(!IrOp::New.has_side_effect());
    }
}
