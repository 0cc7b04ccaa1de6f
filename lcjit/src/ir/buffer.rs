//! The IR buffer: one allocation holding both the constant and the instruction regions.
//!
//! The buffer covers the references `irmin..irmax`. Constants are allocated downwards from
//! [REF_BIAS] and instructions upwards from it, so at all times:
//!
//! ```text
//! irmin <= nk <= REF_BIAS <= nins <= irmax
//! ```
//!
//! Growing either end relocates the live contents within a (possibly new) allocation and adjusts
//! `irmin`/`irmax`: the reference values already handed out never change, only the position in
//! the backing [Vec] that a reference maps to.

use super::{IRRef, IrIns, IrOp, IrTy, REF_BIAS};
use crate::{errors::RecordingError, interp::Word, AbortReason};
use strum::EnumCount;

/// How many instructions the buffer holds when first allocated.
const IR_INITIAL_BUF_SIZE: u32 = 256;
/// The highest value `nins` may take. The last instruction is thus `REF_LIMIT - 1` and the next
/// free reference still fits in an [IRRef].
const REF_LIMIT: u32 = u16::MAX as u32;

pub(crate) struct IrBuffer {
    /// The backing storage: `buf[0]` holds reference `irmin`.
    buf: Vec<IrIns>,
    irmin: u32,
    irmax: u32,
    /// The lowest constant reference in use.
    nk: u32,
    /// The next free instruction reference.
    nins: u32,
    /// The most recent instruction (or constant) for each opcode.
    chain: [Option<IRRef>; IrOp::COUNT],
    /// The payloads of `kword` constants.
    pub(super) kwords: Vec<Word>,
    /// The maximum number of instructions (excluding `base`) the buffer may hold.
    max_ins: u32,
}

impl IrBuffer {
    /// Create a new buffer whose first instruction is `base`.
    pub(crate) fn new(max_ins: usize) -> Result<Self, RecordingError> {
        let mut b = IrBuffer {
            buf: Vec::new(),
            irmin: 0,
            irmax: 0,
            nk: u32::from(REF_BIAS),
            nins: u32::from(REF_BIAS),
            chain: [None; IrOp::COUNT],
            kwords: Vec::new(),
            max_ins: u32::try_from(max_ins).unwrap_or(u32::MAX),
        };
        b.push(IrIns::new(IrOp::Base, IrTy::Ptr, 0, 0))?;
        Ok(b)
    }

    /// The lowest constant reference currently in use.
    pub(crate) fn nk(&self) -> IRRef {
        IRRef::from_raw(self.nk as u16)
    }

    /// The reference the next instruction will be given.
    pub(crate) fn nins(&self) -> IRRef {
        IRRef::from_raw(self.nins as u16)
    }

    /// How many constants are currently interned?
    #[cfg(test)]
    pub(crate) fn consts_len(&self) -> usize {
        (u32::from(REF_BIAS) - self.nk) as usize
    }

    /// How many slots the backing allocation has.
    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        (self.irmax - self.irmin) as usize
    }

    pub(crate) fn ins(&self, r: IRRef) -> &IrIns {
        debug_assert!(u32::from(r.raw()) >= self.nk && u32::from(r.raw()) < self.nins);
        &self.buf[(u32::from(r.raw()) - self.irmin) as usize]
    }

    pub(crate) fn ins_mut(&mut self, r: IRRef) -> &mut IrIns {
        debug_assert!(u32::from(r.raw()) >= self.nk && u32::from(r.raw()) < self.nins);
        &mut self.buf[(u32::from(r.raw()) - self.irmin) as usize]
    }

    /// Iterate, newest first, over every reference with opcode `op`.
    pub(crate) fn chain_iter(&self, op: IrOp) -> ChainIter<'_> {
        ChainIter {
            buf: self,
            next: self.chain[op as usize],
        }
    }

    /// Iterate over the instruction references `from..nins`.
    pub(crate) fn iter_refs_from(&self, from: IRRef) -> impl DoubleEndedIterator<Item = IRRef> {
        (from.raw()..self.nins as u16).map(IRRef::from_raw)
    }

    /// Iterate over every reference in use, constants first.
    pub(crate) fn iter_all_refs(&self) -> impl Iterator<Item = IRRef> {
        (self.nk as u16..self.nins as u16).map(IRRef::from_raw)
    }

    pub(crate) fn kword(&self, idx: u16) -> Word {
        self.kwords[usize::from(idx)]
    }

    /// Append `ins` to the instruction region, linking it into its opcode chain.
    pub(crate) fn push(&mut self, mut ins: IrIns) -> Result<IRRef, RecordingError> {
        let r = self.alloc_ins()?;
        ins.set_prev(self.chain[ins.op() as usize]);
        self.chain[ins.op() as usize] = Some(r);
        *self.ins_mut(r) = ins;
        Ok(r)
    }

    /// Append `ins` to the constant region, linking it into its opcode chain.
    pub(super) fn push_const(&mut self, mut ins: IrIns) -> Result<IRRef, RecordingError> {
        let r = self.alloc_const()?;
        ins.set_prev(self.chain[ins.op() as usize]);
        self.chain[ins.op() as usize] = Some(r);
        *self.ins_mut(r) = ins;
        Ok(r)
    }

    /// Return the next instruction reference, growing the top of the buffer if needed.
    fn alloc_ins(&mut self) -> Result<IRRef, RecordingError> {
        // `base` doesn't count towards the limit.
        if self.nins > u32::from(REF_BIAS) && self.nins - u32::from(REF_BIAS) > self.max_ins {
            return Err(AbortReason::TraceTooLong.into());
        }
        if self.nins >= self.irmax {
            self.grow_top()?;
        }
        let r = self.nins;
        self.nins += 1;
        Ok(IRRef::from_raw(r as u16))
    }

    /// Return the next constant reference, growing the bottom of the buffer if needed.
    fn alloc_const(&mut self) -> Result<IRRef, RecordingError> {
        if self.nk <= self.irmin {
            self.grow_bottom()?;
        }
        self.nk -= 1;
        Ok(IRRef::from_raw(self.nk as u16))
    }

    /// Make room for more instructions.
    fn grow_top(&mut self) -> Result<(), RecordingError> {
        let szins = self.irmax - self.irmin;
        if szins == 0 {
            // A quarter of the initial buffer is reserved for constants.
            self.buf.try_reserve_exact(IR_INITIAL_BUF_SIZE as usize)?;
            self.buf.resize(IR_INITIAL_BUF_SIZE as usize, IrIns::NOP);
            self.irmin = u32::from(REF_BIAS) - IR_INITIAL_BUF_SIZE / 4;
            self.irmax = self.irmin + IR_INITIAL_BUF_SIZE;
            return Ok(());
        }
        let irmax = (self.irmin + 2 * szins).min(REF_LIMIT);
        if irmax <= self.nins {
            return Err(AbortReason::TraceTooLong.into());
        }
        let len = (irmax - self.irmin) as usize;
        self.buf.try_reserve_exact(len - self.buf.len())?;
        self.buf.resize(len, IrIns::NOP);
        self.irmax = irmax;
        Ok(())
    }

    /// Make room for more constants. If more than half of the buffer is free at the top, the
    /// contents are shifted up rather than the buffer being reallocated.
    fn grow_bottom(&mut self) -> Result<(), RecordingError> {
        let szins = self.irmax - self.irmin;
        debug_assert!(szins != 0);
        debug_assert_eq!(self.nk, self.irmin);
        let used = (self.nins - self.irmin) as usize;

        if self.nins + (szins >> 1) < self.irmax {
            // Reference 0 is never handed out.
            let ofs = (szins >> 2).min(self.irmin - 1);
            if ofs == 0 {
                return Err(AbortReason::TraceTooLong.into());
            }
            self.buf.copy_within(0..used, ofs as usize);
            self.irmin -= ofs;
            self.irmax -= ofs;
        } else {
            // Limit bottom growth: this makes room for at most 128 new constants.
            let ofs = (if szins >= 256 { 128 } else { szins >> 1 }).min(self.irmin - 1);
            if ofs == 0 {
                return Err(AbortReason::TraceTooLong.into());
            }
            let irmin = self.irmin - ofs;
            let irmax = (irmin + 2 * szins).min(REF_LIMIT);
            let mut newbuf = Vec::new();
            newbuf.try_reserve_exact((irmax - irmin) as usize)?;
            newbuf.resize(ofs as usize, IrIns::NOP);
            newbuf.extend_from_slice(&self.buf[..used]);
            newbuf.resize((irmax - irmin) as usize, IrIns::NOP);
            self.buf = newbuf;
            self.irmin = irmin;
            self.irmax = irmax;
        }
        Ok(())
    }
}

/// An iterator over an opcode chain, newest first.
pub(crate) struct ChainIter<'a> {
    buf: &'a IrBuffer,
    next: Option<IRRef>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (IRRef, &'a IrIns);

    fn next(&mut self) -> Option<Self::Item> {
        let r = self.next?;
        let ins = self.buf.ins(r);
        self.next = ins.prev();
        Some((r, ins))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{split_i32, REF_FIRST};

    fn check_invariant(b: &IrBuffer) {
        assert!(b.irmin <= b.nk);
        assert!(b.nk <= u32::from(REF_BIAS));
        assert!(u32::from(REF_BIAS) <= b.nins);
        assert!(b.nins <= b.irmax);
        assert_eq!(b.buf.len(), (b.irmax - b.irmin) as usize);
    }

    fn push_int_const(b: &mut IrBuffer, x: i32) -> IRRef {
        let (op1, op2) = split_i32(x);
        b.push_const(IrIns::new(IrOp::KInt, IrTy::I32, op1, op2))
            .unwrap()
    }

    #[test]
    fn starts_with_base() {
        let b = IrBuffer::new(usize::MAX).unwrap();
        assert_eq!(b.nins().raw(), REF_FIRST);
        assert_eq!(b.ins(IRRef::BASE).op(), IrOp::Base);
        assert_eq!(
            b.chain_iter(IrOp::Base).map(|(r, _)| r).collect::<Vec<_>>(),
            vec![IRRef::BASE]
        );
        assert_eq!(b.consts_len(), 0);
        check_invariant(&b);
    }

    #[test]
    fn refs_stable_under_growth() {
        let mut b = IrBuffer::new(usize::MAX).unwrap();
        let mut consts = Vec::new();
        let mut insts = Vec::new();
        // Interleave constants and instructions so that both ends grow several times, exercising
        // both the shifting and the reallocating strategy at the bottom.
        for i in 0..2000 {
            if i % 3 == 0 {
                consts.push((push_int_const(&mut b, i), i));
            }
            let r = b
                .push(IrIns::new(IrOp::SLoad, IrTy::Unk, i as u16, 0))
                .unwrap();
            insts.push((r, i as u16));
            check_invariant(&b);
        }
        assert!(b.capacity() >= 2000 + 667);
        for (r, x) in consts {
            assert!(r.is_const());
            assert_eq!(b.ins(r).op(), IrOp::KInt);
            assert_eq!(b.ins(r).lit_i32(), x);
        }
        for (r, x) in insts {
            assert!(!r.is_const());
            assert_eq!(b.ins(r).op1(), x);
        }
    }

    #[test]
    fn shifts_up_when_top_is_mostly_free() {
        let mut b = IrBuffer::new(usize::MAX).unwrap();
        let r = b.push(IrIns::new(IrOp::RLoad, IrTy::Unk, 0, 0)).unwrap();
        let cap = b.capacity();
        // The initial buffer has room for 64 constants; the 65th forces growth and, as nearly
        // the whole top is free, that growth is a shift rather than a reallocation.
        let ks = (0..65).map(|i| push_int_const(&mut b, i)).collect::<Vec<_>>();
        assert_eq!(b.capacity(), cap);
        assert_eq!(b.ins(r).op(), IrOp::RLoad);
        assert_eq!(b.ins(IRRef::BASE).op(), IrOp::Base);
        for (i, k) in ks.into_iter().enumerate() {
            assert_eq!(b.ins(k).lit_i32(), i as i32);
        }
        check_invariant(&b);
    }

    #[test]
    fn chains() {
        let mut b = IrBuffer::new(usize::MAX).unwrap();
        let r1 = b.push(IrIns::new(IrOp::RLoad, IrTy::Unk, 0, 0)).unwrap();
        let _ = b.push(IrIns::new(IrOp::SLoad, IrTy::Unk, 1, 0)).unwrap();
        let r3 = b.push(IrIns::new(IrOp::RLoad, IrTy::Unk, 0, 0)).unwrap();
        assert_eq!(
            b.chain_iter(IrOp::RLoad).map(|(r, _)| r).collect::<Vec<_>>(),
            vec![r3, r1]
        );
        assert_eq!(b.chain_iter(IrOp::Add).count(), 0);
    }

    #[test]
    fn instruction_limit() {
        let mut b = IrBuffer::new(2).unwrap();
        b.push(IrIns::new(IrOp::RLoad, IrTy::Unk, 0, 0)).unwrap();
        b.push(IrIns::new(IrOp::RLoad, IrTy::Unk, 0, 0)).unwrap();
        assert!(matches!(
            b.push(IrIns::new(IrOp::RLoad, IrTy::Unk, 0, 0)),
            Err(RecordingError::Abort(AbortReason::TraceTooLong))
        ));
    }

    #[test]
    fn reference_space_exhausted() {
        let mut b = IrBuffer::new(usize::MAX).unwrap();
        let mut n = 0;
        let e = loop {
            match b.push(IrIns::new(IrOp::RLoad, IrTy::Unk, 0, 0)) {
                Ok(_) => n += 1,
                Err(e) => break e,
            }
        };
        assert!(matches!(e, RecordingError::Abort(AbortReason::TraceTooLong)));
        assert_eq!(n, u32::from(u16::MAX - REF_FIRST));
        assert_eq!(b.nins().raw(), u16::MAX);
        assert_eq!(b.iter_refs_from(IRRef::FIRST).count(), n as usize);
        check_invariant(&b);
        // Constants can still be interned.
        let k = push_int_const(&mut b, 3);
        assert_eq!(b.ins(k).lit_i32(), 3);
        check_invariant(&b);
    }
}
