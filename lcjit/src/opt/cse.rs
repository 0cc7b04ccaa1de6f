//! Common subexpression elimination and store-to-load forwarding.
//!
//! Both walk the per-opcode chains kept by the IR buffer, newest first. Since an instruction's
//! operands are always older than the instruction itself, neither search needs to go further back
//! than the newest operand.

use crate::{
    errors::RecordingError,
    ir::{IRRef, IrIns, IrOp},
    jitstate::JitState,
};

impl JitState {
    /// Return an existing instruction equivalent to `ins`, or emit `ins` if there is none.
    pub(super) fn cse(&mut self, ins: IrIns) -> Result<IRRef, RecordingError> {
        if !self.flags.cse() {
            return self.emit_ins(ins);
        }
        // There can be no duplicate beyond any argument.
        let mut lim = ins.op1().max(ins.op2());
        // Nor, for loads, beyond a store that may have changed the loaded value.
        if let Some(store) = self.last_store_to(&ins) {
            lim = lim.max(store.raw());
        }
        let op12 = ins.op12();
        let found = self
            .buf
            .chain_iter(ins.op())
            .take_while(|(r, _)| r.raw() > lim)
            .find(|(_, x)| x.op12() == op12)
            .map(|(r, _)| r);
        match found {
            Some(r) => {
                self.counts.cse_hits += 1;
                self.log_opt(|| format!("cse {} => {r}", ins.op().mnemonic()));
                Ok(r)
            }
            None => self.emit_ins(ins),
        }
    }

    /// For a load, the newest store that may have overwritten the location it reads.
    fn last_store_to(&self, ins: &IrIns) -> Option<IRRef> {
        let store_op = match ins.op() {
            IrOp::FLoad => IrOp::FStore,
            IrOp::ILoad => IrOp::Update,
            _ => return None,
        };
        let loc = ins.op1();
        self.buf
            .chain_iter(store_op)
            .take_while(|(r, _)| r.raw() > loc)
            .find(|(_, x)| x.op1() == loc)
            .map(|(r, _)| r)
    }

    /// Try to forward a stored value to the `fload` `ins`.
    pub(super) fn forward(&mut self, ins: &IrIns) -> Option<IRRef> {
        debug_assert_eq!(ins.op(), IrOp::FLoad);
        // A store to the field cannot happen before the reference to the field is created.
        let fref = ins.op1();
        let val = self
            .buf
            .chain_iter(IrOp::FStore)
            .take_while(|(r, _)| r.raw() > fref)
            .find(|(_, x)| x.op1() == fref)
            .map(|(_, x)| x.op2_ref())?;
        self.counts.forwarded += 1;
        self.log_opt(|| format!("forward fload {} => {val}", ins.op1_ref()));
        Some(val)
    }
}

#[cfg(test)]
mod test {
    use super::super::test::jit;
    use crate::{
        ir::{IrOp, IrTy},
        opt::OptFlags,
    };

    #[test]
    fn forwarding() {
        let mut j = jit(OptFlags::all());
        let obj = j.get_slot(0).unwrap();
        let v = j.get_slot(1).unwrap();
        let f1 = j.emit_val(IrOp::FRef, IrTy::Ptr, obj, 1).unwrap();
        let f2 = j.emit_val(IrOp::FRef, IrTy::Ptr, obj, 2).unwrap();
        assert_eq!(j.emit_val(IrOp::FRef, IrTy::Ptr, obj, 1).unwrap(), f1);
        j.emit(IrOp::FStore, IrTy::Void, f1.raw(), v.raw()).unwrap();
        let before = j.buf.nins();
        // A load of the stored field is forwarded.
        assert_eq!(j.emit_val(IrOp::FLoad, IrTy::Unk, f1, 0).unwrap(), v);
        assert_eq!(j.buf.nins(), before);
        assert_eq!(j.counts.forwarded, 1);
        // A load of another field is not.
        let l = j.emit_val(IrOp::FLoad, IrTy::Unk, f2, 0).unwrap();
        assert_eq!(l, before);
        assert_eq!(j.buf.ins(l).op(), IrOp::FLoad);
        // ...but a repeated load of that field is CSEd.
        assert_eq!(j.emit_val(IrOp::FLoad, IrTy::Unk, f2, 0).unwrap(), l);
    }

    #[test]
    fn loads_not_merged_across_stores() {
        let mut j = jit(OptFlags::all().minus_fwd());
        let obj = j.get_slot(0).unwrap();
        let v = j.get_slot(1).unwrap();
        let f = j.emit_val(IrOp::FRef, IrTy::Ptr, obj, 1).unwrap();
        let l1 = j.emit_val(IrOp::FLoad, IrTy::Unk, f, 0).unwrap();
        assert_eq!(j.emit_val(IrOp::FLoad, IrTy::Unk, f, 0).unwrap(), l1);
        j.emit(IrOp::FStore, IrTy::Void, f.raw(), v.raw()).unwrap();
        let l2 = j.emit_val(IrOp::FLoad, IrTy::Unk, f, 0).unwrap();
        assert_ne!(l1, l2);
        assert_eq!(j.counts.forwarded, 0);

        let i1 = j.emit_val(IrOp::ILoad, IrTy::Info, obj, 0).unwrap();
        assert_eq!(j.emit_val(IrOp::ILoad, IrTy::Info, obj, 0).unwrap(), i1);
        j.emit(IrOp::Update, IrTy::Void, obj.raw(), v.raw()).unwrap();
        assert_ne!(j.emit_val(IrOp::ILoad, IrTy::Info, obj, 0).unwrap(), i1);
    }

    #[test]
    fn cse_bounded_by_operands() {
        let mut j = jit(OptFlags::all());
        let x = j.get_slot(0).unwrap();
        let y = j.get_slot(1).unwrap();
        let g1 = j.emit(IrOp::Lt, IrTy::Void, x.raw(), y.raw()).unwrap();
        assert_eq!(j.emit(IrOp::Lt, IrTy::Void, x.raw(), y.raw()).unwrap(), g1);
        let z = j.get_slot(2).unwrap();
        let a = j.emit_val(IrOp::Add, IrTy::I32, x, z.raw()).unwrap();
        assert!(a > z);
        assert_eq!(j.counts.cse_hits, 1);
    }
}
