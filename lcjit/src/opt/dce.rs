//! Dead code elimination.
//!
//! This marks every instruction whose value is observable: anything referenced by a snapshot,
//! anything with a side effect, and (transitively) their operands. Unmarked instructions are left
//! in place, since removing them would change the references of later instructions: consumers of
//! the trace skip them instead.

use crate::{
    errors::RecordingError,
    ir::IRRef,
    jitstate::JitState,
};

impl JitState {
    /// Mark `r` as live because it is used at `site`. Returns true if this marked a `phi` that
    /// was not previously marked.
    fn mark_ref(&mut self, r: IRRef, site: IRRef) -> Result<bool, RecordingError> {
        if r.is_const() {
            return Ok(false);
        }
        let mut marked_phi = false;
        // A loop-variant value used after the loop marker is really used through its `phi`.
        if self.nloop.is_some_and(|nloop| site > nloop) {
            if let Some(phi) = self.find_phi(r)? {
                let pt = self.buf.ins_mut(phi).irtype_mut();
                marked_phi = !pt.is_marked();
                pt.set_mark();
            }
        }
        self.buf.ins_mut(r).irtype_mut().set_mark();
        Ok(marked_phi)
    }

    /// Mark all live instructions.
    pub(crate) fn dce(&mut self) -> Result<(), RecordingError> {
        self.buf.ins_mut(IRRef::BASE).irtype_mut().set_mark();

        // 1. Mark everything mentioned in snapshots, latest first.
        for i in (0..self.snaps.len()).rev() {
            let snap = self.snaps.get(i.into()).clone();
            let entries = self.snaps.entries(&snap).to_vec();
            for e in entries {
                self.mark_ref(e.iref(), snap.iref)?;
            }
        }

        // 2. Mark everything reachable from those marked above. Data dependencies point
        // backwards, so we scan from the end. `phi`s come last in the trace, so a `phi` marked
        // after it has been scanned needs another scan.
        loop {
            let mut rescan = false;
            for r in self.buf.iter_refs_from(IRRef::FIRST).rev() {
                let ins = *self.buf.ins(r);
                if ins.op().has_side_effect() {
                    self.buf.ins_mut(r).irtype_mut().set_mark();
                } else if !ins.irtype().is_marked() {
                    continue;
                }
                for op in ins.ref_operands() {
                    rescan |= self.mark_ref(op, r)?;
                }
            }
            if !rescan {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::super::test::jit;
    use crate::{
        errors::RecordingError,
        ir::{IRRef, IrOp, IrTy},
        opt::OptFlags,
    };

    #[test]
    fn marks_only_observable_values() {
        let mut j = jit(OptFlags::all());
        let x = j.get_slot(0).unwrap();
        let y = j.get_slot(1).unwrap();
        let unused = j.emit_val(IrOp::Add, IrTy::I32, x, y.raw()).unwrap();
        let z = j.get_slot(2).unwrap();
        let w = j.emit_val(IrOp::Mul, IrTy::I32, z, z.raw()).unwrap();
        let obj = j.get_slot(3).unwrap();
        let f = j.emit_val(IrOp::FRef, IrTy::Ptr, obj, 1).unwrap();
        j.emit(IrOp::FStore, IrTy::Void, f.raw(), w.raw()).unwrap();
        // Only `x` survives in the slots.
        j.clear_slots(0, 8).unwrap();
        j.set_slot(0, Some(x)).unwrap();
        j.force_snapshot().unwrap();
        j.dce().unwrap();

        let live = |r: IRRef| j.buf.ins(r).irtype().is_marked();
        assert!(live(IRRef::BASE));
        assert!(live(x));
        assert!(!live(y));
        assert!(!live(unused));
        // Stores are always live, as is everything they use.
        assert!(live(w) && live(z) && live(f) && live(obj));
    }

    #[test]
    fn loop_variant_value_without_phi() {
        let mut j = jit(OptFlags::all());
        let x = j.get_slot(0).unwrap();
        let nloop = j.emit_raw(IrOp::Loop, IrTy::Void, 0, 0).unwrap();
        j.nloop = Some(nloop);
        // `x` claims to be loop-variant, yet no `phi` joins it with a twin.
        j.buf.ins_mut(x).irtype_mut().set_phi();
        j.set_slot(1, Some(x)).unwrap();
        j.force_snapshot().unwrap();
        assert!(matches!(j.dce(), Err(RecordingError::InternalError(_))));
    }
}
