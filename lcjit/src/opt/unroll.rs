//! Loop closing: unroll the recorded loop body once and insert PHIs.
//!
//! The body `FIRST..nloop` is replayed after the `loop` marker, with every operand renamed to its
//! image from the replay (if it has one yet). Folding and CSE see the replayed instructions just
//! as they saw the recorded ones, so loop-invariant computations fold back to their first
//! iteration definitions, leaving only the loop-variant ones after the marker. Every value whose
//! image is defined after the marker is then joined with its image by a `phi`:
//!
//! ```text
//!     t1  add a b
//!     --- loop ---
//!     x1  sub t1 c  ; refers to t1 in the first iteration, t2 thereafter
//!     t2  add t1 b
//!     x2  sub t2 d  ; refers to t2 only
//!         phi t1 t2
//! ```
//!
//! All PHIs semantically happen immediately after the `loop` marker.

use crate::{
    errors::{internal_error, RecordingError},
    heapinfo::HeapIdx,
    ir::{IRRef, IrOp, IrTy, OpKind, REF_FIRST},
    jitstate::JitState,
};

/// The image of `x` when replaying `cur`: only references to instructions replayed already are
/// renamed.
fn rename(renaming: &[Option<IRRef>], cur: IRRef, x: IRRef) -> IRRef {
    if x > IRRef::BASE && x < cur {
        renaming[usize::from(x.raw() - REF_FIRST)].unwrap_or(x)
    } else {
        x
    }
}

impl JitState {
    /// Unroll the loop body once. The `loop` marker must already have been emitted.
    pub(crate) fn unroll(&mut self) -> Result<(), RecordingError> {
        let nloop = self
            .nloop
            .ok_or_else(|| internal_error("unrolling a trace without a loop"))?;
        let mut renaming: Vec<Option<IRRef>> = Vec::new();
        renaming.try_reserve_exact(usize::from(nloop.raw() - REF_FIRST))?;
        // Only the snapshots of the recorded body are replayed, not those taken while unrolling.
        let nsnaps = self.snaps.len();
        let mut nextsnap = 0;

        for cur in self.buf.iter_refs_from(IRRef::FIRST).take_while(|r| *r < nloop) {
            // If there is a snapshot at this instruction, replay it first: rename each entry and
            // write it back to the slot table.
            while nextsnap < nsnaps {
                let snap = self.snaps.get(nextsnap.into()).clone();
                if snap.iref > cur {
                    break;
                }
                let entries = self.snaps.entries(&snap).to_vec();
                for e in entries {
                    self.set_slot_abs(e.slot(), rename(&renaming, cur, e.iref()))?;
                }
                let pc = self.start_pc.with_delta(self.snaps.pc_delta(&snap));
                self.set_pc(pc);
                nextsnap += 1;
            }

            let ins = *self.buf.ins(cur);
            let op = ins.op();
            let op1 = match op.op1_kind() {
                OpKind::Ref => rename(&renaming, cur, ins.op1_ref()).raw(),
                _ => ins.op1(),
            };
            let op2 = match op.op2_kind() {
                OpKind::Ref => rename(&renaming, cur, ins.op2_ref()).raw(),
                _ => ins.op2(),
            };
            let image = self.emit(op, ins.ty(), op1, op2)?;
            renaming.push(image);

            // Keep the slot table's base in step with the frames entered and left.
            match op {
                IrOp::Frame => {
                    self.shift_frame(i32::from(ins.op1()), u32::from(ins.op2()))?;
                }
                IrOp::Ret => {
                    let basediff = i32::from(ins.op1());
                    self.shift_frame(-basediff, (basediff - 3).max(0) as u32)?;
                }
                IrOp::New => {
                    let image = image
                        .ok_or_else(|| internal_error(format!("new {cur} folded to nothing")))?;
                    let src = HeapIdx::from_usize(usize::from(ins.op2()));
                    self.clone_alloc(&renaming, cur, image, src)?;
                }
                _ => (),
            }
        }

        // Join every value that is redefined in the loop body with its redefinition.
        for (orig, image) in self
            .buf
            .iter_refs_from(IRRef::FIRST)
            .zip(renaming.iter())
            .filter_map(|(orig, image)| image.map(|x| (orig, x)))
            .collect::<Vec<_>>()
        {
            let img = self.buf.ins(image);
            let ty = img.ty();
            if image > nloop && ty != IrTy::Void && img.op() != IrOp::FRef {
                self.buf.ins_mut(orig).irtype_mut().set_phi();
                self.buf.ins_mut(image).irtype_mut().set_phi();
                self.emit_raw(IrOp::Phi, ty, orig.raw(), image.raw())?;
            }
        }
        Ok(())
    }

    /// Give `image`, the unrolled copy of the allocation `orig` described by heap info `src`, its
    /// own heap info with renamed fields.
    fn clone_alloc(
        &mut self,
        renaming: &[Option<IRRef>],
        orig: IRRef,
        image: IRRef,
        src: HeapIdx,
    ) -> Result<(), RecordingError> {
        let clone = self.heap.clone_heap_info(image, src)?;
        for i in 0..self.heap.get(src)?.nfields() {
            if let Some(f) = self.heap.get_field(src, i)? {
                self.heap.set_field(clone, i, rename(renaming, orig, f))?;
            }
        }
        let clone = u16::try_from(clone.index())
            .map_err(|_| internal_error("too many heap info entries"))?;
        self.buf.ins_mut(image).set_op2(clone);
        Ok(())
    }

    /// If `r` is a loop-variant value defined before the `loop` marker, return the `phi` joining
    /// it with its twin, i.e. the value it takes in later iterations.
    pub(crate) fn find_phi(&self, r: IRRef) -> Result<Option<IRRef>, RecordingError> {
        match self.nloop {
            Some(nloop) if r < nloop && self.buf.ins(r).irtype().is_phi() => self
                .buf
                .chain_iter(IrOp::Phi)
                .find(|(_, x)| x.op1_ref() == r)
                .map(|(phi, _)| Some(phi))
                .ok_or_else(|| internal_error(format!("no phi for {r}"))),
            _ => Ok(None),
        }
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
    fn phi_twins() {
        let mut j = jit(OptFlags::all());
        let x = j.get_slot(0).unwrap();
        let k = j.intern_int(1).unwrap();
        let y = j.emit_val(IrOp::Add, IrTy::I32, x, k.raw()).unwrap();
        j.set_slot(0, Some(y)).unwrap();
        j.force_snapshot().unwrap();
        let nloop = j.emit_raw(IrOp::Loop, IrTy::Void, 0, 0).unwrap();
        j.nloop = Some(nloop);
        j.unroll().unwrap();

        // The slot load in the unrolled body folds to the value left in the slot.
        let (phi, ins) = j.buf.chain_iter(IrOp::Phi).next().unwrap();
        assert_eq!(j.buf.chain_iter(IrOp::Phi).count(), 1);
        assert_eq!(ins.op1_ref(), y);
        let y2 = ins.op2_ref();
        assert!(y2 > nloop && y2 < phi);
        assert_eq!(j.buf.ins(y2).op(), IrOp::Add);
        assert_eq!(j.buf.ins(y2).op1_ref(), y);
        assert!(j.buf.ins(y).irtype().is_phi() && j.buf.ins(y2).irtype().is_phi());

        assert_eq!(j.find_phi(y).unwrap(), Some(phi));
        assert_eq!(j.find_phi(x).unwrap(), None);
        assert_eq!(j.find_phi(y2).unwrap(), None);
        // A value marked as loop-variant must have a `phi`.
        j.buf.ins_mut(x).irtype_mut().set_phi();
        assert!(matches!(
            j.find_phi(x),
            Err(RecordingError::InternalError(_))
        ));
    }

    #[test]
    fn invariant_code_is_not_duplicated() {
        let mut j = jit(OptFlags::all());
        let x = j.get_slot(0).unwrap();
        let y = j.get_slot(1).unwrap();
        let a = j.emit_val(IrOp::Mul, IrTy::I32, x, y.raw()).unwrap();
        j.set_slot(2, Some(a)).unwrap();
        j.force_snapshot().unwrap();
        let nloop = j.emit_raw(IrOp::Loop, IrTy::Void, 0, 0).unwrap();
        j.nloop = Some(nloop);
        j.unroll().unwrap();
        assert_eq!(j.buf.nins(), nloop.next());
        assert_eq!(j.buf.chain_iter(IrOp::Mul).count(), 1);
        assert_eq!(j.slots.get(2).unwrap(), Some(a));
        assert!(!j.buf.ins(IRRef::FIRST).irtype().is_phi());
    }
}
