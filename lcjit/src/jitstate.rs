//! The state of one recording session.

use crate::{
    errors::{internal_error, RecordingError},
    heapinfo::HeapInfos,
    interp::{Pc, Word},
    ir::{IRRef, IrBuffer, IrIns, IrOp, IrTy, LitKind, OpClass},
    log::{
        stats::{Counter, Stats},
        Log, Verbosity,
    },
    opt::OptFlags,
    slots::SlotTable,
    snapshot::{SnapEntry, Snapshots},
    AbortReason,
};
use std::collections::HashMap;

/// Limits and options fixed for the lifetime of a [JitState].
#[derive(Clone, Debug)]
pub(crate) struct JitConfig {
    pub(crate) flags: OptFlags,
    pub(crate) max_trace_len: usize,
    pub(crate) max_snapshots: usize,
}

/// Counts of optimisation events during one session, flushed into [Stats] when the session ends.
#[derive(Default)]
pub(crate) struct OptCounts {
    pub(crate) cse_hits: u64,
    pub(crate) forwarded: u64,
    pub(crate) folded: u64,
    pub(crate) snapshots: u64,
}

impl OptCounts {
    pub(crate) fn flush(&self, stats: &Stats) {
        stats.add(Counter::CseHit, self.cse_hits);
        stats.add(Counter::LoadForwarded, self.forwarded);
        stats.add(Counter::InsFolded, self.folded);
        stats.add(Counter::SnapshotTaken, self.snapshots);
    }
}

/// A trace under construction: everything the recorder and the optimiser read and write. Exactly
/// one exists per recording session and it is either turned into a [crate::Trace] or dropped.
pub(crate) struct JitState {
    pub(crate) buf: IrBuffer,
    pub(crate) slots: SlotTable,
    pub(crate) snaps: Snapshots,
    pub(crate) heap: HeapInfos,
    /// The info tables of closures interned as literals, so that loading their info table can be
    /// folded without consulting the heap.
    static_closures: HashMap<Word, Word>,
    /// The PC of the instruction being recorded.
    pc: Pc,
    /// The loop head.
    pub(crate) start_pc: Pc,
    /// The number of frames entered (and not yet left) since recording started.
    pub(crate) framedepth: i32,
    /// The value returned by the most recent evaluation or return.
    pub(crate) last_result: Option<IRRef>,
    /// Take a snapshot before recording the next bytecode instruction.
    pub(crate) need_snap: bool,
    /// The slot table or PC has changed since the last snapshot was taken.
    merge_snap: bool,
    /// The `loop` marker, once the loop has been closed.
    pub(crate) nloop: Option<IRRef>,
    pub(crate) flags: OptFlags,
    max_snapshots: usize,
    pub(crate) counts: OptCounts,
    pub(crate) log: Log,
}

impl JitState {
    /// Start a new trace at `start_pc` whose entry frame has `maxslot` slots.
    pub(crate) fn new(
        start_pc: Pc,
        maxslot: u32,
        config: &JitConfig,
        log: Log,
    ) -> Result<Self, RecordingError> {
        Ok(JitState {
            buf: IrBuffer::new(config.max_trace_len)?,
            slots: SlotTable::new(maxslot),
            snaps: Snapshots::default(),
            heap: HeapInfos::default(),
            static_closures: HashMap::new(),
            pc: start_pc,
            start_pc,
            framedepth: 0,
            last_result: None,
            need_snap: false,
            merge_snap: true,
            nloop: None,
            flags: config.flags,
            max_snapshots: config.max_snapshots,
            counts: OptCounts::default(),
            log,
        })
    }

    pub(crate) fn pc(&self) -> Pc {
        self.pc
    }

    pub(crate) fn set_pc(&mut self, pc: Pc) {
        if pc != self.pc {
            self.pc = pc;
            self.merge_snap = true;
        }
    }

    /// Log `msg` at [Verbosity::Opt] level. `msg` is only evaluated if it would be logged.
    pub(crate) fn log_opt<F: FnOnce() -> String>(&self, msg: F) {
        if self.log.enabled(Verbosity::Opt) {
            self.log.log(Verbosity::Opt, &msg());
        }
    }

    /// The value of `slot`, loading it from the stack if it is not tracked.
    pub(crate) fn get_slot(&mut self, slot: i32) -> Result<IRRef, RecordingError> {
        if let Some(r) = self.slots.get(slot)? {
            return Ok(r);
        }
        let abs = u16::try_from(self.slots.abs(slot)?)
            .map_err(|_| RecordingError::from(AbortReason::SlotOutOfRange(slot)))?;
        let r = self.emit_raw(IrOp::SLoad, IrTy::Unk, abs, 0)?;
        // Loading a slot doesn't change the interpreter's state, so a snapshot need not be taken.
        self.slots.set(slot, Some(r))?;
        Ok(r)
    }

    /// Set `slot` to `r` (or clear it, if `None`).
    pub(crate) fn set_slot(&mut self, slot: i32, r: Option<IRRef>) -> Result<(), RecordingError> {
        self.slots.set(slot, r)?;
        self.merge_snap = true;
        Ok(())
    }

    /// Clear the slots `from..to`.
    pub(crate) fn clear_slots(&mut self, from: i32, to: i32) -> Result<(), RecordingError> {
        self.slots.clear(from, to)?;
        self.merge_snap = true;
        Ok(())
    }

    /// Set absolute slot `abs` to `r`: used when replaying snapshots.
    pub(crate) fn set_slot_abs(&mut self, abs: usize, r: IRRef) -> Result<(), RecordingError> {
        self.slots.set_abs(abs, Some(r))?;
        self.merge_snap = true;
        Ok(())
    }

    /// Move the base by `delta` slots and set the new frame's size to `maxslot`.
    pub(crate) fn shift_frame(&mut self, delta: i32, maxslot: u32) -> Result<(), RecordingError> {
        self.slots.shift_base(delta)?;
        self.slots.set_maxslot(maxslot);
        self.merge_snap = true;
        Ok(())
    }

    /// Make sure a snapshot describing the current state exists, anchored at the next
    /// instruction. If nothing has changed since the last snapshot, that is reused.
    pub(crate) fn add_snapshot(&mut self) -> Result<(), RecordingError> {
        if !self.merge_snap && !self.snaps.is_empty() {
            return Ok(());
        }
        if self.snaps.len() >= self.max_snapshots {
            return Err(AbortReason::TooManySnapshots.into());
        }
        let pc_delta = self.pc.delta_from(self.start_pc);
        let entries = self.slots.iter().map(|(slot, r)| SnapEntry::new(slot, r));
        self.snaps
            .push(self.buf.nins(), self.slots.base(), entries, pc_delta)?;
        self.merge_snap = false;
        self.counts.snapshots += 1;
        Ok(())
    }

    /// Take a fresh snapshot regardless of whether anything changed since the last one.
    pub(crate) fn force_snapshot(&mut self) -> Result<(), RecordingError> {
        self.merge_snap = true;
        self.add_snapshot()
    }

    pub(crate) fn intern_int(&mut self, x: i32) -> Result<IRRef, RecordingError> {
        self.buf.intern_int(x)
    }

    pub(crate) fn intern_base_offset(&mut self, x: i32) -> Result<IRRef, RecordingError> {
        self.buf.intern_base_offset(x)
    }

    pub(crate) fn intern_word(&mut self, w: Word, kind: LitKind) -> Result<IRRef, RecordingError> {
        self.buf.intern_word(w, kind)
    }

    /// Record that the static closure `closure` has info table `info`.
    pub(crate) fn register_static_closure(&mut self, closure: Word, info: Word) {
        self.static_closures.insert(closure, info);
    }

    /// The info table of the static closure `closure`, if it is known.
    pub(crate) fn static_closure_info(&self, closure: Word) -> Option<Word> {
        self.static_closures.get(&closure).copied()
    }

    /// Append an instruction without any optimisation. Guards first capture a snapshot.
    pub(crate) fn emit_raw(
        &mut self,
        op: IrOp,
        ty: IrTy,
        op1: u16,
        op2: u16,
    ) -> Result<IRRef, RecordingError> {
        self.emit_ins(IrIns::new(op, ty, op1, op2))
    }

    pub(crate) fn emit_ins(&mut self, ins: IrIns) -> Result<IRRef, RecordingError> {
        match ins.op().class() {
            OpClass::Constant => {
                return Err(internal_error(format!(
                    "constant {} emitted as an instruction",
                    ins.op().mnemonic()
                )))
            }
            OpClass::Guard => self.add_snapshot()?,
            _ => (),
        }
        self.buf.push(ins)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn jit() -> JitState {
        let config = JitConfig {
            flags: OptFlags::all(),
            max_trace_len: usize::MAX,
            max_snapshots: 2,
        };
        JitState::new(Pc(100), 4, &config, Log::with(Verbosity::Error, None)).unwrap()
    }

    #[test]
    fn slot_loads_are_cached() {
        let mut j = jit();
        let r1 = j.get_slot(2).unwrap();
        assert_eq!(j.buf.ins(r1).op(), IrOp::SLoad);
        assert_eq!(j.buf.ins(r1).op1(), 3);
        assert_eq!(j.get_slot(2).unwrap(), r1);
        assert_eq!(j.buf.nins(), r1.next());
    }

    #[test]
    fn snapshots_merge() {
        let mut j = jit();
        let r1 = j.get_slot(0).unwrap();
        let r2 = j.get_slot(1).unwrap();
        j.emit_raw(IrOp::Lt, IrTy::Void, r1.raw(), r2.raw()).unwrap();
        assert_eq!(j.snaps.len(), 1);
        let s = j.snaps.last().unwrap();
        assert_eq!(s.iref(), r2.next());
        assert_eq!(
            j.snaps
                .entries(s)
                .iter()
                .map(|e| (e.slot(), e.iref()))
                .collect::<Vec<_>>(),
            vec![(1, r1), (2, r2)]
        );
        // Nothing changed: the snapshot is reused.
        j.emit_raw(IrOp::Gt, IrTy::Void, r2.raw(), r1.raw()).unwrap();
        assert_eq!(j.snaps.len(), 1);
        // The PC changed: a new snapshot is needed.
        j.set_pc(Pc(103));
        j.emit_raw(IrOp::Gt, IrTy::Void, r2.raw(), r1.raw()).unwrap();
        assert_eq!(j.snaps.len(), 2);
        assert_eq!(j.snaps.pc_delta(j.snaps.last().unwrap()), 3);
        j.set_slot(0, Some(r2)).unwrap();
        assert!(matches!(
            j.emit_raw(IrOp::Gt, IrTy::Void, r2.raw(), r1.raw()),
            Err(RecordingError::Abort(AbortReason::TooManySnapshots))
        ));
    }

    #[test]
    fn constants_are_not_instructions() {
        let mut j = jit();
        assert!(matches!(
            j.emit_raw(IrOp::KInt, IrTy::I32, 0, 0),
            Err(RecordingError::InternalError(_))
        ));
    }
}
