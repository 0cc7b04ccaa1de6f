//! A finished trace, ready to be handed to a code generator.

use crate::{
    heapinfo::HeapInfos,
    interp::{Pc, Word},
    ir::{IRRef, IrBuffer, IrIns, IrOp, OpKind},
    jitstate::JitState,
    snapshot::{Snapshot, Snapshots},
};
use std::fmt;

/// The output of a successful recording session: the IR, its snapshots and the heap info of its
/// allocations.
pub struct Trace {
    start_pc: Pc,
    nloop: IRRef,
    buf: IrBuffer,
    snaps: Snapshots,
    heap: HeapInfos,
    /// Has dead code elimination marked the live instructions?
    dce: bool,
}

impl Trace {
    pub(crate) fn new(jit: JitState, nloop: IRRef, dce: bool) -> Self {
        Trace {
            start_pc: jit.start_pc,
            nloop,
            buf: jit.buf,
            snaps: jit.snaps,
            heap: jit.heap,
            dce,
        }
    }

    /// The PC of the loop head.
    pub fn start_pc(&self) -> Pc {
        self.start_pc
    }

    /// The `loop` marker.
    pub fn nloop(&self) -> IRRef {
        self.nloop
    }

    /// The lowest constant reference.
    pub fn nk(&self) -> IRRef {
        self.buf.nk()
    }

    /// One past the last instruction reference.
    pub fn nins(&self) -> IRRef {
        self.buf.nins()
    }

    /// The constant or instruction `r`.
    ///
    /// # Panics
    ///
    /// If `r` is not in `nk..nins`.
    pub fn ins(&self, r: IRRef) -> &IrIns {
        assert!(r >= self.nk() && r < self.nins());
        self.buf.ins(r)
    }

    /// Every reference in use, constants first.
    pub fn iter_refs(&self) -> impl Iterator<Item = IRRef> + '_ {
        self.buf.iter_all_refs()
    }

    /// Iterate over the instructions `op`, newest first.
    pub fn iter_op(&self, op: IrOp) -> impl Iterator<Item = (IRRef, &IrIns)> + '_ {
        self.buf.chain_iter(op)
    }

    /// The payload of the `kword` constant whose first operand is `idx`.
    pub fn kword(&self, idx: u16) -> Word {
        self.buf.kword(idx)
    }

    /// Must the instruction (or constant) `r` be compiled?
    pub fn is_live(&self, r: IRRef) -> bool {
        r.is_const() || !self.dce || self.buf.ins(r).irtype().is_marked()
    }

    pub fn snapshots(&self) -> &Snapshots {
        &self.snaps
    }

    pub fn heap_infos(&self) -> &HeapInfos {
        &self.heap
    }

    /// A view of this trace for printing.
    fn dump(&self) -> IrDump<'_> {
        IrDump {
            start_pc: self.start_pc,
            buf: &self.buf,
            snaps: &self.snaps,
            heap: &self.heap,
            dce: self.dce,
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dump().fmt(f)
    }
}

/// The textual form of a (possibly unfinished) trace.
pub(crate) struct IrDump<'a> {
    start_pc: Pc,
    buf: &'a IrBuffer,
    snaps: &'a Snapshots,
    heap: &'a HeapInfos,
    dce: bool,
}

impl<'a> IrDump<'a> {
    /// The trace being recorded by `jit`, before any loop closing optimisations.
    pub(crate) fn of_jit(jit: &'a JitState) -> Self {
        IrDump {
            start_pc: jit.start_pc,
            buf: &jit.buf,
            snaps: &jit.snaps,
            heap: &jit.heap,
            dce: false,
        }
    }

    fn is_live(&self, r: IRRef) -> bool {
        r.is_const() || !self.dce || self.buf.ins(r).irtype().is_marked()
    }

    fn fmt_ins(&self, f: &mut fmt::Formatter<'_>, r: IRRef, ins: &IrIns) -> fmt::Result {
        let op = ins.op();
        write!(f, "{r} {} {}", op.mnemonic(), ins.ty())?;
        match op {
            IrOp::KInt => write!(f, " {}", ins.lit_i32())?,
            IrOp::KWord => write!(f, " {:#x}", self.buf.kword(ins.op1()))?,
            IrOp::KBaseO => write!(f, " base{:+}", ins.lit_i32())?,
            _ => {
                for (kind, x) in [(op.op1_kind(), ins.op1()), (op.op2_kind(), ins.op2())] {
                    match kind {
                        OpKind::Ref => write!(f, " {}", IRRef::from_raw(x))?,
                        OpKind::Lit => write!(f, " {x}")?,
                        OpKind::None => (),
                    }
                }
            }
        }
        if ins.irtype().is_phi() {
            write!(f, " (phi)")?;
        }
        writeln!(f)
    }

    fn fmt_snap(&self, f: &mut fmt::Formatter<'_>, i: usize, snap: &Snapshot) -> fmt::Result {
        let entries = self
            .snaps
            .entries(snap)
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>();
        writeln!(
            f,
            "snap #{i} {} [{}]",
            self.start_pc.with_delta(self.snaps.pc_delta(snap)),
            entries.join(" ")
        )
    }
}

impl fmt::Display for IrDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- trace {} ---", self.start_pc)?;
        let mut snaps = self.snaps.iter().enumerate().peekable();
        for r in self.buf.iter_all_refs() {
            while let Some((i, snap)) = snaps.next_if(|(_, s)| s.iref() <= r) {
                self.fmt_snap(f, i, snap)?;
            }
            if self.is_live(r) {
                self.fmt_ins(f, r, self.buf.ins(r))?;
            }
        }
        for (i, snap) in snaps {
            self.fmt_snap(f, i, snap)?;
        }
        for (i, hi) in self.heap.iter_enumerated() {
            let fields = (0..hi.nfields())
                .map(|j| match self.heap.get_field(i, j) {
                    Ok(Some(x)) => x.to_string(),
                    _ => "_".to_owned(),
                })
                .collect::<Vec<_>>();
            writeln!(
                f,
                "heap #{} {} {:#x} [{}]",
                i.index(),
                hi.alloc(),
                hi.shape(),
                fields.join(" ")
            )?;
        }
        write!(f, "--- end trace ---")
    }
}
