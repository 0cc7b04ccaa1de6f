//! Snapshots: the interpreter state needed to resume execution when a guard fails.
//!
//! A snapshot is anchored at the reference of the first instruction recorded after it, i.e. it
//! describes the state of the interpreter *before* that instruction executes. Its entries live
//! in one flat map shared by all snapshots: `nent` `(slot, ref)` entries followed by one trailing
//! entry holding the PC as a delta from the trace's start PC.

use crate::{errors::RecordingError, ir::IRRef};
use index_vec::IndexVec;
use std::fmt;

index_vec::define_index_type! {
    pub struct SnapIdx = u32;
}

/// One `(absolute slot, ref)` pair of a snapshot, packed into a single word.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SnapEntry(u32);

impl SnapEntry {
    pub(crate) fn new(slot: usize, r: IRRef) -> Self {
        debug_assert!(slot <= usize::from(u16::MAX));
        SnapEntry(((slot as u32) << 16) | u32::from(r.raw()))
    }

    fn pc_delta(delta: i32) -> Self {
        SnapEntry(delta as u32)
    }

    /// The absolute slot this entry restores.
    pub fn slot(self) -> usize {
        (self.0 >> 16) as usize
    }

    /// The value the slot is restored to.
    pub fn iref(self) -> IRRef {
        IRRef::from_raw(self.0 as u16)
    }
}

impl fmt::Display for SnapEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.slot(), self.iref())
    }
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    /// The first instruction this snapshot applies to.
    pub(crate) iref: IRRef,
    /// The offset of this snapshot's first entry in the snapshot map.
    pub(crate) map_ofs: usize,
    /// The number of slot entries (excluding the trailing PC entry).
    pub(crate) nent: usize,
    /// The absolute slot index of the base when the snapshot was taken.
    pub(crate) base_slot: i32,
}

impl Snapshot {
    pub fn iref(&self) -> IRRef {
        self.iref
    }

    pub fn base_slot(&self) -> i32 {
        self.base_slot
    }
}

/// All the snapshots of a trace.
#[derive(Default)]
pub struct Snapshots {
    snaps: IndexVec<SnapIdx, Snapshot>,
    map: Vec<SnapEntry>,
}

impl Snapshots {
    /// Append a snapshot anchored at `iref` holding `entries` and the PC `pc_delta`.
    pub(crate) fn push(
        &mut self,
        iref: IRRef,
        base_slot: i32,
        entries: impl Iterator<Item = SnapEntry>,
        pc_delta: i32,
    ) -> Result<SnapIdx, RecordingError> {
        let map_ofs = self.map.len();
        for e in entries {
            self.map.try_reserve(1)?;
            self.map.push(e);
        }
        let nent = self.map.len() - map_ofs;
        self.map.try_reserve(1)?;
        self.map.push(SnapEntry::pc_delta(pc_delta));
        self.snaps.raw.try_reserve(1)?;
        Ok(self.snaps.push(Snapshot {
            iref,
            map_ofs,
            nent,
            base_slot,
        }))
    }

    pub fn len(&self) -> usize {
        self.snaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snaps.is_empty()
    }

    pub fn get(&self, idx: SnapIdx) -> &Snapshot {
        &self.snaps[idx]
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snaps.last()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Snapshot> {
        self.snaps.iter()
    }

    /// The `(slot, ref)` entries of `snap`.
    pub fn entries(&self, snap: &Snapshot) -> &[SnapEntry] {
        &self.map[snap.map_ofs..snap.map_ofs + snap.nent]
    }

    /// The PC of `snap`, as a delta from the trace's start PC.
    pub fn pc_delta(&self, snap: &Snapshot) -> i32 {
        self.map[snap.map_ofs + snap.nent].0 as i32
    }

    /// The length of the flat snapshot map, including PC entries.
    pub fn map_len(&self) -> usize {
        self.map.len()
    }
}
