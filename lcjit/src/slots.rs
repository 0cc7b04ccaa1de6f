//! The symbolic stack: which IR value each interpreter stack slot currently holds.
//!
//! Slots are addressed relative to a movable base, exactly as the interpreter addresses them:
//! slot `-1` is the current closure, `-2` the return PC, `-3` the caller's base. Internally every
//! slot has an *absolute* index relative to the base the trace was entered with, which is what
//! snapshots record.

use crate::{errors::RecordingError, ir::IRRef, AbortReason};

/// The maximum number of stack slots a trace can track.
pub(crate) const MAX_SLOTS: usize = 250;

pub(crate) struct SlotTable {
    slots: [Option<IRRef>; MAX_SLOTS],
    /// The absolute index of slot 0.
    base: i32,
    /// The number of slots in the current frame.
    maxslot: u32,
}

impl SlotTable {
    /// Create an empty slot table for a frame of `maxslot` slots. Absolute slot 0 is the current
    /// closure (i.e. slot `-1`).
    pub(crate) fn new(maxslot: u32) -> Self {
        SlotTable {
            slots: [None; MAX_SLOTS],
            base: 1,
            maxslot,
        }
    }

    /// Convert the base-relative slot `slot` into an absolute slot index.
    pub(crate) fn abs(&self, slot: i32) -> Result<usize, RecordingError> {
        let abs = self.base + slot;
        match usize::try_from(abs) {
            Ok(x) if x < MAX_SLOTS => Ok(x),
            _ => Err(AbortReason::SlotOutOfRange(slot).into()),
        }
    }

    pub(crate) fn get(&self, slot: i32) -> Result<Option<IRRef>, RecordingError> {
        Ok(self.slots[self.abs(slot)?])
    }

    /// Set `slot` to `r`. `None` clears the slot.
    pub(crate) fn set(&mut self, slot: i32, r: Option<IRRef>) -> Result<(), RecordingError> {
        let abs = self.abs(slot)?;
        self.slots[abs] = r;
        Ok(())
    }

    pub(crate) fn get_abs(&self, abs: usize) -> Option<IRRef> {
        self.slots.get(abs).copied().flatten()
    }

    pub(crate) fn set_abs(&mut self, abs: usize, r: Option<IRRef>) -> Result<(), RecordingError> {
        match self.slots.get_mut(abs) {
            Some(x) => {
                *x = r;
                Ok(())
            }
            None => Err(AbortReason::SlotOutOfRange(abs as i32 - self.base).into()),
        }
    }

    /// Clear the slots `from..to` (relative to the current base).
    pub(crate) fn clear(&mut self, from: i32, to: i32) -> Result<(), RecordingError> {
        for i in from..to {
            self.set(i, None)?;
        }
        Ok(())
    }

    pub(crate) fn base(&self) -> i32 {
        self.base
    }

    /// Move the base by `delta` slots (positive when entering a frame).
    pub(crate) fn shift_base(&mut self, delta: i32) -> Result<(), RecordingError> {
        let base = self.base + delta;
        if base < 0 || base as usize >= MAX_SLOTS {
            return Err(AbortReason::SlotOutOfRange(delta).into());
        }
        self.base = base;
        Ok(())
    }

    pub(crate) fn maxslot(&self) -> u32 {
        self.maxslot
    }

    pub(crate) fn set_maxslot(&mut self, maxslot: u32) {
        self.maxslot = maxslot;
    }

    /// Iterate over `(absolute slot, ref)` for every tracked slot.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, IRRef)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.map(|r| (i, r)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn relative_addressing() {
        let mut st = SlotTable::new(4);
        st.set(-1, Some(IRRef::FIRST)).unwrap();
        assert_eq!(st.get_abs(0), Some(IRRef::FIRST));
        st.shift_base(10).unwrap();
        assert_eq!(st.get(-11).unwrap(), Some(IRRef::FIRST));
        assert_eq!(st.get(0).unwrap(), None);
        st.set(2, Some(IRRef::BASE)).unwrap();
        assert_eq!(st.iter().collect::<Vec<_>>(), vec![(0, IRRef::FIRST), (13, IRRef::BASE)]);
        st.clear(-11, 3).unwrap();
        assert_eq!(st.iter().count(), 0);
    }

    #[test]
    fn out_of_range() {
        let mut st = SlotTable::new(4);
        assert!(matches!(
            st.get(-2),
            Err(RecordingError::Abort(AbortReason::SlotOutOfRange(-2)))
        ));
        assert!(st.set(MAX_SLOTS as i32, Some(IRRef::FIRST)).is_err());
        assert!(st.shift_base(MAX_SLOTS as i32).is_err());
        assert_eq!(st.base(), 1);
    }
}
