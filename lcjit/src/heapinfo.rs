//! Abstract knowledge about the objects allocated in a trace.
//!
//! Every `new` instruction has one heap info entry recording the info table the object was
//! allocated with and the symbolic value of each of its fields. When the loop is unrolled, each
//! allocation in the loop body is cloned and the clone gets its own entry whose fields are then
//! renamed independently of the original's.

use crate::{
    errors::{internal_error, RecordingError},
    interp::Word,
    ir::IRRef,
};
use index_vec::IndexVec;

index_vec::define_index_type! {
    pub struct HeapIdx = u32;
}

#[derive(Clone, Debug)]
pub struct HeapInfo {
    /// The allocation instruction this entry describes.
    pub(crate) alloc: IRRef,
    /// The info table of the allocated object.
    pub(crate) shape: Word,
    /// The offset of this entry's first field in the field map.
    map_ofs: usize,
    pub(crate) nfields: usize,
}

impl HeapInfo {
    pub fn alloc(&self) -> IRRef {
        self.alloc
    }

    pub fn shape(&self) -> Word {
        self.shape
    }

    pub fn nfields(&self) -> usize {
        self.nfields
    }
}

#[derive(Default)]
pub struct HeapInfos {
    heaps: IndexVec<HeapIdx, HeapInfo>,
    /// The fields of all entries. `None` means the field has not been initialised.
    fields: Vec<Option<IRRef>>,
}

impl HeapInfos {
    /// Add an entry for the allocation `alloc` of an object with info table `shape` and
    /// `nfields` fields, all initially unknown.
    pub(crate) fn new_heap_info(
        &mut self,
        alloc: IRRef,
        shape: Word,
        nfields: usize,
    ) -> Result<HeapIdx, RecordingError> {
        let map_ofs = self.fields.len();
        self.fields.try_reserve(nfields)?;
        self.fields.resize(map_ofs + nfields, None);
        self.heaps.raw.try_reserve(1)?;
        Ok(self.heaps.push(HeapInfo {
            alloc,
            shape,
            map_ofs,
            nfields,
        }))
    }

    /// Add an entry for `alloc`, the unrolled copy of the allocation described by `src`, with the
    /// same shape and fields as `src`.
    pub(crate) fn clone_heap_info(
        &mut self,
        alloc: IRRef,
        src: HeapIdx,
    ) -> Result<HeapIdx, RecordingError> {
        let HeapInfo {
            shape,
            map_ofs,
            nfields,
            ..
        } = *self.get(src)?;
        let idx = self.new_heap_info(alloc, shape, nfields)?;
        let new_ofs = self.heaps[idx].map_ofs;
        self.fields.copy_within(map_ofs..map_ofs + nfields, new_ofs);
        Ok(idx)
    }

    pub fn get(&self, idx: HeapIdx) -> Result<&HeapInfo, RecordingError> {
        self.heaps
            .get(idx)
            .ok_or_else(|| internal_error(format!("no heap info entry {}", idx.index())))
    }

    fn field_ofs(&self, idx: HeapIdx, field: usize) -> Result<usize, RecordingError> {
        let hi = self.get(idx)?;
        if field >= hi.nfields {
            return Err(internal_error(format!(
                "field {field} out of range for heap info entry {} with {} fields",
                idx.index(),
                hi.nfields
            )));
        }
        Ok(hi.map_ofs + field)
    }

    pub fn get_field(
        &self,
        idx: HeapIdx,
        field: usize,
    ) -> Result<Option<IRRef>, RecordingError> {
        Ok(self.fields[self.field_ofs(idx, field)?])
    }

    pub(crate) fn set_field(
        &mut self,
        idx: HeapIdx,
        field: usize,
        r: IRRef,
    ) -> Result<(), RecordingError> {
        let ofs = self.field_ofs(idx, field)?;
        self.fields[ofs] = Some(r);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.heaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heaps.is_empty()
    }

    pub fn iter_enumerated(&self) -> impl Iterator<Item = (HeapIdx, &HeapInfo)> {
        self.heaps.iter_enumerated()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fields() {
        let mut h = HeapInfos::default();
        let r1 = IRRef::FIRST;
        let r2 = r1.next();
        let i = h.new_heap_info(r1, 0x1000, 2).unwrap();
        assert_eq!(h.get_field(i, 0).unwrap(), None);
        h.set_field(i, 1, r2).unwrap();
        assert_eq!(h.get_field(i, 1).unwrap(), Some(r2));
        assert!(matches!(
            h.set_field(i, 2, r2),
            Err(RecordingError::InternalError(_))
        ));
        assert!(h.get_field(i, 2).unwrap_err().is_fatal());
    }

    #[test]
    fn clones_are_independent() {
        let mut h = HeapInfos::default();
        let r1 = IRRef::FIRST;
        let r2 = r1.next();
        let r3 = r2.next();
        let orig = h.new_heap_info(r1, 0x1000, 2).unwrap();
        h.set_field(orig, 0, r2).unwrap();
        let _ = h.new_heap_info(r2, 0x2000, 1).unwrap();
        let clone = h.clone_heap_info(r3, orig).unwrap();
        assert_eq!(h.len(), 3);
        assert_eq!(h.get(clone).unwrap().alloc(), r3);
        assert_eq!(h.get(clone).unwrap().shape(), 0x1000);
        assert_eq!(h.get_field(clone, 0).unwrap(), Some(r2));
        h.set_field(clone, 0, r3).unwrap();
        assert_eq!(h.get_field(orig, 0).unwrap(), Some(r2));
        assert_eq!(h.get_field(clone, 0).unwrap(), Some(r3));
    }
}
