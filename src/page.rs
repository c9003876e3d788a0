use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::io::{Decodeable, Encodeable, SmallWriter};
use crate::record::Record;

/// A bounded sequence of at most `page_record_size` records.
///
/// Serializes to a self-describing blob: a record count followed by
/// that many packed records (`spec.md` §6). Pages hold base records or
/// tail records interchangeably — the distinction lives in the path
/// they're stored under, not in the `Page` type.
#[derive(Debug, Clone)]
pub struct Page {
    capacity: usize,
    records: Vec<Record>,
}

impl Page {
    pub fn new(capacity: usize) -> Self {
        Page {
            capacity,
            records: Vec::new(),
        }
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self::new(config.page_record_size)
    }

    pub fn has_capacity(&self) -> bool {
        self.records.len() < self.capacity
    }

    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    /// Append a record, returning its slot offset. Panics if the page
    /// is full — callers must check `has_capacity` first, since the
    /// engine always allocates a new page rather than silently
    /// dropping a write.
    pub fn append(&mut self, record: Record) -> usize {
        assert!(self.has_capacity(), "page is full");
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn read_at(&self, offset: usize) -> EngineResult<&Record> {
        self.records
            .get(offset)
            .ok_or_else(|| EngineError::Corrupt(format!("slot {} out of range", offset)))
    }

    pub fn overwrite_at(&mut self, offset: usize, record: Record) -> EngineResult<()> {
        if offset >= self.records.len() {
            return Err(EngineError::Corrupt(format!(
                "slot {} out of range",
                offset
            )));
        }
        self.records[offset] = record;
        Ok(())
    }

    pub fn read_all(&self) -> &[Record] {
        &self.records
    }
}

/// # Format
///
/// - u32: capacity
/// - u32: record count
/// - record count × Record
impl Encodeable for Page {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&(self.capacity as u32));
        w.write(&(self.records.len() as u32));
        for r in &self.records {
            w.write(r);
        }
        w.into_bytes()
    }
}

impl Decodeable for Page {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
        let capacity = u32::decode_from(reader)? as usize;
        let count = u32::decode_from(reader)? as usize;
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(Record::decode_from(reader)?);
        }
        Ok(Page { capacity, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Rid;
    use std::io::Cursor;

    #[test]
    fn append_respects_capacity() {
        let mut page = Page::new(2);
        assert!(page.has_capacity());
        page.append(Record::new_base(Rid::base(0), 0, vec![1]));
        assert!(page.has_capacity());
        page.append(Record::new_base(Rid::base(1), 0, vec![2]));
        assert!(!page.has_capacity());
    }

    #[test]
    fn page_round_trips_through_codec() {
        let mut page = Page::new(4);
        page.append(Record::new_base(Rid::base(0), 10, vec![1, 2]));
        page.append(Record::new_base(Rid::base(1), 20, vec![3, 4]));
        let bytes = page.encode();
        let decoded = Page::decode_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.num_records(), 2);
        assert_eq!(decoded.read_at(1).unwrap().columns, vec![Some(3), Some(4)]);
        assert!(decoded.has_capacity());
    }

    #[test]
    fn overwrite_replaces_slot_in_place() {
        let mut page = Page::new(2);
        page.append(Record::new_base(Rid::base(0), 0, vec![1]));
        page.overwrite_at(0, Record::new_base(Rid::base(0), 0, vec![99]))
            .unwrap();
        assert_eq!(page.read_at(0).unwrap().columns, vec![Some(99)]);
    }
}
