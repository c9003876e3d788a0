use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::io::{Decodeable, Encodeable, SmallWriter};

/// An engine-assigned record identifier.
///
/// Base rids are drawn from one monotonically increasing counter and
/// display as `b{n}`; tail rids are drawn from a second counter and
/// display as `t{n}`. The tag/number split avoids allocating and
/// re-parsing a string on every page-directory lookup while still
/// round-tripping exactly to the `b{n}`/`t{n}` glossary format whenever
/// one is needed (page-directory keys, B+-tree payloads, diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub is_base: bool,
    pub number: u64,
}

impl Rid {
    pub fn base(number: u64) -> Self {
        Rid {
            is_base: true,
            number,
        }
    }

    pub fn tail(number: u64) -> Self {
        Rid {
            is_base: false,
            number,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (tag, rest) = s.split_at(1);
        let number: u64 = rest.parse().ok()?;
        match tag {
            "b" => Some(Rid::base(number)),
            "t" => Some(Rid::tail(number)),
            _ => None,
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.is_base { "b" } else { "t" }, self.number)
    }
}

/// # Format
///
/// - 1 byte: tag (0 = base, 1 = tail)
/// - 8 bytes: number (LE)
impl Encodeable for Rid {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(if self.is_base { 0u8 } else { 1u8 });
        buf.extend_from_slice(&self.number.to_le_bytes());
        buf
    }
}

impl Decodeable for Rid {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
        let tag = u8::decode_from(reader)?;
        let number = u64::decode_from(reader)?;
        let is_base = match tag {
            0 => true,
            1 => false,
            other => return Err(EngineError::Corrupt(format!("bad rid tag {}", other))),
        };
        Ok(Rid { is_base, number })
    }
}

/// A bitmap indicating, per column, whether a tail record carries a
/// fresh value for that column. Backed by `bit-vec`, matching the
/// header bitmap the teacher's `BTreeLeafPage` already uses for its
/// occupied-slot header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEncoding(bit_vec::BitVec);

impl SchemaEncoding {
    pub fn zeros(num_columns: usize) -> Self {
        SchemaEncoding(bit_vec::BitVec::from_elem(num_columns, false))
    }

    pub fn from_mask(mask: &[bool]) -> Self {
        let mut bv = bit_vec::BitVec::from_elem(mask.len(), false);
        for (i, &b) in mask.iter().enumerate() {
            bv.set(i, b);
        }
        SchemaEncoding(bv)
    }

    pub fn get(&self, i: usize) -> bool {
        self.0.get(i).unwrap_or(false)
    }

    pub fn set(&mut self, i: usize, v: bool) {
        self.0.set(i, v);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() == 0
    }

    /// Bitwise-OR another mask into this one; used when an update's
    /// column mask accumulates onto the base record's running encoding.
    pub fn or_into(&mut self, other: &SchemaEncoding) {
        self.0.or(&other.0);
    }

    pub fn to_bools(&self) -> Vec<bool> {
        self.0.iter().collect()
    }

    pub fn from_bools(bools: &[bool]) -> Self {
        Self::from_mask(bools)
    }
}

/// The value carried in one page slot, base or tail.
///
/// See `spec.md` §3 for the field semantics and invariants. `columns`
/// entries are `None` where `schema_encoding`'s corresponding bit is 0
/// (absent on a tail record, or a deletion marker's universally-absent
/// columns).
#[derive(Debug, Clone)]
pub struct Record {
    pub base_rid: Rid,
    pub rid: Rid,
    pub indirection: Rid,
    pub start_time: i64,
    pub schema_encoding: SchemaEncoding,
    pub columns: Vec<Option<i64>>,
}

impl Record {
    /// Construct a fresh, unupdated base record: indirection points to
    /// itself and every schema bit is 0.
    pub fn new_base(rid: Rid, start_time: i64, columns: Vec<i64>) -> Self {
        let num_columns = columns.len();
        Record {
            base_rid: rid,
            rid,
            indirection: rid,
            start_time,
            schema_encoding: SchemaEncoding::zeros(num_columns),
            columns: columns.into_iter().map(Some).collect(),
        }
    }

    pub fn is_deletion_marker(&self) -> bool {
        self.columns.iter().all(|c| c.is_none())
    }
}

/// # Format
///
/// - Rid: base_rid, rid, indirection
/// - i64: start_time
/// - BitVec: schema_encoding
/// - u32: num_columns
/// - num_columns × Option<i64>: columns
impl Encodeable for Record {
    fn encode(&self) -> Vec<u8> {
        let mut w = SmallWriter::new();
        w.write(&self.base_rid);
        w.write(&self.rid);
        w.write(&self.indirection);
        w.write(&self.start_time);
        w.write(&self.schema_encoding.0);
        w.write(&(self.columns.len() as u32));
        for c in &self.columns {
            w.write(c);
        }
        w.into_bytes()
    }
}

impl Decodeable for Record {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> EngineResult<Self> {
        let base_rid = Rid::decode_from(reader)?;
        let rid = Rid::decode_from(reader)?;
        let indirection = Rid::decode_from(reader)?;
        let start_time = i64::decode_from(reader)?;
        let bits = bit_vec::BitVec::decode_from(reader)?;
        let num_columns = u32::decode_from(reader)? as usize;
        let mut columns = Vec::with_capacity(num_columns);
        for _ in 0..num_columns {
            columns.push(Option::<i64>::decode_from(reader)?);
        }
        Ok(Record {
            base_rid,
            rid,
            indirection,
            start_time,
            schema_encoding: SchemaEncoding(bits),
            columns,
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Record{{ rid: {}, base_rid: {}, indirection: {}, columns: {:?} }}",
            self.rid, self.base_rid, self.indirection, self.columns
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_round_trips_through_display_and_parse() {
        let r = Rid::base(42);
        assert_eq!(Rid::parse(&r.to_string()), Some(r));
        let t = Rid::tail(7);
        assert_eq!(Rid::parse(&t.to_string()), Some(t));
    }

    #[test]
    fn record_round_trips_through_codec() {
        use std::io::Cursor;
        let mut rec = Record::new_base(Rid::base(3), 123, vec![50, 2, 3]);
        rec.schema_encoding.set(1, true);
        rec.columns[2] = None;
        let bytes = rec.encode();
        let decoded = Record::decode_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.rid, rec.rid);
        assert_eq!(decoded.base_rid, rec.base_rid);
        assert_eq!(decoded.indirection, rec.indirection);
        assert_eq!(decoded.columns, vec![Some(50), Some(2), None]);
        assert!(decoded.schema_encoding.get(1));
        assert!(!decoded.schema_encoding.get(0));
    }

    #[test]
    fn new_base_record_has_self_indirection_and_zero_schema() {
        let rid = Rid::base(0);
        let rec = Record::new_base(rid, 0, vec![50, 2, 3]);
        assert_eq!(rec.indirection, rid);
        assert_eq!(rec.base_rid, rid);
        assert!((0..3).all(|i| !rec.schema_encoding.get(i)));
        assert_eq!(rec.columns, vec![Some(50), Some(2), Some(3)]);
    }
}
