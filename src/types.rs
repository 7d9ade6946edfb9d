//! Shared primitive types: sequence numbers, record tags and internal entries.

/// Monotonically increasing write stamp. Zero means "never written".
pub type SequenceNumber = u64;

/// Largest sequence number a lookup can ask for.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1u64 << 56) - 1;

/// Record tag as it appears in the write batch encoding.
///
/// The plain `Deletion` / `Value` / `Merge` kinds are also the entry kinds
/// stored in memtables and table files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0x0,
    Value = 0x1,
    Merge = 0x2,
    LogData = 0x3,
    ColumnFamilyDeletion = 0x4,
    ColumnFamilyValue = 0x5,
    ColumnFamilyMerge = 0x6,
}

impl ValueType {
    /// Decode a tag byte, returning None for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x0 => Some(ValueType::Deletion),
            0x1 => Some(ValueType::Value),
            0x2 => Some(ValueType::Merge),
            0x3 => Some(ValueType::LogData),
            0x4 => Some(ValueType::ColumnFamilyDeletion),
            0x5 => Some(ValueType::ColumnFamilyValue),
            0x6 => Some(ValueType::ColumnFamilyMerge),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// One versioned entry of a memtable or table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalEntry {
    pub user_key: Vec<u8>,
    pub sequence: SequenceNumber,
    pub kind: ValueType,
    pub value: Vec<u8>,
}

impl InternalEntry {
    /// Ordering used everywhere entries are sorted: user key ascending, then
    /// newest sequence first.
    pub fn sort_key(&self) -> (&[u8], std::cmp::Reverse<SequenceNumber>) {
        (&self.user_key, std::cmp::Reverse(self.sequence))
    }
}
