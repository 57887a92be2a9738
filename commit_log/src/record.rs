use prost::Message;

/// Record
///
/// The externally visible unit of the commit log: an opaque payload plus
/// the absolute offset the log assigned to it at append time.
///
/// Records cross the disk boundary in the protobuf wire format (field 1
/// holds the value, field 2 the offset, defaults omitted), so the offset
/// set on append round-trips through every later read:
///
/// ```ignore
/// |----------------- store frame ------------------|
/// | 8-byte BE length | tag 1, value | tag 2, offset |
/// |------------------------------------------------|
/// ```
#[derive(Clone, PartialEq, Message)]
pub struct Record {
    /// Opaque payload bytes. May be empty.
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,

    /// Absolute position of this record in the log, assigned on append.
    #[prost(uint64, tag = "2")]
    pub offset: u64,
}

impl Record {
    /// A record carrying `value`, with the offset left for the log to
    /// assign.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Record {
            value: value.into(),
            offset: 0,
        }
    }
}
