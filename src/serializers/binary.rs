use std::io::{Error, Write};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use indexmap::IndexMap;
use thiserror::Error as ThisError;
use tracing::{debug, trace};

use crate::{Date, Dictionary, Serializer, Value};

#[derive(Debug, ThisError)]
pub enum BinarySerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] Error),
    #[error("Data Too Short To Hold Header And Trailer")]
    TooShort,
    #[error("Invalid Header Magic")]
    InvalidHeader,
    #[error("Invalid Trailer: {0}")]
    InvalidTrailer(&'static str),
    #[error("Unexpected End Of Object Data")]
    UnexpectedEndOfData,
    #[error("Object Offset {0} Out Of Bounds")]
    OffsetOutOfBounds(u64),
    #[error("Object Index {index} Out Of Bounds (Object Count: {count})")]
    ObjectIndexOutOfBounds { index: u64, count: usize },
    #[error("Unknown Object Marker: {0:#04X}")]
    UnknownMarker(u8),
    #[error("Invalid Object Length")]
    InvalidLength,
    #[error("Invalid String Encoding")]
    InvalidString,
    #[error("Dictionary Key Is Not A String")]
    NonStringKey,
    #[error("Duplicate Dictionary Key: {0}")]
    DuplicateKey(String),
    #[error("Container Object {0} Referenced More Than Once")]
    SharedContainer(u64),
    #[error("Cyclic Reference To Object {0}")]
    CyclicReference(u64),
    #[error("Object Nesting Too Deep")]
    NestingTooDeep,
}

const MARKER_NULL: u8 = 0x00;
const MARKER_FALSE: u8 = 0x08;
const MARKER_TRUE: u8 = 0x09;
const MARKER_INTEGER: u8 = 0x10;
const MARKER_REAL: u8 = 0x20;
const MARKER_DATE: u8 = 0x30;
const MARKER_DATA: u8 = 0x40;
const MARKER_ASCII_STRING: u8 = 0x50;
const MARKER_UNICODE_STRING: u8 = 0x60;
const MARKER_ARRAY: u8 = 0xA0;
const MARKER_DICTIONARY: u8 = 0xD0;

/// Low nibble value signalling that the count follows as an integer object.
const EXTENDED_COUNT: u8 = 0x0F;

/// The smallest of 1, 2, 4 or 8 bytes that holds the unsigned value.
fn unsigned_width(value: u64) -> u8 {
    if value <= u8::MAX as u64 {
        1
    } else if value <= u16::MAX as u64 {
        2
    } else if value <= u32::MAX as u64 {
        4
    } else {
        8
    }
}

/// The power of two exponent and byte size used to store an integer.
///
/// Negative values always take the full 8 bytes, non-negative values the smallest size whose top bit stays clear.
fn integer_width(value: i64) -> (u8, usize) {
    if value < 0 || value > i32::MAX as i64 {
        (3, 8)
    } else if value > i16::MAX as i64 {
        (2, 4)
    } else if value > i8::MAX as i64 {
        (1, 2)
    } else {
        (0, 1)
    }
}

enum Object<'a> {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Date(Date),
    Data(&'a [u8]),
    String(&'a str),
    Array(Vec<u64>),
    Dictionary(Vec<u64>, Vec<u64>),
}

/// Flattens a value tree into objects addressed by index, in depth first order.
#[derive(Default)]
struct ObjectTable<'a> {
    objects: Vec<Object<'a>>,
    strings: IndexMap<&'a str, u64>,
}

impl<'a> ObjectTable<'a> {
    fn push(&mut self, object: Object<'a>) -> u64 {
        self.objects.push(object);
        (self.objects.len() - 1) as u64
    }

    fn add_string(&mut self, value: &'a str) -> u64 {
        if let Some(&index) = self.strings.get(value) {
            return index;
        }

        let index = self.push(Object::String(value));
        self.strings.insert(value, index);
        index
    }

    fn add_value(&mut self, value: &'a Value) -> u64 {
        match value {
            Value::Null => self.push(Object::Null),
            Value::Boolean(value) => self.push(Object::Boolean(*value)),
            Value::Integer(value) => self.push(Object::Integer(*value)),
            Value::Real(value) => self.push(Object::Real(*value)),
            Value::Date(value) => self.push(Object::Date(*value)),
            Value::Data(value) => self.push(Object::Data(value)),
            Value::String(value) => self.add_string(value),
            Value::Array(values) => {
                let index = self.push(Object::Null);
                let references = values.iter().map(|value| self.add_value(value)).collect();
                self.objects[index as usize] = Object::Array(references);
                index
            }
            Value::Dictionary(values) => {
                let index = self.push(Object::Null);
                let keys = values.keys().map(|key| self.add_string(key)).collect();
                let references = values.values().map(|value| self.add_value(value)).collect();
                self.objects[index as usize] = Object::Dictionary(keys, references);
                index
            }
        }
    }
}

struct BinaryWriter<T: Write> {
    buffer: T,
    position: u64,
    reference_size: usize,
}

impl<T: Write> BinaryWriter<T> {
    fn new(buffer: T, reference_size: usize) -> Self {
        Self {
            buffer,
            position: 0,
            reference_size,
        }
    }

    fn write_byte(&mut self, value: u8) -> Result<(), BinarySerializationError> {
        self.buffer.write_u8(value)?;
        self.position += 1;
        Ok(())
    }

    fn write_bytes(&mut self, value: &[u8]) -> Result<(), BinarySerializationError> {
        self.buffer.write_all(value)?;
        self.position += value.len() as u64;
        Ok(())
    }

    fn write_uint(&mut self, value: u64, size: usize) -> Result<(), BinarySerializationError> {
        self.buffer.write_uint::<BigEndian>(value, size)?;
        self.position += size as u64;
        Ok(())
    }

    fn write_u64(&mut self, value: u64) -> Result<(), BinarySerializationError> {
        self.write_uint(value, 8)
    }

    fn write_integer(&mut self, value: i64) -> Result<(), BinarySerializationError> {
        let (exponent, size) = integer_width(value);
        self.write_byte(MARKER_INTEGER | exponent)?;

        if value < 0 {
            self.buffer.write_i64::<BigEndian>(value)?;
            self.position += 8;
            return Ok(());
        }

        self.write_uint(value as u64, size)
    }

    fn write_marker(&mut self, marker: u8, count: usize) -> Result<(), BinarySerializationError> {
        if count < EXTENDED_COUNT as usize {
            return self.write_byte(marker | count as u8);
        }

        self.write_byte(marker | EXTENDED_COUNT)?;
        self.write_integer(count as i64)
    }

    fn write_references(&mut self, references: &[u64]) -> Result<(), BinarySerializationError> {
        for &reference in references {
            self.write_uint(reference, self.reference_size)?;
        }
        Ok(())
    }

    fn write_object(&mut self, object: &Object) -> Result<(), BinarySerializationError> {
        match object {
            Object::Null => self.write_byte(MARKER_NULL),
            Object::Boolean(false) => self.write_byte(MARKER_FALSE),
            Object::Boolean(true) => self.write_byte(MARKER_TRUE),
            Object::Integer(value) => self.write_integer(*value),
            Object::Real(value) => {
                self.write_byte(MARKER_REAL | 3)?;
                self.write_bytes(&value.to_be_bytes())
            }
            Object::Date(value) => {
                self.write_byte(MARKER_DATE | 3)?;
                self.write_bytes(&value.time_as_apple_epoch().to_be_bytes())
            }
            Object::Data(value) => {
                self.write_marker(MARKER_DATA, value.len())?;
                self.write_bytes(value)
            }
            Object::String(value) => {
                if value.is_ascii() {
                    self.write_marker(MARKER_ASCII_STRING, value.len())?;
                    return self.write_bytes(value.as_bytes());
                }

                let units: Vec<u16> = value.encode_utf16().collect();
                self.write_marker(MARKER_UNICODE_STRING, units.len())?;
                for &unit in &units {
                    self.buffer.write_u16::<BigEndian>(unit)?;
                }
                self.position += units.len() as u64 * 2;
                Ok(())
            }
            Object::Array(references) => {
                self.write_marker(MARKER_ARRAY, references.len())?;
                self.write_references(references)
            }
            Object::Dictionary(keys, values) => {
                self.write_marker(MARKER_DICTIONARY, keys.len())?;
                self.write_references(keys)?;
                self.write_references(values)
            }
        }
    }
}

/// Bounds checked cursor over the bytes of a single object.
struct ObjectCursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ObjectCursor<'a> {
    fn new(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    fn read_bytes(&mut self, length: usize) -> Result<&'a [u8], BinarySerializationError> {
        let end = self.position.checked_add(length).ok_or(BinarySerializationError::UnexpectedEndOfData)?;
        let bytes = self
            .data
            .get(self.position..end)
            .ok_or(BinarySerializationError::UnexpectedEndOfData)?;
        self.position = end;
        Ok(bytes)
    }

    fn read_byte(&mut self) -> Result<u8, BinarySerializationError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_uint(&mut self, size: usize) -> Result<u64, BinarySerializationError> {
        Ok(BigEndian::read_uint(self.read_bytes(size)?, size))
    }

    fn read_int(&mut self, size: usize) -> Result<i64, BinarySerializationError> {
        Ok(BigEndian::read_int(self.read_bytes(size)?, size))
    }

    /// Reads the element count carried in the marker's low nibble or in the integer object that follows it.
    ///
    /// Counts narrower than 8 bytes are unsigned, an 8 byte count must not be negative.
    fn read_count(&mut self, nibble: u8) -> Result<usize, BinarySerializationError> {
        if nibble != EXTENDED_COUNT {
            return Ok(nibble as usize);
        }

        let marker = self.read_byte()?;
        if marker & 0xF0 != MARKER_INTEGER || marker & 0x0F > 3 {
            return Err(BinarySerializationError::InvalidLength);
        }

        let size = 1 << (marker & 0x0F);
        let count = self.read_uint(size)?;
        if size == 8 && count > i64::MAX as u64 {
            return Err(BinarySerializationError::InvalidLength);
        }

        usize::try_from(count).map_err(|_| BinarySerializationError::InvalidLength)
    }

    fn read_references(&mut self, count: usize, size: usize) -> Result<Vec<u64>, BinarySerializationError> {
        let length = count.checked_mul(size).ok_or(BinarySerializationError::InvalidLength)?;
        let bytes = self.read_bytes(length)?;
        Ok(bytes.chunks_exact(size).map(|chunk| BigEndian::read_uint(chunk, size)).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Trailer {
    offset_size: usize,
    reference_size: usize,
    object_count: u64,
    root_object: u64,
    offset_table_offset: u64,
}

impl Trailer {
    fn from_bytes(data: &[u8]) -> Result<Self, BinarySerializationError> {
        let trailer = &data[data.len() - BinarySerializer::TRAILER_SIZE..];

        let trailer = Self {
            offset_size: trailer[6] as usize,
            reference_size: trailer[7] as usize,
            object_count: BigEndian::read_u64(&trailer[8..16]),
            root_object: BigEndian::read_u64(&trailer[16..24]),
            offset_table_offset: BigEndian::read_u64(&trailer[24..32]),
        };

        if !(1..=8).contains(&trailer.offset_size) {
            return Err(BinarySerializationError::InvalidTrailer("offset size"));
        }

        if !(1..=8).contains(&trailer.reference_size) {
            return Err(BinarySerializationError::InvalidTrailer("object reference size"));
        }

        if trailer.object_count == 0 {
            return Err(BinarySerializationError::InvalidTrailer("object count"));
        }

        if trailer.root_object >= trailer.object_count {
            return Err(BinarySerializationError::InvalidTrailer("root object"));
        }

        let table_end = trailer
            .object_count
            .checked_mul(trailer.offset_size as u64)
            .and_then(|length| length.checked_add(trailer.offset_table_offset));

        match table_end {
            Some(end) if trailer.offset_table_offset >= BinarySerializer::MAGIC.len() as u64 && end <= (data.len() - BinarySerializer::TRAILER_SIZE) as u64 => {
                Ok(trailer)
            }
            _ => Err(BinarySerializationError::InvalidTrailer("offset table position")),
        }
    }
}

struct BinaryReader<'a> {
    data: &'a [u8],
    trailer: Trailer,
    offsets: Vec<usize>,
    used: Vec<bool>,
    resolving: Vec<bool>,
}

impl<'a> BinaryReader<'a> {
    /// Nesting limit on top of the object count bound, keeping recursion within the stack.
    const MAX_DEPTH: usize = 1024;

    fn new(data: &'a [u8]) -> Result<Self, BinarySerializationError> {
        if data.len() < BinarySerializer::MAGIC.len() + BinarySerializer::TRAILER_SIZE {
            return Err(BinarySerializationError::TooShort);
        }

        if !data.starts_with(BinarySerializer::MAGIC) {
            return Err(BinarySerializationError::InvalidHeader);
        }

        let trailer = Trailer::from_bytes(data)?;
        let object_table_end = trailer.offset_table_offset as usize;

        let mut cursor = ObjectCursor::new(data, object_table_end);
        let mut offsets = Vec::with_capacity(trailer.object_count as usize);

        for _ in 0..trailer.object_count {
            let offset = cursor.read_uint(trailer.offset_size)?;
            if offset < BinarySerializer::MAGIC.len() as u64 || offset >= trailer.offset_table_offset {
                return Err(BinarySerializationError::OffsetOutOfBounds(offset));
            }
            offsets.push(offset as usize);
        }

        debug!(
            object_count = trailer.object_count,
            offset_size = trailer.offset_size,
            reference_size = trailer.reference_size,
            root = trailer.root_object,
            "Read binary property list trailer"
        );

        Ok(Self {
            data,
            trailer,
            used: vec![false; offsets.len()],
            resolving: vec![false; offsets.len()],
            offsets,
        })
    }

    fn read_root(&mut self) -> Result<Value, BinarySerializationError> {
        self.read_object(self.trailer.root_object, 0)
    }

    fn read_object(&mut self, index: u64, depth: usize) -> Result<Value, BinarySerializationError> {
        if index >= self.offsets.len() as u64 {
            return Err(BinarySerializationError::ObjectIndexOutOfBounds {
                index,
                count: self.offsets.len(),
            });
        }

        let offset = self.offsets[index as usize];

        if depth > self.offsets.len() || depth > Self::MAX_DEPTH {
            return Err(BinarySerializationError::NestingTooDeep);
        }

        let object_data = &self.data[..self.trailer.offset_table_offset as usize];
        let mut cursor = ObjectCursor::new(object_data, offset);
        let marker = cursor.read_byte()?;
        let nibble = marker & 0x0F;

        trace!(index, offset, marker, "Reading object");

        let value = match marker & 0xF0 {
            0x00 => match marker {
                MARKER_NULL => Value::Null,
                MARKER_FALSE => Value::Boolean(false),
                MARKER_TRUE => Value::Boolean(true),
                _ => return Err(BinarySerializationError::UnknownMarker(marker)),
            },
            MARKER_INTEGER if nibble <= 3 => Value::Integer(cursor.read_int(1 << nibble)?),
            MARKER_REAL if nibble == 2 => Value::Real(f32::from_bits(cursor.read_uint(4)? as u32) as f64),
            MARKER_REAL if nibble == 3 => Value::Real(f64::from_bits(cursor.read_uint(8)?)),
            MARKER_DATE if nibble == 3 => Value::Date(Date::from_apple_epoch(f64::from_bits(cursor.read_uint(8)?))),
            MARKER_DATA => {
                let length = cursor.read_count(nibble)?;
                Value::Data(cursor.read_bytes(length)?.to_vec())
            }
            MARKER_ASCII_STRING => {
                let length = cursor.read_count(nibble)?;
                let bytes = cursor.read_bytes(length)?;
                if !bytes.is_ascii() {
                    return Err(BinarySerializationError::InvalidString);
                }
                Value::String(bytes.iter().map(|&byte| byte as char).collect())
            }
            MARKER_UNICODE_STRING => {
                let length = cursor.read_count(nibble)?;
                let bytes = cursor.read_bytes(length.checked_mul(2).ok_or(BinarySerializationError::InvalidLength)?)?;
                let units: Vec<u16> = bytes.chunks_exact(2).map(BigEndian::read_u16).collect();
                Value::String(String::from_utf16(&units).map_err(|_| BinarySerializationError::InvalidString)?)
            }
            MARKER_ARRAY => {
                let length = cursor.read_count(nibble)?;
                let references = cursor.read_references(length, self.trailer.reference_size)?;

                self.enter_container(index)?;
                let mut values = Vec::with_capacity(references.len());
                for reference in references {
                    values.push(self.read_object(reference, depth + 1)?);
                }
                self.resolving[index as usize] = false;

                Value::Array(values)
            }
            MARKER_DICTIONARY => {
                let length = cursor.read_count(nibble)?;
                let keys = cursor.read_references(length, self.trailer.reference_size)?;
                let references = cursor.read_references(length, self.trailer.reference_size)?;

                self.enter_container(index)?;
                let mut values = Dictionary::new();
                for (key, reference) in keys.into_iter().zip(references) {
                    let key = match self.read_object(key, depth + 1)? {
                        Value::String(key) => key,
                        _ => return Err(BinarySerializationError::NonStringKey),
                    };

                    if values.contains_key(&key) {
                        return Err(BinarySerializationError::DuplicateKey(key));
                    }

                    let value = self.read_object(reference, depth + 1)?;
                    values.insert(key, value);
                }
                self.resolving[index as usize] = false;

                Value::Dictionary(values)
            }
            _ => return Err(BinarySerializationError::UnknownMarker(marker)),
        };

        Ok(value)
    }

    /// Marks a container as resolving.
    ///
    /// A container may be referenced once per document. Sharing one would let a small document
    /// expand into an exponentially large tree, so a second reference fails even without a cycle.
    fn enter_container(&mut self, index: u64) -> Result<(), BinarySerializationError> {
        let slot = index as usize;

        if self.resolving[slot] {
            return Err(BinarySerializationError::CyclicReference(index));
        }

        if self.used[slot] {
            return Err(BinarySerializationError::SharedContainer(index));
        }

        self.used[slot] = true;
        self.resolving[slot] = true;
        Ok(())
    }
}

/// Reads and writes the `bplist00` binary container format.
pub struct BinarySerializer;

impl BinarySerializer {
    pub const MAGIC: &'static [u8] = b"bplist00";
    pub const TRAILER_SIZE: usize = 32;
}

impl Serializer for BinarySerializer {
    type Error = BinarySerializationError;

    fn name() -> &'static str {
        "binary"
    }

    fn serialize(buffer: &mut impl Write, root: &Value) -> Result<(), Self::Error> {
        let mut table = ObjectTable::default();
        let root_object = table.add_value(root);
        let object_count = table.objects.len() as u64;
        let reference_size = unsigned_width(object_count - 1) as usize;

        let mut writer = BinaryWriter::new(buffer, reference_size);
        writer.write_bytes(Self::MAGIC)?;

        let mut offsets = Vec::with_capacity(table.objects.len());
        for object in &table.objects {
            offsets.push(writer.position);
            writer.write_object(object)?;
        }

        let offset_table_offset = writer.position;
        let offset_size = unsigned_width(offsets.iter().copied().max().unwrap_or_default()) as usize;

        for offset in offsets {
            writer.write_uint(offset, offset_size)?;
        }

        writer.write_bytes(&[0; 6])?;
        writer.write_byte(offset_size as u8)?;
        writer.write_byte(reference_size as u8)?;
        writer.write_u64(object_count)?;
        writer.write_u64(root_object)?;
        writer.write_u64(offset_table_offset)?;

        debug!(object_count, offset_size, reference_size, size = writer.position, "Wrote binary property list");

        Ok(())
    }

    fn deserialize(data: &[u8]) -> Result<Value, Self::Error> {
        let mut reader = BinaryReader::new(data)?;
        reader.read_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize(value: &Value) -> Vec<u8> {
        let mut buffer = Vec::new();
        BinarySerializer::serialize(&mut buffer, value).unwrap();
        buffer
    }

    /// Assembles a document from raw object encodings using one byte offsets and references.
    fn document(objects: &[&[u8]], root: u64) -> Vec<u8> {
        let mut data = BinarySerializer::MAGIC.to_vec();
        let mut offsets = Vec::new();
        for object in objects {
            offsets.push(data.len() as u8);
            data.extend_from_slice(object);
        }
        let offset_table_offset = data.len() as u64;
        data.extend_from_slice(&offsets);
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0, 1, 1]);
        data.extend_from_slice(&(objects.len() as u64).to_be_bytes());
        data.extend_from_slice(&root.to_be_bytes());
        data.extend_from_slice(&offset_table_offset.to_be_bytes());
        data
    }

    #[test]
    fn single_boolean_layout() {
        let data = serialize(&Value::Boolean(true));
        assert_eq!(data, document(&[&[MARKER_TRUE]], 0));
        assert_eq!(data.len(), 42);
    }

    #[test]
    fn integer_widths() {
        let cases: [(i64, &[u8]); 7] = [
            (0, &[0x10, 0x00]),
            (127, &[0x10, 0x7F]),
            (128, &[0x11, 0x00, 0x80]),
            (32767, &[0x11, 0x7F, 0xFF]),
            (32768, &[0x12, 0x00, 0x00, 0x80, 0x00]),
            (-3455, &[0x13, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xF2, 0x81]),
            (i64::MAX, &[0x13, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]),
        ];

        for (value, encoded) in cases {
            let data = serialize(&Value::Integer(value));
            assert_eq!(&data[8..8 + encoded.len()], encoded, "encoding of {value}");
            assert_eq!(BinarySerializer::deserialize(&data).unwrap(), Value::Integer(value));
        }
    }

    #[test]
    fn narrow_integers_are_sign_extended() {
        let data = document(&[&[0x10, 0xFF]], 0);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), Value::Integer(-1));

        let data = document(&[&[0x11, 0xF2, 0x81]], 0);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), Value::Integer(-3455));
    }

    #[test]
    fn float32_widens() {
        let mut object = vec![0x22];
        object.extend_from_slice(&1.5f32.to_be_bytes());
        let data = document(&[&object], 0);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), Value::Real(1.5));
    }

    #[test]
    fn count_escape_at_fifteen() {
        let fourteen = Value::Array((0..14).map(Value::from).collect());
        assert_eq!(serialize(&fourteen)[8], MARKER_ARRAY | 14);

        let fifteen = Value::Array((0..15).map(Value::from).collect());
        let data = serialize(&fifteen);
        assert_eq!(&data[8..11], &[MARKER_ARRAY | EXTENDED_COUNT, 0x10, 15]);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), fifteen);
    }

    #[test]
    fn strings_pick_ascii_or_utf16() {
        let data = serialize(&Value::from("hi"));
        assert_eq!(&data[8..11], &[0x52, b'h', b'i']);

        let data = serialize(&Value::from("h\u{e9}"));
        assert_eq!(&data[8..13], &[0x62, 0x00, b'h', 0x00, 0xE9]);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), Value::from("h\u{e9}"));
    }

    #[test]
    fn identical_strings_are_written_once() {
        let mut inner = Dictionary::new();
        inner.insert("name".into(), Value::from("name"));
        let value = Value::Array(vec![Value::from(inner.clone()), Value::from(inner)]);

        let data = serialize(&value);
        let object_count = BigEndian::read_u64(&data[data.len() - 24..data.len() - 16]);
        assert_eq!(object_count, 4);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), value);
    }

    #[test]
    fn dictionary_references_keys_then_values() {
        let mut dictionary = Dictionary::new();
        dictionary.insert("b".into(), Value::from(2));
        dictionary.insert("a".into(), Value::from(1));

        let data = serialize(&Value::from(dictionary.clone()));
        // dict, "a", "b", 1, 2
        assert_eq!(&data[8..13], &[0xD2, 1, 2, 3, 4]);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), Value::Dictionary(dictionary));
    }

    #[test]
    fn rejects_short_input() {
        let result = BinarySerializer::deserialize(b"bplist00");
        assert!(matches!(result, Err(BinarySerializationError::TooShort)));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = document(&[&[MARKER_TRUE]], 0);
        data[0] = b'x';
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::InvalidHeader)));
    }

    #[test]
    fn rejects_reference_beyond_object_count() {
        let data = document(&[&[0xA1, 5], &[MARKER_TRUE]], 0);
        assert!(matches!(
            BinarySerializer::deserialize(&data),
            Err(BinarySerializationError::ObjectIndexOutOfBounds { index: 5, count: 2 })
        ));
    }

    #[test]
    fn rejects_root_beyond_object_count() {
        let data = document(&[&[MARKER_TRUE]], 1);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::InvalidTrailer(_))));
    }

    #[test]
    fn rejects_cycles() {
        let data = document(&[&[0xA1, 0]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::CyclicReference(0))));
    }

    #[test]
    fn rejects_shared_containers() {
        let data = document(&[&[0xA2, 1, 1], &[0xA0]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::SharedContainer(1))));
    }

    #[test]
    fn rejects_unknown_marker() {
        let data = document(&[&[0x80, 0x01]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::UnknownMarker(0x80))));
    }

    #[test]
    fn rejects_truncated_payload() {
        let data = document(&[&[0x45, 1, 2]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::UnexpectedEndOfData)));
    }

    #[test]
    fn narrow_extended_counts_are_unsigned() {
        let mut object = vec![0x4F, 0x10, 200];
        object.extend(std::iter::repeat_n(7u8, 200));
        let data = document(&[&object], 0);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), Value::Data(vec![7; 200]));
    }

    #[test]
    fn rejects_negative_extended_count() {
        let data = document(&[&[0x4F, 0x13, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::InvalidLength)));
    }

    #[test]
    fn rejects_offset_outside_object_table() {
        let mut data = document(&[&[MARKER_TRUE]], 0);
        data[9] = 200;
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::OffsetOutOfBounds(200))));
    }

    #[test]
    fn rejects_high_bytes_in_ascii_strings() {
        let data = document(&[&[0x52, b'h', 0xE9]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::InvalidString)));
    }

    #[test]
    fn rejects_unpaired_surrogates() {
        let data = document(&[&[0x61, 0xD8, 0x00]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::InvalidString)));
    }

    #[test]
    fn shared_scalars_are_accepted() {
        let data = document(&[&[0xA2, 1, 1], &[0x51, b'a']], 0);
        assert_eq!(BinarySerializer::deserialize(&data).unwrap(), Value::Array(vec![Value::from("a"), Value::from("a")]));
    }

    #[test]
    fn rejects_non_string_keys() {
        let data = document(&[&[0xD1, 1, 1], &[0x10, 0x01]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::NonStringKey)));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let data = document(&[&[0xD2, 1, 1, 2, 2], &[0x51, b'a'], &[MARKER_TRUE]], 0);
        assert!(matches!(BinarySerializer::deserialize(&data), Err(BinarySerializationError::DuplicateKey(_))));
    }
}
