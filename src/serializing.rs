use std::{
    fs::{read, write},
    io::{self, ErrorKind, Write},
    path::Path,
};

use thiserror::Error as ThisError;
use tracing::debug;

use crate::{
    Value,
    serializers::{BinarySerializationError, BinarySerializer, XmlSerializationError, XmlSerializer},
};

/// A wire format that can write a value tree to bytes and read it back.
pub trait Serializer {
    type Error;

    /// The name of the format.
    fn name() -> &'static str;

    /// Writes the tree rooted at `root` to the buffer. The tree is only read.
    fn serialize(buffer: &mut impl Write, root: &Value) -> Result<(), Self::Error>;

    /// Reads a complete document. Nothing is returned unless the whole document is valid.
    fn deserialize(data: &[u8]) -> Result<Value, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Binary,
    Xml,
}

impl Format {
    /// Picks the format of a document from its leading bytes.
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(BinarySerializer::MAGIC) {
            return Format::Binary;
        }
        Format::Xml
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Binary => BinarySerializer::name(),
            Format::Xml => XmlSerializer::name(),
        }
    }
}

/// The broad category of a [`SerializationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The source or sink could not be read or written.
    UnreadableSource,
    /// The binary document is truncated or internally inconsistent.
    TruncatedOrCorruptBinary,
    /// The XML document is not a well formed property list.
    MalformedMarkup,
    /// The tree holds a value the chosen format cannot represent.
    Unrepresentable,
}

#[derive(Debug, ThisError)]
pub enum SerializationError {
    #[error("File Not Found")]
    FileNotFound,
    #[error("File Permission Denied")]
    FilePermissionDenied,
    #[error("File IO Error: {0}")]
    FileError(io::Error),
    #[error("Binary Error: {0}")]
    Binary(#[from] BinarySerializationError),
    #[error("XML Error: {0}")]
    Xml(#[from] XmlSerializationError),
}

impl SerializationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SerializationError::FileNotFound | SerializationError::FilePermissionDenied | SerializationError::FileError(_) => {
                ErrorCategory::UnreadableSource
            }
            SerializationError::Binary(BinarySerializationError::Io(_)) => ErrorCategory::UnreadableSource,
            SerializationError::Binary(_) => ErrorCategory::TruncatedOrCorruptBinary,
            SerializationError::Xml(XmlSerializationError::Io(_)) => ErrorCategory::UnreadableSource,
            SerializationError::Xml(XmlSerializationError::NullValue | XmlSerializationError::DateOutOfRange(_)) => ErrorCategory::Unrepresentable,
            SerializationError::Xml(_) => ErrorCategory::MalformedMarkup,
        }
    }
}

impl From<io::Error> for SerializationError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            ErrorKind::NotFound => SerializationError::FileNotFound,
            ErrorKind::PermissionDenied => SerializationError::FilePermissionDenied,
            _ => SerializationError::FileError(error),
        }
    }
}

/// Reads a document in either format, choosing the decoder from the document's header.
pub fn from_bytes(data: &[u8]) -> Result<Value, SerializationError> {
    let format = Format::detect(data);
    debug!(format = format.name(), size = data.len(), "Reading property list");

    match format {
        Format::Binary => Ok(BinarySerializer::deserialize(data)?),
        Format::Xml => Ok(XmlSerializer::deserialize(data)?),
    }
}

/// Writes the tree to the buffer in the given format.
pub fn to_writer(buffer: &mut impl Write, root: &Value, format: Format) -> Result<(), SerializationError> {
    match format {
        Format::Binary => BinarySerializer::serialize(buffer, root)?,
        Format::Xml => XmlSerializer::serialize(buffer, root)?,
    }
    Ok(())
}

/// Writes the tree to a new byte buffer in the given format.
pub fn to_bytes(root: &Value, format: Format) -> Result<Vec<u8>, SerializationError> {
    let mut buffer = Vec::new();
    to_writer(&mut buffer, root, format)?;
    Ok(buffer)
}

pub fn deserialize<P: AsRef<Path>>(path: P) -> Result<Value, SerializationError> {
    let data = read(path)?;
    from_bytes(&data)
}

pub fn serialize<P: AsRef<Path>>(path: P, root: &Value, format: Format) -> Result<(), SerializationError> {
    let data = to_bytes(root, format)?;
    write(path, data)?;
    Ok(())
}
