//! Structures for serializing and deserializing.

mod binary;
pub use binary::BinarySerializationError;
pub use binary::BinarySerializer;

mod xml;
pub use xml::XmlSerializationError;
pub use xml::XmlSerializer;
