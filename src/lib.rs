//! Reading and writing property lists in the binary and XML formats.

mod date;

pub use date::Date;
pub use date::DateParseError;

mod value;

pub use value::Array;
pub use value::Data;
pub use value::Dictionary;
pub use value::TypeMismatch;
pub use value::Value;

mod serializing;

pub use serializing::ErrorCategory;
pub use serializing::Format;
pub use serializing::SerializationError;
pub use serializing::Serializer;
pub use serializing::deserialize;
pub use serializing::from_bytes;
pub use serializing::serialize;
pub use serializing::to_bytes;
pub use serializing::to_writer;

pub mod serializers;
