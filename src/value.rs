use std::collections::BTreeMap;

use thiserror::Error as ThisError;

use crate::Date;

pub type Data = Vec<u8>;
pub type Array = Vec<Value>;

/// A dictionary of values keyed by string.
///
/// Iteration, and therefore serialization, always follows ascending key order.
pub type Dictionary = BTreeMap<String, Value>;

/// Returned by the typed accessors when the stored variant is not the one asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
#[error("Expected {expected} Value But Found {found}")]
pub struct TypeMismatch {
    pub expected: &'static str,
    pub found: &'static str,
}

/// A single node of a property list document.
///
/// A value owns its children, so a tree built from values is always acyclic.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Date(Date),
    Data(Data),
    String(String),
    Array(Array),
    Dictionary(Dictionary),
}

impl Value {
    /// Returns the name of the stored variant as it appears in the XML format.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Date(_) => "date",
            Value::Data(_) => "data",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Dictionary(_) => "dict",
        }
    }

    fn mismatch(&self, expected: &'static str) -> TypeMismatch {
        TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Result<bool, TypeMismatch> {
        match self {
            Value::Boolean(value) => Ok(*value),
            _ => Err(self.mismatch("boolean")),
        }
    }

    pub fn as_integer(&self) -> Result<i64, TypeMismatch> {
        match self {
            Value::Integer(value) => Ok(*value),
            _ => Err(self.mismatch("integer")),
        }
    }

    pub fn as_real(&self) -> Result<f64, TypeMismatch> {
        match self {
            Value::Real(value) => Ok(*value),
            _ => Err(self.mismatch("real")),
        }
    }

    pub fn as_date(&self) -> Result<Date, TypeMismatch> {
        match self {
            Value::Date(value) => Ok(*value),
            _ => Err(self.mismatch("date")),
        }
    }

    pub fn as_data(&self) -> Result<&[u8], TypeMismatch> {
        match self {
            Value::Data(value) => Ok(value),
            _ => Err(self.mismatch("data")),
        }
    }

    pub fn as_string(&self) -> Result<&str, TypeMismatch> {
        match self {
            Value::String(value) => Ok(value),
            _ => Err(self.mismatch("string")),
        }
    }

    pub fn as_array(&self) -> Result<&Array, TypeMismatch> {
        match self {
            Value::Array(value) => Ok(value),
            _ => Err(self.mismatch("array")),
        }
    }

    pub fn as_array_mut(&mut self) -> Result<&mut Array, TypeMismatch> {
        match self {
            Value::Array(value) => Ok(value),
            _ => Err(self.mismatch("array")),
        }
    }

    pub fn as_dictionary(&self) -> Result<&Dictionary, TypeMismatch> {
        match self {
            Value::Dictionary(value) => Ok(value),
            _ => Err(self.mismatch("dict")),
        }
    }

    pub fn as_dictionary_mut(&mut self) -> Result<&mut Dictionary, TypeMismatch> {
        match self {
            Value::Dictionary(value) => Ok(value),
            _ => Err(self.mismatch("dict")),
        }
    }

    /// Returns the value stored under the key if this is a dictionary that has it.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&Value> {
        match self {
            Value::Dictionary(dictionary) => dictionary.get(key.as_ref()),
            _ => None,
        }
    }

    /// Returns the element at the index if this is an array long enough to have it.
    pub fn index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Array(array) => array.get(index),
            _ => None,
        }
    }
}

macro_rules! declare_value {
    ($qualifier:ty, $variant:path, $name:literal) => {
        impl From<$qualifier> for Value {
            fn from(value: $qualifier) -> Self {
                $variant(value)
            }
        }

        impl TryFrom<Value> for $qualifier {
            type Error = TypeMismatch;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                match value {
                    $variant(inner) => Ok(inner),
                    other => Err(TypeMismatch {
                        expected: $name,
                        found: other.type_name(),
                    }),
                }
            }
        }
    };
}

declare_value!(bool, Value::Boolean, "boolean");
declare_value!(i64, Value::Integer, "integer");
declare_value!(f64, Value::Real, "real");
declare_value!(Date, Value::Date, "date");
declare_value!(Data, Value::Data, "data");
declare_value!(String, Value::String, "string");
declare_value!(Array, Value::Array, "array");
declare_value!(Dictionary, Value::Dictionary, "dict");

macro_rules! declare_integer {
    ($($qualifier:ty),*) => {
        $(
            impl From<$qualifier> for Value {
                fn from(value: $qualifier) -> Self {
                    Value::Integer(value as i64)
                }
            }
        )*
    };
}

declare_integer!(i8, i16, i32, isize, u8, u16, u32);

impl TryFrom<u64> for Value {
    type Error = std::num::TryFromIntError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(Value::Integer(i64::try_from(value)?))
    }
}

impl TryFrom<usize> for Value {
    type Error = std::num::TryFromIntError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Ok(Value::Integer(i64::try_from(value)?))
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Real(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Data(value.to_vec())
    }
}

impl<'a> TryFrom<&'a Value> for &'a str {
    type Error = TypeMismatch;

    fn try_from(value: &'a Value) -> Result<Self, Self::Error> {
        value.as_string()
    }
}

impl<'a> TryFrom<&'a Value> for &'a [u8] {
    type Error = TypeMismatch;

    fn try_from(value: &'a Value) -> Result<Self, Self::Error> {
        value.as_data()
    }
}

impl<'a> TryFrom<&'a Value> for &'a Array {
    type Error = TypeMismatch;

    fn try_from(value: &'a Value) -> Result<Self, Self::Error> {
        value.as_array()
    }
}

impl<'a> TryFrom<&'a Value> for &'a Dictionary {
    type Error = TypeMismatch;

    fn try_from(value: &'a Value) -> Result<Self, Self::Error> {
        value.as_dictionary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_of_every_width_become_integer() {
        assert_eq!(Value::from(-3455i16), Value::Integer(-3455));
        assert_eq!(Value::from(3455i32), Value::Integer(3455));
        assert_eq!(Value::from(200u8), Value::Integer(200));
        assert_eq!(Value::from(u32::MAX), Value::Integer(u32::MAX as i64));
        assert_eq!(Value::try_from(u64::MAX).ok(), None);
        assert_eq!(Value::try_from(42usize).unwrap(), Value::Integer(42));
    }

    #[test]
    fn floats_widen_to_real() {
        assert_eq!(Value::from(1.5f32), Value::Real(1.5));
        assert_eq!(Value::from(1.34223f32).as_real().unwrap(), 1.34223f32 as f64);
    }

    #[test]
    fn accessors_do_not_coerce() {
        let value = Value::from(34);
        assert_eq!(value.as_integer(), Ok(34));
        assert_eq!(
            value.as_real(),
            Err(TypeMismatch {
                expected: "real",
                found: "integer"
            })
        );
        assert!(value.as_bool().is_err());
        assert!(Value::from("34").as_integer().is_err());
    }

    #[test]
    fn owned_conversions_report_mismatch() {
        let text: Result<String, _> = Value::from(true).try_into();
        assert_eq!(text.unwrap_err().found, "boolean");

        let data: Data = Value::from(vec![1u8, 2, 3]).try_into().unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn borrowed_conversions() {
        let value = Value::from("hello there");
        let text: &str = (&value).try_into().unwrap();
        assert_eq!(text, "hello there");

        let data: Result<&[u8], _> = (&value).try_into();
        assert!(data.is_err());
    }

    #[test]
    fn dictionary_iterates_in_key_order() {
        let mut dictionary = Dictionary::new();
        dictionary.insert("b".into(), Value::from(2));
        dictionary.insert("c".into(), Value::from(3));
        dictionary.insert("a".into(), Value::from(1));

        let keys: Vec<_> = dictionary.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let value = Value::from(dictionary);
        assert_eq!(value.get("c"), Some(&Value::Integer(3)));
        assert_eq!(value.get("d"), None);
        assert_eq!(value.index(0), None);
    }
}
