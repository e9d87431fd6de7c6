use std::{
    io::{Error, Write},
    str::{Utf8Error, from_utf8},
};

use base64::{DecodeError, Engine, engine::general_purpose::STANDARD};
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
    escape::partial_escape,
};
use thiserror::Error as ThisError;
use tracing::debug;

use crate::{Date, Dictionary, Serializer, Value};

#[derive(Debug, ThisError)]
pub enum XmlSerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] Error),
    #[error("XML Error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Invalid UTF-8 In Text: {0}")]
    Utf8(#[from] Utf8Error),
    #[error("Null Values Have No XML Representation")]
    NullValue,
    #[error("Date Out Of Calendar Range: {0}")]
    DateOutOfRange(f64),
    #[error("Document Has No Root Value")]
    MissingRoot,
    #[error("Unknown Element: {0}")]
    UnknownElement(String),
    #[error("Unexpected Element: {0}")]
    UnexpectedElement(String),
    #[error("Unexpected Text Outside Of Text Element")]
    UnexpectedText,
    #[error("Unterminated Element")]
    UnterminatedElement,
    #[error("Expected Key Element In Dictionary")]
    ExpectedKey,
    #[error("Key Has No Value: {0}")]
    MissingValue(String),
    #[error("Duplicate Dictionary Key: {0}")]
    DuplicateKey(String),
    #[error("Failed To Parse Integer: {0}")]
    InvalidInteger(String),
    #[error("Failed To Parse Real: {0}")]
    InvalidReal(String),
    #[error("Failed To Parse Date: {0}")]
    InvalidDate(String),
    #[error("Invalid Base64 Data: {0}")]
    InvalidBase64(#[from] DecodeError),
    #[error("Content After Root Element")]
    TrailingContent,
    #[error("Element Nesting Too Deep")]
    NestingTooDeep,
}

struct StringWriter<T: Write> {
    buffer: T,
    tab_index: usize,
}

impl<T: Write> StringWriter<T> {
    fn new(buffer: T) -> Self {
        Self { buffer, tab_index: 0 }
    }

    fn write_tabs(&mut self) -> Result<(), XmlSerializationError> {
        if self.tab_index == 0 {
            return Ok(());
        }
        self.buffer.write_all(&vec![b'\t'; self.tab_index])?;
        Ok(())
    }

    fn write_line(&mut self, string: &str) -> Result<(), XmlSerializationError> {
        self.write_tabs()?;
        self.buffer.write_all(string.as_bytes())?;
        self.buffer.write_all(b"\n")?;
        Ok(())
    }

    fn write_open_tag(&mut self, name: &str) -> Result<(), XmlSerializationError> {
        self.write_line(&format!("<{}>", name))?;
        self.tab_index += 1;
        Ok(())
    }

    fn write_close_tag(&mut self, name: &str) -> Result<(), XmlSerializationError> {
        self.tab_index -= 1;
        self.write_line(&format!("</{}>", name))
    }

    fn write_element(&mut self, name: &str, text: &str) -> Result<(), XmlSerializationError> {
        if text.is_empty() {
            return self.write_line(&format!("<{}/>", name));
        }
        self.write_line(&format!("<{}>{}</{}>", name, partial_escape(text), name))
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), XmlSerializationError> {
        if data.is_empty() {
            return self.write_line("<data/>");
        }

        self.write_line("<data>")?;
        let encoded = STANDARD.encode(data);
        for chunk in encoded.as_bytes().chunks(XmlSerializer::DATA_LINE_LENGTH) {
            self.write_tabs()?;
            self.buffer.write_all(chunk)?;
            self.buffer.write_all(b"\n")?;
        }
        self.write_line("</data>")
    }

    fn write_value(&mut self, value: &Value) -> Result<(), XmlSerializationError> {
        match value {
            Value::Null => return Err(XmlSerializationError::NullValue),
            Value::Boolean(true) => self.write_line("<true/>")?,
            Value::Boolean(false) => self.write_line("<false/>")?,
            Value::Integer(value) => self.write_element("integer", &value.to_string())?,
            Value::Real(value) => self.write_element("real", &format_real(*value))?,
            Value::Date(value) => {
                let text = value
                    .time_as_xml_convention()
                    .ok_or(XmlSerializationError::DateOutOfRange(value.time_as_apple_epoch()))?;
                self.write_element("date", &text)?
            }
            Value::Data(value) => self.write_data(value)?,
            Value::String(value) => self.write_element("string", value)?,
            Value::Array(values) => {
                if values.is_empty() {
                    return self.write_line("<array/>");
                }

                self.write_open_tag("array")?;
                for value in values {
                    self.write_value(value)?;
                }
                self.write_close_tag("array")?;
            }
            Value::Dictionary(values) => {
                if values.is_empty() {
                    return self.write_line("<dict/>");
                }

                self.write_open_tag("dict")?;
                for (key, value) in values {
                    self.write_element("key", key)?;
                    self.write_value(value)?;
                }
                self.write_close_tag("dict")?;
            }
        }
        Ok(())
    }
}

fn format_real(value: f64) -> String {
    if value.is_nan() {
        return String::from("nan");
    }

    if value.is_infinite() {
        return String::from(if value > 0f64 { "+infinity" } else { "-infinity" });
    }

    format!("{:?}", value)
}

fn parse_integer(text: &str) -> Result<i64, XmlSerializationError> {
    let trimmed = text.trim();

    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok().map(|value| value as i64),
        None => match trimmed.strip_prefix("-0x").or_else(|| trimmed.strip_prefix("-0X")) {
            Some(hex) => i64::from_str_radix(hex, 16).ok().and_then(i64::checked_neg),
            None => trimmed.parse::<i64>().ok(),
        },
    };

    parsed.ok_or_else(|| XmlSerializationError::InvalidInteger(trimmed.to_string()))
}

fn parse_real(text: &str) -> Result<f64, XmlSerializationError> {
    let trimmed = text.trim();
    trimmed.parse().map_err(|_| XmlSerializationError::InvalidReal(trimmed.to_string()))
}

fn parse_date(text: &str) -> Result<Date, XmlSerializationError> {
    let trimmed = text.trim();
    trimmed.parse().map_err(|_| XmlSerializationError::InvalidDate(trimmed.to_string()))
}

fn parse_data(text: &str) -> Result<Vec<u8>, XmlSerializationError> {
    let cleaned: Vec<u8> = text.bytes().filter(|byte| !byte.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(cleaned)?)
}

fn element_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

enum Tag<'a> {
    Start(BytesStart<'a>),
    Empty(BytesStart<'a>),
    End,
}

struct XmlReader<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> XmlReader<'a> {
    const MAX_DEPTH: usize = 1024;

    fn new(data: &'a [u8]) -> Self {
        let mut reader = Reader::from_reader(data);
        reader.config_mut().check_end_names = true;
        Self { reader }
    }

    /// Returns the next element boundary, skipping whitespace, comments and processing instructions.
    fn next_tag(&mut self) -> Result<Tag<'a>, XmlSerializationError> {
        loop {
            match self.reader.read_event()? {
                Event::Start(element) => return Ok(Tag::Start(element)),
                Event::Empty(element) => return Ok(Tag::Empty(element)),
                Event::End(_) => return Ok(Tag::End),
                Event::Text(text) if text.iter().all(u8::is_ascii_whitespace) => continue,
                Event::Comment(_) | Event::PI(_) => continue,
                Event::Eof => return Err(XmlSerializationError::UnterminatedElement),
                _ => return Err(XmlSerializationError::UnexpectedText),
            }
        }
    }

    fn read_document(&mut self) -> Result<Value, XmlSerializationError> {
        let root = loop {
            match self.reader.read_event()? {
                Event::Start(element) if element.name().as_ref() == b"plist" => {
                    let value = match self.next_tag()? {
                        Tag::Start(element) => self.read_value(element.name().as_ref(), false, 0)?,
                        Tag::Empty(element) => self.read_value(element.name().as_ref(), true, 0)?,
                        Tag::End => return Err(XmlSerializationError::MissingRoot),
                    };

                    match self.next_tag()? {
                        Tag::End => break value,
                        Tag::Start(element) | Tag::Empty(element) => {
                            return Err(XmlSerializationError::UnexpectedElement(element_name(element.name().as_ref())));
                        }
                    }
                }
                Event::Empty(element) if element.name().as_ref() == b"plist" => return Err(XmlSerializationError::MissingRoot),
                Event::Start(element) => break self.read_value(element.name().as_ref(), false, 0)?,
                Event::Empty(element) => break self.read_value(element.name().as_ref(), true, 0)?,
                Event::Text(text) if text.iter().all(u8::is_ascii_whitespace) => continue,
                Event::Decl(_) | Event::DocType(_) | Event::Comment(_) | Event::PI(_) => continue,
                Event::Eof => return Err(XmlSerializationError::MissingRoot),
                _ => return Err(XmlSerializationError::UnexpectedText),
            }
        };

        loop {
            match self.reader.read_event()? {
                Event::Eof => return Ok(root),
                Event::Text(text) if text.iter().all(u8::is_ascii_whitespace) => continue,
                Event::Comment(_) | Event::PI(_) => continue,
                _ => return Err(XmlSerializationError::TrailingContent),
            }
        }
    }

    fn read_value(&mut self, name: &[u8], empty: bool, depth: usize) -> Result<Value, XmlSerializationError> {
        if depth > Self::MAX_DEPTH {
            return Err(XmlSerializationError::NestingTooDeep);
        }

        let value = match name {
            b"dict" => Value::Dictionary(if empty { Dictionary::new() } else { self.read_dictionary(depth)? }),
            b"array" => Value::Array(if empty { Vec::new() } else { self.read_array(depth)? }),
            b"string" => Value::String(self.read_text(empty)?),
            b"integer" => Value::Integer(parse_integer(&self.read_text(empty)?)?),
            b"real" => Value::Real(parse_real(&self.read_text(empty)?)?),
            b"date" => Value::Date(parse_date(&self.read_text(empty)?)?),
            b"data" => Value::Data(parse_data(&self.read_text(empty)?)?),
            b"true" | b"false" => {
                if !self.read_text(empty)?.trim().is_empty() {
                    return Err(XmlSerializationError::UnexpectedText);
                }
                Value::Boolean(name == b"true")
            }
            _ => return Err(XmlSerializationError::UnknownElement(element_name(name))),
        };

        Ok(value)
    }

    /// Collects the text content up to the end of the current element.
    fn read_text(&mut self, empty: bool) -> Result<String, XmlSerializationError> {
        let mut content = String::new();

        if empty {
            return Ok(content);
        }

        loop {
            match self.reader.read_event()? {
                Event::Text(text) => content.push_str(&text.unescape()?),
                Event::CData(text) => content.push_str(from_utf8(&text)?),
                Event::Comment(_) | Event::PI(_) => continue,
                Event::End(_) => return Ok(content),
                Event::Start(element) | Event::Empty(element) => {
                    return Err(XmlSerializationError::UnexpectedElement(element_name(element.name().as_ref())));
                }
                Event::Eof => return Err(XmlSerializationError::UnterminatedElement),
                _ => return Err(XmlSerializationError::UnexpectedText),
            }
        }
    }

    fn read_array(&mut self, depth: usize) -> Result<Vec<Value>, XmlSerializationError> {
        let mut values = Vec::new();

        loop {
            match self.next_tag()? {
                Tag::Start(element) => values.push(self.read_value(element.name().as_ref(), false, depth + 1)?),
                Tag::Empty(element) => values.push(self.read_value(element.name().as_ref(), true, depth + 1)?),
                Tag::End => return Ok(values),
            }
        }
    }

    fn read_dictionary(&mut self, depth: usize) -> Result<Dictionary, XmlSerializationError> {
        let mut values = Dictionary::new();

        loop {
            let key = match self.next_tag()? {
                Tag::Start(element) if element.name().as_ref() == b"key" => self.read_text(false)?,
                Tag::Empty(element) if element.name().as_ref() == b"key" => String::new(),
                Tag::End => return Ok(values),
                _ => return Err(XmlSerializationError::ExpectedKey),
            };

            if values.contains_key(&key) {
                return Err(XmlSerializationError::DuplicateKey(key));
            }

            let value = match self.next_tag()? {
                Tag::Start(element) => self.read_value(element.name().as_ref(), false, depth + 1)?,
                Tag::Empty(element) => self.read_value(element.name().as_ref(), true, depth + 1)?,
                Tag::End => return Err(XmlSerializationError::MissingValue(key)),
            };

            values.insert(key, value);
        }
    }
}

/// Reads and writes the Apple XML property list format.
pub struct XmlSerializer;

impl XmlSerializer {
    pub const DECLARATION: &'static str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
    pub const DOCTYPE: &'static str = r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#;
    pub const DATA_LINE_LENGTH: usize = 68;

    const BYTE_ORDER_MARK: &'static [u8] = b"\xEF\xBB\xBF";
}

impl Serializer for XmlSerializer {
    type Error = XmlSerializationError;

    fn name() -> &'static str {
        "xml"
    }

    fn serialize(buffer: &mut impl Write, root: &Value) -> Result<(), Self::Error> {
        let mut writer = StringWriter::new(buffer);
        writer.write_line(Self::DECLARATION)?;
        writer.write_line(Self::DOCTYPE)?;
        writer.write_line(r#"<plist version="1.0">"#)?;
        writer.write_value(root)?;
        writer.write_line("</plist>")?;

        debug!(root = root.type_name(), "Wrote XML property list");

        Ok(())
    }

    fn deserialize(data: &[u8]) -> Result<Value, Self::Error> {
        let data = data.strip_prefix(Self::BYTE_ORDER_MARK).unwrap_or(data);
        let root = XmlReader::new(data).read_document()?;

        debug!(root = root.type_name(), "Read XML property list");

        Ok(root)
    }
}
