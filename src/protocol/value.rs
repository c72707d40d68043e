//! Typed property values and their tagged-string wire form.
//!
//! Every value travels as `<tag>:<payload>`. The tag alone determines how
//! the payload is parsed, so heterogeneous properties share one JSON field.
//! `n:` is an explicit null (the property was cleared), `x:` marks a value
//! that exists on the server but has no wire representation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::CodecError;
use super::event::EventKind;

/// Declared shape of a property, sent as `propValueType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueShape {
    String,
    Boolean,
    Integer,
    Position,
    Size,
    Enum,
    List,
    Events,
    Opaque,
}

impl ValueShape {
    pub fn tag(self) -> char {
        match self {
            ValueShape::String => 's',
            ValueShape::Boolean => 'b',
            ValueShape::Integer => 'i',
            ValueShape::Position => 'p',
            ValueShape::Size => 'd',
            ValueShape::Enum => 'e',
            ValueShape::List => 'l',
            ValueShape::Events => 'k',
            ValueShape::Opaque => 'x',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        Some(match tag {
            's' => ValueShape::String,
            'b' => ValueShape::Boolean,
            'i' => ValueShape::Integer,
            'p' => ValueShape::Position,
            'd' => ValueShape::Size,
            'e' => ValueShape::Enum,
            'l' => ValueShape::List,
            'k' => ValueShape::Events,
            'x' => ValueShape::Opaque,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueShape::String => "string",
            ValueShape::Boolean => "boolean",
            ValueShape::Integer => "integer",
            ValueShape::Position => "position",
            ValueShape::Size => "size",
            ValueShape::Enum => "enum",
            ValueShape::List => "list",
            ValueShape::Events => "events",
            ValueShape::Opaque => "opaque",
        }
    }

    pub fn parse(name: &str) -> Result<Self, CodecError> {
        Ok(match name {
            "string" => ValueShape::String,
            "boolean" => ValueShape::Boolean,
            "integer" => ValueShape::Integer,
            "position" => ValueShape::Position,
            "size" => ValueShape::Size,
            "enum" => ValueShape::Enum,
            "list" => ValueShape::List,
            "events" => ValueShape::Events,
            "opaque" => ValueShape::Opaque,
            other => return Err(CodecError::UnknownShape(other.to_string())),
        })
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const NULL_TAG: char = 'n';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Null,
    /// Server-only value (e.g. an upload handle) with no wire form.
    Opaque,
    Text(String),
    Bool(bool),
    Int(i64),
    Position { x: i32, y: i32 },
    Size { width: u32, height: u32 },
    Enum { type_name: String, value: String },
    List(Vec<String>),
    /// Which input kinds the component reacts to.
    Events(Vec<EventKind>),
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Text(value.into())
    }

    pub fn enumeration(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        PropertyValue::Enum {
            type_name: type_name.into(),
            value: value.into(),
        }
    }

    /// `None` for null, which fits every shape.
    pub fn shape(&self) -> Option<ValueShape> {
        Some(match self {
            PropertyValue::Null => return None,
            PropertyValue::Opaque => ValueShape::Opaque,
            PropertyValue::Text(_) => ValueShape::String,
            PropertyValue::Bool(_) => ValueShape::Boolean,
            PropertyValue::Int(_) => ValueShape::Integer,
            PropertyValue::Position { .. } => ValueShape::Position,
            PropertyValue::Size { .. } => ValueShape::Size,
            PropertyValue::Enum { .. } => ValueShape::Enum,
            PropertyValue::List(_) => ValueShape::List,
            PropertyValue::Events(_) => ValueShape::Events,
        })
    }

    pub fn fits(&self, shape: ValueShape) -> bool {
        self.shape().map_or(true, |own| own == shape)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        let tag = self.shape().map_or(NULL_TAG, ValueShape::tag);
        let payload = match self {
            PropertyValue::Null | PropertyValue::Opaque => String::new(),
            PropertyValue::Text(text) => text.clone(),
            PropertyValue::Bool(flag) => flag.to_string(),
            PropertyValue::Int(value) => value.to_string(),
            PropertyValue::Position { x, y } => format!("{x},{y}"),
            PropertyValue::Size { width, height } => format!("{width},{height}"),
            PropertyValue::Enum { type_name, value } => format!("{type_name}#{value}"),
            PropertyValue::List(items) => encode_list(items),
            PropertyValue::Events(kinds) => kinds
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(","),
        };
        format!("{tag}:{payload}")
    }

    /// Decode using only the tag.
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        let (tag, payload) = split_tag(raw)?;
        if tag == NULL_TAG {
            return Ok(PropertyValue::Null);
        }
        let shape = ValueShape::from_tag(tag).ok_or_else(|| CodecError::UnknownTag {
            tag: tag.to_string(),
        })?;
        decode_payload(shape, payload)
    }

    /// Decode and require the tag to match the declared shape (or be null).
    pub fn decode_as(shape: ValueShape, raw: &str) -> Result<Self, CodecError> {
        let (tag, _) = split_tag(raw)?;
        if tag != NULL_TAG && tag != shape.tag() {
            if ValueShape::from_tag(tag).is_none() {
                return Err(CodecError::UnknownTag {
                    tag: tag.to_string(),
                });
            }
            return Err(CodecError::ShapeMismatch {
                expected: shape,
                found: tag,
            });
        }
        Self::decode(raw)
    }
}

fn split_tag(raw: &str) -> Result<(char, &str), CodecError> {
    let Some((tag, payload)) = raw.split_once(':') else {
        return Err(CodecError::MissingTag {
            raw: raw.to_string(),
        });
    };
    let mut chars = tag.chars();
    match (chars.next(), chars.next()) {
        (Some(tag), None) => Ok((tag, payload)),
        _ => Err(CodecError::UnknownTag {
            tag: tag.to_string(),
        }),
    }
}

fn decode_payload(shape: ValueShape, payload: &str) -> Result<PropertyValue, CodecError> {
    let malformed = || CodecError::Malformed {
        shape,
        payload: payload.to_string(),
    };

    Ok(match shape {
        ValueShape::String => PropertyValue::Text(payload.to_string()),
        ValueShape::Boolean => match payload {
            "true" => PropertyValue::Bool(true),
            "false" => PropertyValue::Bool(false),
            _ => return Err(malformed()),
        },
        ValueShape::Integer => PropertyValue::Int(payload.parse().map_err(|_| malformed())?),
        ValueShape::Position => {
            let (x, y) = payload.split_once(',').ok_or_else(malformed)?;
            PropertyValue::Position {
                x: x.parse().map_err(|_| malformed())?,
                y: y.parse().map_err(|_| malformed())?,
            }
        }
        ValueShape::Size => {
            let (width, height) = payload.split_once(',').ok_or_else(malformed)?;
            PropertyValue::Size {
                width: width.parse().map_err(|_| malformed())?,
                height: height.parse().map_err(|_| malformed())?,
            }
        }
        ValueShape::Enum => {
            let (type_name, value) = payload.split_once('#').ok_or_else(malformed)?;
            if type_name.is_empty() {
                return Err(malformed());
            }
            PropertyValue::enumeration(type_name, value)
        }
        ValueShape::List => PropertyValue::List(decode_list(payload).ok_or_else(malformed)?),
        ValueShape::Events => {
            if payload.is_empty() {
                PropertyValue::Events(Vec::new())
            } else {
                let kinds = payload
                    .split(',')
                    .map(str::parse)
                    .collect::<Result<Vec<EventKind>, _>>()?;
                PropertyValue::Events(kinds)
            }
        }
        ValueShape::Opaque => PropertyValue::Opaque,
    })
}

// Every item is terminated by an unescaped ',' so that `[]` and `[""]`
// stay distinct.
fn encode_list(items: &[String]) -> String {
    let mut out = String::new();
    for item in items {
        for ch in item.chars() {
            if ch == ',' || ch == '\\' {
                out.push('\\');
            }
            out.push(ch);
        }
        out.push(',');
    }
    out
}

fn decode_list(payload: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = payload.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => current.push(chars.next()?),
            ',' => items.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        return None;
    }
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: PropertyValue) {
        let encoded = value.encode();
        assert_eq!(PropertyValue::decode(&encoded).unwrap(), value, "{encoded}");
        if let Some(shape) = value.shape() {
            assert_eq!(PropertyValue::decode_as(shape, &encoded).unwrap(), value);
        }
    }

    #[test]
    fn supported_shapes_round_trip() {
        round_trip(PropertyValue::text("Hi: there"));
        round_trip(PropertyValue::text(""));
        round_trip(PropertyValue::Bool(true));
        round_trip(PropertyValue::Int(-42));
        round_trip(PropertyValue::Position { x: -3, y: 17 });
        round_trip(PropertyValue::Size {
            width: 800,
            height: 600,
        });
        round_trip(PropertyValue::enumeration("ui.Alignment", "CENTER"));
        round_trip(PropertyValue::List(vec![
            "primary".to_string(),
            "a,b".to_string(),
            "back\\slash".to_string(),
        ]));
        round_trip(PropertyValue::List(Vec::new()));
        round_trip(PropertyValue::List(vec![String::new()]));
        round_trip(PropertyValue::Events(vec![EventKind::Select, EventKind::Text]));
        round_trip(PropertyValue::Null);
    }

    #[test]
    fn null_and_opaque_are_distinct() {
        assert_eq!(PropertyValue::Null.encode(), "n:");
        assert_eq!(PropertyValue::Opaque.encode(), "x:");
        assert_eq!(PropertyValue::decode("n:").unwrap(), PropertyValue::Null);
        assert_eq!(PropertyValue::decode("x:").unwrap(), PropertyValue::Opaque);
    }

    #[test]
    fn string_encoding_matches_wire_examples() {
        assert_eq!(PropertyValue::text("Hi").encode(), "s:Hi");
        assert_eq!(PropertyValue::Position { x: 1, y: 2 }.encode(), "p:1,2");
    }

    #[test]
    fn decode_errors_are_reported() {
        assert!(matches!(
            PropertyValue::decode("Hi"),
            Err(CodecError::MissingTag { .. })
        ));
        assert!(matches!(
            PropertyValue::decode("z:1"),
            Err(CodecError::UnknownTag { .. })
        ));
        assert!(matches!(
            PropertyValue::decode("b:yes"),
            Err(CodecError::Malformed { .. })
        ));
        assert!(matches!(
            PropertyValue::decode("l:dangling"),
            Err(CodecError::Malformed { .. })
        ));
        assert!(matches!(
            PropertyValue::decode("k:SELECT,JUMP"),
            Err(CodecError::UnknownEventKind(_))
        ));
    }

    #[test]
    fn declared_shape_must_match_tag() {
        assert_eq!(
            PropertyValue::decode_as(ValueShape::String, "b:true"),
            Err(CodecError::ShapeMismatch {
                expected: ValueShape::String,
                found: 'b'
            })
        );
        assert_eq!(
            PropertyValue::decode_as(ValueShape::Size, "n:").unwrap(),
            PropertyValue::Null
        );
    }

    #[test]
    fn shape_names_parse_back() {
        for shape in [
            ValueShape::String,
            ValueShape::Boolean,
            ValueShape::Integer,
            ValueShape::Position,
            ValueShape::Size,
            ValueShape::Enum,
            ValueShape::List,
            ValueShape::Events,
            ValueShape::Opaque,
        ] {
            assert_eq!(ValueShape::parse(shape.as_str()).unwrap(), shape);
            assert_eq!(ValueShape::from_tag(shape.tag()), Some(shape));
        }
        assert!(ValueShape::parse("blob").is_err());
    }
}
