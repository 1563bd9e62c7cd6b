//! Dynamic values and the startup-time type table.
//!
//! Operations declare their parameter shapes as [`TypeInfo`] at endpoint
//! construction; the argument binder and response writer consume that table
//! at request time instead of re-inspecting anything.

use crate::error::EndpointError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// A runtime value flowing through the dispatch pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Guid(Uuid),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Record {
        type_name: String,
        fields: Vec<(String, Value)>,
    },
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Look up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record { fields, .. } => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Render the scalar wire text for this value, if it has one.
    pub fn to_xml_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Double(d) => Some(d.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Guid(g) => Some(g.to_string()),
            Value::DateTime(dt) => Some(dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::Bytes(b) => Some(BASE64.encode(b)),
            Value::List(_) | Value::Record { .. } => None,
        }
    }
}

/// Declared shape of a parameter, field, or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfo {
    Bool,
    Int,
    Double,
    String,
    Guid,
    DateTime,
    Bytes,
    List(Box<TypeInfo>),
    Complex(Arc<ComplexType>),
}

/// A named structured type, declared once and shared.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexType {
    pub name: String,
    pub namespace: String,
    pub fields: Vec<FieldInfo>,
}

/// One member of a [`ComplexType`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeInfo,
}

impl ComplexType {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: TypeInfo) -> Self {
        self.fields.push(FieldInfo {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn into_arc(self) -> Arc<ComplexType> {
        Arc::new(self)
    }
}

impl TypeInfo {
    /// Zero value used when an Out slot is still empty after binding.
    ///
    /// GUIDs default to the all-zero UUID; strings, lists, and byte arrays
    /// to their empty forms; records to a record with every field defaulted.
    /// Running this twice over the same slot yields the same value.
    pub fn default_value(&self) -> Value {
        match self {
            TypeInfo::Bool => Value::Bool(false),
            TypeInfo::Int => Value::Int(0),
            TypeInfo::Double => Value::Double(0.0),
            TypeInfo::String => Value::String(String::new()),
            TypeInfo::Guid => Value::Guid(Uuid::nil()),
            TypeInfo::DateTime => Value::DateTime(DateTime::<Utc>::UNIX_EPOCH),
            TypeInfo::Bytes => Value::Bytes(Vec::new()),
            TypeInfo::List(_) => Value::List(Vec::new()),
            TypeInfo::Complex(ct) => Value::Record {
                type_name: ct.name.clone(),
                fields: ct
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), f.ty.default_value()))
                    .collect(),
            },
        }
    }

    /// Parse XML element text into a scalar of this type.
    pub fn parse_text(&self, text: &str) -> Result<Value, EndpointError> {
        let text = text.trim();
        match self {
            TypeInfo::Bool => match text {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                other => Err(EndpointError::Binding(format!(
                    "'{}' is not a boolean",
                    other
                ))),
            },
            TypeInfo::Int => text
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| EndpointError::Binding(format!("'{}' is not an integer", text))),
            TypeInfo::Double => text
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| EndpointError::Binding(format!("'{}' is not a double", text))),
            TypeInfo::String => Ok(Value::String(text.to_string())),
            TypeInfo::Guid => Uuid::parse_str(text)
                .map(Value::Guid)
                .map_err(|_| EndpointError::Binding(format!("'{}' is not a GUID", text))),
            TypeInfo::DateTime => DateTime::parse_from_rfc3339(text)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| EndpointError::Binding(format!("'{}' is not a dateTime", text))),
            TypeInfo::Bytes => BASE64
                .decode(text)
                .map(Value::Bytes)
                .map_err(|_| EndpointError::Binding(format!("'{}' is not base64 data", text))),
            TypeInfo::List(_) | TypeInfo::Complex(_) => Err(EndpointError::Binding(format!(
                "'{}' cannot be read as text for a structured type",
                text
            ))),
        }
    }

    /// XSD type name used in generated metadata.
    pub fn xsd_name(&self) -> String {
        match self {
            TypeInfo::Bool => "xs:boolean".to_string(),
            TypeInfo::Int => "xs:long".to_string(),
            TypeInfo::Double => "xs:double".to_string(),
            TypeInfo::String | TypeInfo::Guid => "xs:string".to_string(),
            TypeInfo::DateTime => "xs:dateTime".to_string(),
            TypeInfo::Bytes => "xs:base64Binary".to_string(),
            TypeInfo::List(inner) => inner.xsd_name(),
            TypeInfo::Complex(ct) => format!("tns:{}", ct.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_parse() {
        assert_eq!(TypeInfo::Int.parse_text("42").unwrap(), Value::Int(42));
        assert_eq!(TypeInfo::Int.parse_text(" -7 ").unwrap(), Value::Int(-7));
        assert_eq!(
            TypeInfo::Bool.parse_text("true").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(TypeInfo::Bool.parse_text("0").unwrap(), Value::Bool(false));
        assert_eq!(
            TypeInfo::String.parse_text("hello").unwrap(),
            Value::String("hello".to_string())
        );
        assert_eq!(
            TypeInfo::Double.parse_text("2.5").unwrap(),
            Value::Double(2.5)
        );
    }

    #[test]
    fn test_scalar_parse_failures() {
        assert!(TypeInfo::Int.parse_text("abc").is_err());
        assert!(TypeInfo::Bool.parse_text("yes").is_err());
        assert!(TypeInfo::Guid.parse_text("not-a-guid").is_err());
        assert!(TypeInfo::DateTime.parse_text("2025-13-99").is_err());
    }

    #[test]
    fn test_guid_roundtrip() {
        let id = Uuid::new_v4();
        let parsed = TypeInfo::Guid.parse_text(&id.to_string()).unwrap();
        assert_eq!(parsed, Value::Guid(id));
        assert_eq!(parsed.to_xml_text().unwrap(), id.to_string());
    }

    #[test]
    fn test_bytes_base64() {
        let parsed = TypeInfo::Bytes.parse_text("aGVsbG8=").unwrap();
        assert_eq!(parsed, Value::Bytes(b"hello".to_vec()));
        assert_eq!(parsed.to_xml_text().unwrap(), "aGVsbG8=");
    }

    #[test]
    fn test_datetime_parse_and_format() {
        let parsed = TypeInfo::DateTime.parse_text("2025-06-15T10:00:00Z").unwrap();
        match &parsed {
            Value::DateTime(dt) => assert_eq!(dt.timestamp(), 1_749_981_600),
            other => panic!("unexpected value: {:?}", other),
        }
        assert_eq!(parsed.to_xml_text().unwrap(), "2025-06-15T10:00:00Z");
    }

    #[test]
    fn test_default_values() {
        assert_eq!(TypeInfo::Int.default_value(), Value::Int(0));
        assert_eq!(TypeInfo::Guid.default_value(), Value::Guid(Uuid::nil()));
        assert_eq!(
            TypeInfo::String.default_value(),
            Value::String(String::new())
        );
        assert_eq!(
            TypeInfo::List(Box::new(TypeInfo::Int)).default_value(),
            Value::List(Vec::new())
        );
    }

    #[test]
    fn test_complex_default_fills_all_fields() {
        let ct = ComplexType::new("Address", "http://example.org/types")
            .field("Street", TypeInfo::String)
            .field("Zip", TypeInfo::Int)
            .into_arc();
        let value = TypeInfo::Complex(ct).default_value();
        assert_eq!(value.field("Street"), Some(&Value::String(String::new())));
        assert_eq!(value.field("Zip"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_defaulting_is_idempotent() {
        let types = vec![
            TypeInfo::Bool,
            TypeInfo::Int,
            TypeInfo::String,
            TypeInfo::Guid,
            TypeInfo::Bytes,
            TypeInfo::List(Box::new(TypeInfo::String)),
        ];
        for ty in types {
            assert_eq!(ty.default_value(), ty.default_value());
        }
    }

    #[test]
    fn test_record_field_lookup() {
        let record = Value::Record {
            type_name: "Order".to_string(),
            fields: vec![
                ("Id".to_string(), Value::Int(7)),
                ("Sku".to_string(), Value::String("W-1".to_string())),
            ],
        };
        assert_eq!(record.field("Id"), Some(&Value::Int(7)));
        assert!(record.field("Missing").is_none());
        assert!(Value::Int(1).field("Id").is_none());
    }

    #[test]
    fn test_xsd_names() {
        assert_eq!(TypeInfo::Bool.xsd_name(), "xs:boolean");
        assert_eq!(TypeInfo::Int.xsd_name(), "xs:long");
        assert_eq!(TypeInfo::Bytes.xsd_name(), "xs:base64Binary");
        let ct = ComplexType::new("Order", "http://example.org").into_arc();
        assert_eq!(TypeInfo::Complex(ct).xsd_name(), "tns:Order");
    }
}
