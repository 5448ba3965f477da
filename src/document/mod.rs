//! Documents and field values.

pub mod field_value;

pub use field_value::FieldValue;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A document: a mapping from field names to values.
///
/// Which fields are indexed, stored or columnar is decided by the schema at
/// write time, not by the document itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: HashMap<String, FieldValue>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document {
            fields: HashMap::new(),
        }
    }

    /// Start building a document.
    pub fn builder() -> DocumentBuilder {
        DocumentBuilder {
            doc: Document::new(),
        }
    }

    /// Add a field value, replacing any existing value of the same name.
    pub fn add_field<S: Into<String>>(&mut self, name: S, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Get a field value.
    pub fn get_field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Remove a field value.
    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// True if the document has a value for `name`.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over `(name, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Field names in unspecified order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Consume into the underlying map.
    pub fn into_fields(self) -> HashMap<String, FieldValue> {
        self.fields
    }
}

impl From<HashMap<String, FieldValue>> for Document {
    fn from(fields: HashMap<String, FieldValue>) -> Self {
        Document { fields }
    }
}

/// Fluent builder for [`Document`].
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    doc: Document,
}

impl DocumentBuilder {
    /// Add a text field.
    pub fn add_text<S: Into<String>, T: Into<String>>(mut self, name: S, value: T) -> Self {
        self.doc.add_field(name, FieldValue::Text(value.into()));
        self
    }

    /// Add an integer field.
    pub fn add_integer<S: Into<String>>(mut self, name: S, value: i64) -> Self {
        self.doc.add_field(name, FieldValue::Integer(value));
        self
    }

    /// Add a float field.
    pub fn add_float<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.doc.add_field(name, FieldValue::Float(value));
        self
    }

    /// Add a boolean field.
    pub fn add_boolean<S: Into<String>>(mut self, name: S, value: bool) -> Self {
        self.doc.add_field(name, FieldValue::Boolean(value));
        self
    }

    /// Add a datetime field.
    pub fn add_datetime<S: Into<String>>(
        mut self,
        name: S,
        value: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        self.doc.add_field(name, FieldValue::DateTime(value));
        self
    }

    /// Add a raw bytes field.
    pub fn add_bytes<S: Into<String>>(mut self, name: S, value: Vec<u8>) -> Self {
        self.doc.add_field(name, FieldValue::Bytes(value));
        self
    }

    /// Finish building.
    pub fn build(self) -> Document {
        self.doc
    }
}
