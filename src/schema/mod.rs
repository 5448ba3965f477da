//! Schema: the ordered mapping from field names to field definitions.
//!
//! The schema is fixed per segment and persisted in the table of contents.
//! Adding or removing fields is a write-side operation; the next commit
//! persists the new schema generation.

pub mod field;

pub use field::{numeric_key_bytes, numeric_key_from_bytes, ColumnKind, FieldDef, FieldKind,
    PostingFormat};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SalixError};

/// An ordered collection of named field definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SchemaData", into = "SchemaData")]
pub struct Schema {
    fields: Vec<(String, FieldDef)>,
    #[serde(skip)]
    by_name: AHashMap<String, u16>,
}

#[derive(Serialize, Deserialize)]
struct SchemaData {
    fields: Vec<(String, FieldDef)>,
}

impl From<SchemaData> for Schema {
    fn from(data: SchemaData) -> Self {
        let mut schema = Schema::new();
        schema.fields = data.fields;
        schema.rebuild_map();
        schema
    }
}

impl From<Schema> for SchemaData {
    fn from(schema: Schema) -> Self {
        SchemaData {
            fields: schema.fields,
        }
    }
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Schema {
            fields: Vec::new(),
            by_name: AHashMap::new(),
        }
    }

    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            schema: Schema::new(),
        }
    }

    /// Add a field. Fails on duplicate names or on more fields than field
    /// ids can address.
    pub fn add_field<S: Into<String>>(&mut self, name: S, def: FieldDef) -> Result<u16> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(SalixError::schema(format!("duplicate field: {name}")));
        }
        if self.fields.len() >= u16::MAX as usize {
            return Err(SalixError::schema("too many fields"));
        }
        let id = self.fields.len() as u16;
        self.by_name.insert(name.clone(), id);
        self.fields.push((name, def));
        Ok(id)
    }

    /// Remove a field by name. Field ids of remaining fields are unchanged;
    /// the slot is tombstoned.
    pub fn remove_field(&mut self, name: &str) -> Result<()> {
        let id = self
            .field_id(name)
            .ok_or_else(|| SalixError::NoSuchField(name.to_string()))?;
        self.fields[id as usize].1.indexed = false;
        self.fields[id as usize].1.stored = false;
        self.fields[id as usize].1.column = None;
        self.by_name.remove(name);
        Ok(())
    }

    /// Look up a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.field_id(name).map(|id| &self.fields[id as usize].1)
    }

    /// Look up a field definition, failing with `NoSuchField`.
    pub fn expect_field(&self, name: &str) -> Result<&FieldDef> {
        self.field(name)
            .ok_or_else(|| SalixError::NoSuchField(name.to_string()))
    }

    /// The numeric id of a field.
    pub fn field_id(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// The numeric id of a field, failing with `NoSuchField`.
    pub fn expect_field_id(&self, name: &str) -> Result<u16> {
        self.field_id(name)
            .ok_or_else(|| SalixError::NoSuchField(name.to_string()))
    }

    /// A field definition by id.
    pub fn field_by_id(&self, id: u16) -> Option<&FieldDef> {
        self.fields.get(id as usize).map(|(_, def)| def)
    }

    /// A field name by id.
    pub fn field_name(&self, id: u16) -> Option<&str> {
        self.fields.get(id as usize).map(|(name, _)| name.as_str())
    }

    /// Number of field slots (including tombstones).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are defined.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate `(id, name, def)` in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str, &FieldDef)> {
        self.fields
            .iter()
            .enumerate()
            .map(|(id, (name, def))| (id as u16, name.as_str(), def))
    }

    /// Names of fields with the unique flag.
    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, def)| def.unique)
            .map(|(name, _)| name.as_str())
    }

    /// Validate the schema: analyzed kinds need an analyzer, stored-only
    /// fields may not be indexed, character offsets require positions.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(SalixError::schema("schema has no fields"));
        }
        for (_, name, def) in self.iter() {
            if def.indexed
                && matches!(def.kind, FieldKind::Text | FieldKind::Id)
                && def.analyzer.is_none()
            {
                return Err(SalixError::schema(format!(
                    "field '{name}' is analyzed but has no analyzer"
                )));
            }
            if matches!(def.kind, FieldKind::Stored) && def.indexed {
                return Err(SalixError::schema(format!(
                    "field '{name}' is stored-only but marked indexed"
                )));
            }
            if def.format.characters && !def.format.positions {
                return Err(SalixError::schema(format!(
                    "field '{name}' records characters without positions"
                )));
            }
            if def.unique && !def.indexed {
                return Err(SalixError::schema(format!(
                    "field '{name}' is unique but not indexed"
                )));
            }
        }
        Ok(())
    }

    fn rebuild_map(&mut self) {
        self.by_name = self
            .fields
            .iter()
            .enumerate()
            .map(|(id, (name, _))| (name.clone(), id as u16))
            .collect();
    }
}

impl Default for Schema {
    fn default() -> Self {
        Schema::new()
    }
}

/// Fluent builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// Add a field, panicking on duplicates (builder use is static
    /// configuration).
    pub fn field<S: Into<String>>(mut self, name: S, def: FieldDef) -> Self {
        let name = name.into();
        if let Err(e) = self.schema.add_field(name, def) {
            panic!("schema builder: {e}");
        }
        self
    }

    /// Validate and finish.
    pub fn build(self) -> Result<Schema> {
        self.schema.validate()?;
        Ok(self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_lookup() {
        let schema = Schema::builder()
            .field("title", FieldDef::text().stored(true))
            .field("path", FieldDef::id().stored(true).unique(true))
            .field("body", FieldDef::text())
            .build()
            .unwrap();

        assert_eq!(schema.len(), 3);
        assert_eq!(schema.field_id("path"), Some(1));
        assert_eq!(schema.field_name(2), Some("body"));
        assert!(schema.field("title").unwrap().stored);
        assert!(schema.field("missing").is_none());
        assert_eq!(schema.unique_fields().collect::<Vec<_>>(), vec!["path"]);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut schema = Schema::new();
        schema.add_field("a", FieldDef::text()).unwrap();
        assert!(schema.add_field("a", FieldDef::text()).is_err());
    }

    #[test]
    fn test_validation() {
        let mut schema = Schema::new();
        assert!(schema.validate().is_err());

        let mut def = FieldDef::text();
        def.analyzer = None;
        schema.add_field("broken", def).unwrap();
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip_rebuilds_ids() {
        let schema = Schema::builder()
            .field("a", FieldDef::text())
            .field("b", FieldDef::numeric())
            .build()
            .unwrap();

        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.field_id("b"), Some(1));
        assert_eq!(back, schema);
    }

    #[test]
    fn test_remove_field_tombstones() {
        let mut schema = Schema::builder()
            .field("a", FieldDef::text())
            .field("b", FieldDef::text())
            .build()
            .unwrap();

        schema.remove_field("a").unwrap();
        assert!(schema.field("a").is_none());
        // Remaining ids are stable.
        assert_eq!(schema.field_id("b"), Some(1));
    }
}
