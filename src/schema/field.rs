//! Field definitions.
//!
//! A field definition fixes, per field: the analyzer identity, which parts
//! of each posting are recorded, whether values are stored, whether the
//! field enforces uniqueness, the sortable column layout, and a score boost.

use serde::{Deserialize, Serialize};

/// What each posting records for a field. Document presence is always
/// recorded; the flags add payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostingFormat {
    /// Record per-document term frequencies.
    pub frequencies: bool,
    /// Record token positions (required for phrase queries).
    pub positions: bool,
    /// Record character offsets per position.
    pub characters: bool,
    /// Record per-position boost weights.
    pub position_boosts: bool,
}

impl PostingFormat {
    /// Document presence only.
    pub fn exists() -> Self {
        PostingFormat::default()
    }

    /// Presence and frequency.
    pub fn frequencies() -> Self {
        PostingFormat {
            frequencies: true,
            ..Default::default()
        }
    }

    /// Presence, frequency and positions.
    pub fn positions() -> Self {
        PostingFormat {
            frequencies: true,
            positions: true,
            ..Default::default()
        }
    }

    /// Presence, frequency, positions and character offsets.
    pub fn characters() -> Self {
        PostingFormat {
            frequencies: true,
            positions: true,
            characters: true,
            ..Default::default()
        }
    }

    /// Encode as a flags byte for block headers.
    pub fn flags(&self) -> u8 {
        (self.frequencies as u8)
            | (self.positions as u8) << 1
            | (self.characters as u8) << 2
            | (self.position_boosts as u8) << 3
    }

    /// Decode from a flags byte.
    pub fn from_flags(flags: u8) -> Self {
        PostingFormat {
            frequencies: flags & 1 != 0,
            positions: flags & 2 != 0,
            characters: flags & 4 != 0,
            position_boosts: flags & 8 != 0,
        }
    }
}

/// Element layout of a sortable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Sign-biased i64 values with a presence bitmap.
    Numeric,
    /// Variable-length byte strings behind an offset table.
    VarBytes,
    /// Fixed-width byte strings.
    FixedBytes(u32),
    /// A sorted dictionary of distinct values plus per-document references.
    RefDict,
    /// One bit per document.
    Bit,
}

/// The family a field belongs to. The kind decides how values are turned
/// into index terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Analyzed text.
    Text,
    /// A single untokenized keyword term.
    Id,
    /// Sign-biased big-endian i64 terms.
    Numeric,
    /// Epoch-millisecond datetimes through the numeric encoding.
    DateTime,
    /// Booleans through the numeric encoding.
    Boolean,
    /// Stored only, never indexed.
    Stored,
}

/// The full definition of one schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// The field family.
    pub kind: FieldKind,
    /// Registry name of the analyzer, for analyzed kinds.
    pub analyzer: Option<String>,
    /// What postings record.
    pub format: PostingFormat,
    /// Whether the field is searchable.
    pub indexed: bool,
    /// Whether values are kept retrievable.
    pub stored: bool,
    /// At most one live document per term of this field.
    pub unique: bool,
    /// Sortable column layout, if any.
    pub column: Option<ColumnKind>,
    /// Whether a forward term vector is written per document.
    pub vectors: bool,
    /// Multiplier applied to every term score in this field.
    pub boost: f32,
}

impl FieldDef {
    /// An analyzed full-text field using the `standard` analyzer.
    pub fn text() -> Self {
        FieldDef {
            kind: FieldKind::Text,
            analyzer: Some("standard".to_string()),
            format: PostingFormat::positions(),
            indexed: true,
            stored: false,
            unique: false,
            column: None,
            vectors: false,
            boost: 1.0,
        }
    }

    /// A single-term identifier field.
    pub fn id() -> Self {
        FieldDef {
            kind: FieldKind::Id,
            analyzer: Some("keyword".to_string()),
            format: PostingFormat::exists(),
            indexed: true,
            stored: false,
            unique: false,
            column: None,
            vectors: false,
            boost: 1.0,
        }
    }

    /// A sortable integer field with a numeric column.
    pub fn numeric() -> Self {
        FieldDef {
            kind: FieldKind::Numeric,
            analyzer: None,
            format: PostingFormat::exists(),
            indexed: true,
            stored: false,
            unique: false,
            column: Some(ColumnKind::Numeric),
            vectors: false,
            boost: 1.0,
        }
    }

    /// A sortable datetime field.
    pub fn datetime() -> Self {
        FieldDef {
            kind: FieldKind::DateTime,
            ..FieldDef::numeric()
        }
    }

    /// A boolean field.
    pub fn boolean() -> Self {
        FieldDef {
            kind: FieldKind::Boolean,
            column: Some(ColumnKind::Bit),
            ..FieldDef::numeric()
        }
    }

    /// A stored-only field.
    pub fn stored_only() -> Self {
        FieldDef {
            kind: FieldKind::Stored,
            analyzer: None,
            format: PostingFormat::exists(),
            indexed: false,
            stored: true,
            unique: false,
            column: None,
            vectors: false,
            boost: 1.0,
        }
    }

    /// Set the stored flag.
    pub fn stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    /// Set the unique flag.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Use a different registered analyzer.
    pub fn with_analyzer<S: Into<String>>(mut self, name: S) -> Self {
        self.analyzer = Some(name.into());
        self
    }

    /// Override the posting format.
    pub fn with_format(mut self, format: PostingFormat) -> Self {
        self.format = format;
        self
    }

    /// Attach a sortable column.
    pub fn sortable(mut self, kind: ColumnKind) -> Self {
        self.column = Some(kind);
        self
    }

    /// Record forward term vectors for this field.
    pub fn with_vectors(mut self, vectors: bool) -> Self {
        self.vectors = vectors;
        self
    }

    /// Set the field boost.
    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

/// Map an i64 onto bytes whose unsigned lexicographic order equals signed
/// numeric order: XOR the sign bit, then big-endian.
pub fn numeric_key_bytes(value: i64) -> [u8; 8] {
    ((value as u64) ^ (1u64 << 63)).to_be_bytes()
}

/// Inverse of [`numeric_key_bytes`].
pub fn numeric_key_from_bytes(bytes: &[u8]) -> Option<i64> {
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some((u64::from_be_bytes(array) ^ (1u64 << 63)) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posting_format_flags_roundtrip() {
        for format in [
            PostingFormat::exists(),
            PostingFormat::frequencies(),
            PostingFormat::positions(),
            PostingFormat::characters(),
        ] {
            assert_eq!(PostingFormat::from_flags(format.flags()), format);
        }
    }

    #[test]
    fn test_field_builders() {
        let field = FieldDef::text().stored(true).with_vectors(true);
        assert!(field.indexed);
        assert!(field.stored);
        assert!(field.vectors);
        assert_eq!(field.analyzer.as_deref(), Some("standard"));

        let field = FieldDef::id().unique(true);
        assert!(field.unique);
        assert_eq!(field.format, PostingFormat::exists());

        let field = FieldDef::stored_only();
        assert!(!field.indexed);
        assert!(field.stored);
    }

    #[test]
    fn test_numeric_key_preserves_order() {
        let values = [i64::MIN, -100, -1, 0, 1, 100, i64::MAX];
        let keys: Vec<[u8; 8]> = values.iter().map(|&v| numeric_key_bytes(v)).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for &value in &values {
            assert_eq!(
                numeric_key_from_bytes(&numeric_key_bytes(value)),
                Some(value)
            );
        }
    }
}
