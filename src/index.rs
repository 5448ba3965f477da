//! The top-level index handle and the table-of-contents protocol.
//!
//! One generation of the index is described by one TOC file,
//! `<name>_<generation>.toc`; the latest generation is the highest
//! integer among existing TOC files. A TOC is written to a temp name,
//! fsynced and atomically renamed, so a commit's effects become visible
//! at the rename and readers never observe a half-written generation.

use std::sync::Arc;

use crate::analysis::AnalyzerRegistry;
use crate::codec::{FORMAT_VERSION, TOC_MAGIC};
use crate::error::{Result, SalixError};
use crate::reader::MultiReader;
use crate::schema::Schema;
use crate::search::Searcher;
use crate::segment::{FieldTotal, SegmentMeta};
use crate::storage::{Storage, StructReader, StructWriter};
use crate::writer::{IndexWriter, WriterConfig};

/// The default index name used for TOC and lock files.
pub const DEFAULT_INDEX_NAME: &str = "main";

/// One generation's manifest: schema, segments, generation number.
#[derive(Debug, Clone)]
pub struct Toc {
    /// Generation number; one commit produces one generation.
    pub generation: u64,
    /// The schema in force for this generation.
    pub schema: Schema,
    /// Segment records, in document-base order.
    pub segments: Vec<SegmentMeta>,
}

impl Toc {
    /// The canonical file name of this generation's TOC.
    pub fn file_name(&self, name: &str) -> String {
        Toc::file_name_for(name, self.generation)
    }

    /// The TOC file name of `(name, generation)`.
    pub fn file_name_for(name: &str, generation: u64) -> String {
        format!("{name}_{generation}.toc")
    }

    /// Find the highest generation with a TOC file, if any.
    pub fn latest_generation(storage: &dyn Storage, name: &str) -> Result<Option<u64>> {
        let prefix = format!("{name}_");
        let mut latest = None;
        for file in storage.list_files()? {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            let Some(number) = rest.strip_suffix(".toc") else {
                continue;
            };
            if let Ok(generation) = number.parse::<u64>() {
                latest = latest.max(Some(generation));
            }
        }
        Ok(latest)
    }

    /// Load the latest generation's TOC.
    pub fn load_latest(storage: &dyn Storage, name: &str) -> Result<Toc> {
        match Toc::latest_generation(storage, name)? {
            Some(generation) => Toc::load(storage, name, generation),
            None => Err(SalixError::EmptyIndex(name.to_string())),
        }
    }

    /// Load one generation's TOC, validating magic, format version and
    /// checksum.
    pub fn load(storage: &dyn Storage, name: &str, generation: u64) -> Result<Toc> {
        let input = storage.open_input(&Toc::file_name_for(name, generation))?;
        let mut reader = StructReader::new(input);

        let magic = reader.read_u32()?;
        if magic != TOC_MAGIC {
            return Err(SalixError::storage("not a table-of-contents file"));
        }
        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(SalixError::IncompatibleFormat {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        let stored_generation = reader.read_u64()?;
        let schema_blob = reader.read_bytes()?;
        let schema: Schema = serde_json::from_slice(&schema_blob)?;

        let segment_count = reader.read_u32()? as usize;
        let mut segments = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            let id = reader.read_string()?;
            let max_doc = reader.read_u64()?;
            let doc_count = reader.read_u64()?;
            let del_gen = reader.read_u64()?;
            let deletion_count = reader.read_u64()?;
            let byte_size = reader.read_u64()?;
            let totals_count = reader.read_varint()? as usize;
            let mut field_totals = Vec::with_capacity(totals_count);
            for _ in 0..totals_count {
                let field = reader.read_string()?;
                let total_length = reader.read_u64()?;
                let docs_with_field = reader.read_u64()?;
                field_totals.push(FieldTotal {
                    field,
                    total_length,
                    docs_with_field,
                });
            }
            segments.push(SegmentMeta {
                id,
                max_doc,
                doc_count,
                del_gen,
                deletion_count,
                byte_size,
                field_totals,
            });
        }
        reader.verify_checksum()?;

        Ok(Toc {
            generation: stored_generation,
            schema,
            segments,
        })
    }

    /// Write this TOC to a temp file, fsync, and atomically rename it to
    /// the canonical generation name.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let (temp_name, output) = storage.create_temp_output(&format!("{name}_toc_"))?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(TOC_MAGIC)?;
        writer.write_u32(FORMAT_VERSION)?;
        writer.write_u64(self.generation)?;
        writer.write_bytes(&serde_json::to_vec(&self.schema)?)?;
        writer.write_u32(self.segments.len() as u32)?;
        for meta in &self.segments {
            writer.write_string(&meta.id)?;
            writer.write_u64(meta.max_doc)?;
            writer.write_u64(meta.doc_count)?;
            writer.write_u64(meta.del_gen)?;
            writer.write_u64(meta.deletion_count)?;
            writer.write_u64(meta.byte_size)?;
            writer.write_varint(meta.field_totals.len() as u64)?;
            for total in &meta.field_totals {
                writer.write_string(&total.field)?;
                writer.write_u64(total.total_length)?;
                writer.write_u64(total.docs_with_field)?;
            }
        }
        writer.close()?;

        storage.rename_file(&temp_name, &self.file_name(name))?;
        storage.sync_directory()?;
        Ok(())
    }
}

/// The top-level handle: creates readers, writers and searchers against
/// one storage.
#[derive(Debug, Clone)]
pub struct Index {
    storage: Arc<dyn Storage>,
    name: String,
    analyzers: AnalyzerRegistry,
}

/// Create a new index with `schema` in `storage`, writing generation 0.
pub fn create_index(storage: Arc<dyn Storage>, schema: Schema) -> Result<Index> {
    create_index_named(storage, schema, DEFAULT_INDEX_NAME)
}

/// Create a new index under a non-default name.
pub fn create_index_named(
    storage: Arc<dyn Storage>,
    schema: Schema,
    name: &str,
) -> Result<Index> {
    schema.validate()?;
    if Toc::latest_generation(storage.as_ref(), name)?.is_some() {
        return Err(SalixError::storage(format!(
            "index '{name}' already exists"
        )));
    }
    let toc = Toc {
        generation: 0,
        schema,
        segments: Vec::new(),
    };
    toc.write(storage.as_ref(), name)?;
    Ok(Index {
        storage,
        name: name.to_string(),
        analyzers: AnalyzerRegistry::with_defaults(),
    })
}

/// Open an existing index; fails with `EmptyIndex` when no TOC exists.
pub fn open_index(storage: Arc<dyn Storage>) -> Result<Index> {
    open_index_named(storage, DEFAULT_INDEX_NAME)
}

/// Open an existing index under a non-default name.
pub fn open_index_named(storage: Arc<dyn Storage>, name: &str) -> Result<Index> {
    // Validate that a TOC exists and is readable up front.
    Toc::load_latest(storage.as_ref(), name)?;
    Ok(Index {
        storage,
        name: name.to_string(),
        analyzers: AnalyzerRegistry::with_defaults(),
    })
}

impl Index {
    /// Replace the analyzer registry handed to writers and searchers.
    pub fn with_analyzers(mut self, analyzers: AnalyzerRegistry) -> Self {
        self.analyzers = analyzers;
        self
    }

    /// The index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The storage backing this index.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The schema of the latest generation.
    pub fn schema(&self) -> Result<Schema> {
        Ok(Toc::load_latest(self.storage.as_ref(), &self.name)?.schema)
    }

    /// The latest committed generation number.
    pub fn latest_generation(&self) -> Result<u64> {
        Toc::latest_generation(self.storage.as_ref(), &self.name)?
            .ok_or_else(|| SalixError::EmptyIndex(self.name.clone()))
    }

    /// Open a snapshot reader over the latest generation.
    pub fn reader(&self) -> Result<Arc<MultiReader>> {
        let toc = Toc::load_latest(self.storage.as_ref(), &self.name)?;
        let schema = Arc::new(toc.schema);
        Ok(Arc::new(MultiReader::open(
            self.storage.as_ref(),
            schema,
            toc.segments,
            toc.generation,
        )?))
    }

    /// Reopen against the latest generation, reusing the segment readers
    /// `current` already holds for unchanged segments.
    pub fn refresh(&self, current: &MultiReader) -> Result<Arc<MultiReader>> {
        let toc = Toc::load_latest(self.storage.as_ref(), &self.name)?;
        if toc.generation == current.generation() {
            return Ok(Arc::new(current.clone()));
        }
        let schema = Arc::new(toc.schema);
        let mut readers = Vec::with_capacity(toc.segments.len());
        for meta in toc.segments {
            let reused = current.leaves().find_map(|(_, leaf)| {
                (leaf.meta().id == meta.id && leaf.meta().del_gen == meta.del_gen)
                    .then(|| leaf.clone())
            });
            match reused {
                Some(reader) => readers.push(reader),
                None => readers.push(crate::reader::SegmentReader::open(
                    self.storage.as_ref(),
                    Arc::clone(&schema),
                    meta,
                )?),
            }
        }
        Ok(Arc::new(MultiReader::new(
            schema,
            readers,
            toc.generation,
        )))
    }

    /// Open the single writer; fails with `Locked` while another writer
    /// holds the lock.
    pub fn writer(&self, config: WriterConfig) -> Result<IndexWriter> {
        IndexWriter::open(
            Arc::clone(&self.storage),
            self.name.clone(),
            self.analyzers.clone(),
            config,
        )
    }

    /// A searcher over the latest generation with default weighting.
    pub fn searcher(&self) -> Result<Searcher> {
        Ok(Searcher::new(self.reader()?, self.analyzers.clone()))
    }

    /// A searcher with a custom weighting model.
    pub fn searcher_with(
        &self,
        weighting: Arc<dyn crate::scoring::WeightingModel>,
    ) -> Result<Searcher> {
        Ok(Searcher::with_weighting(
            self.reader()?,
            self.analyzers.clone(),
            weighting,
        ))
    }

    /// Live documents in the latest generation.
    pub fn doc_count(&self) -> Result<u64> {
        let toc = Toc::load_latest(self.storage.as_ref(), &self.name)?;
        Ok(toc.segments.iter().map(|meta| meta.doc_count).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use crate::storage::memory::MemoryStorage;

    fn schema() -> Schema {
        Schema::builder()
            .field("body", FieldDef::text())
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_then_open() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let index = create_index(Arc::clone(&storage), schema()).unwrap();
        assert_eq!(index.latest_generation().unwrap(), 0);
        assert_eq!(index.doc_count().unwrap(), 0);

        let reopened = open_index(storage).unwrap();
        assert_eq!(reopened.latest_generation().unwrap(), 0);
        assert!(reopened.schema().unwrap().field("body").is_some());
    }

    #[test]
    fn test_open_missing_is_empty_index() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        assert!(matches!(
            open_index(storage),
            Err(SalixError::EmptyIndex(_))
        ));
    }

    #[test]
    fn test_create_twice_fails() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        create_index(Arc::clone(&storage), schema()).unwrap();
        assert!(create_index(storage, schema()).is_err());
    }

    #[test]
    fn test_toc_roundtrip() {
        let storage = MemoryStorage::default();
        let mut meta = SegmentMeta::new("00ff00ff00ff00ff".to_string(), 10);
        meta.doc_count = 9;
        meta.del_gen = 1;
        meta.deletion_count = 1;
        meta.byte_size = 4096;
        meta.field_totals.push(FieldTotal {
            field: "body".to_string(),
            total_length: 500,
            docs_with_field: 9,
        });
        let toc = Toc {
            generation: 7,
            schema: schema(),
            segments: vec![meta.clone()],
        };
        toc.write(&storage, "main").unwrap();

        let loaded = Toc::load(&storage, "main", 7).unwrap();
        assert_eq!(loaded.generation, 7);
        assert_eq!(loaded.segments, vec![meta]);
        assert_eq!(Toc::latest_generation(&storage, "main").unwrap(), Some(7));
    }

    #[test]
    fn test_latest_generation_picks_highest() {
        let storage = MemoryStorage::default();
        for generation in [0u64, 3, 11] {
            let toc = Toc {
                generation,
                schema: schema(),
                segments: Vec::new(),
            };
            toc.write(&storage, "main").unwrap();
        }
        assert_eq!(
            Toc::latest_generation(&storage, "main").unwrap(),
            Some(11)
        );
    }
}
