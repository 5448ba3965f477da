//! Engine-level behaviors: file storage, locking, pool spilling,
//! parallel flush, expanding queries, facets, collapsing, matched terms,
//! time limits and key-term extraction.

use std::sync::Arc;

use salix::document::Document;
use salix::error::SalixError;
use salix::index::{create_index, open_index, Index};
use salix::query::Query;
use salix::schema::{ColumnKind, FieldDef, Schema};
use salix::search::facet::{Facet, FacetKey, FacetMapKind};
use salix::search::SearchRequest;
use salix::storage::file::FileStorage;
use salix::storage::memory::MemoryStorage;
use salix::writer::{CommitMode, WriterConfig};
use tempfile::TempDir;

fn catalog_schema() -> Schema {
    Schema::builder()
        .field("sku", FieldDef::id().stored(true).unique(true))
        .field("name", FieldDef::text())
        .field("color", FieldDef::id().sortable(ColumnKind::RefDict))
        .field("price", FieldDef::numeric())
        .build()
        .unwrap()
}

fn fill_catalog(index: &Index) {
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    let rows = [
        ("sku1", "wool sweater", "red", 80i64),
        ("sku2", "wool socks", "red", 12),
        ("sku3", "cotton shirt", "blue", 25),
        ("sku4", "cotton socks", "blue", 9),
        ("sku5", "silk scarf", "green", 40),
    ];
    for (sku, name, color, price) in rows {
        writer
            .add_document(
                Document::builder()
                    .add_text("sku", sku)
                    .add_text("name", name)
                    .add_text("color", color)
                    .add_integer("price", price)
                    .build(),
            )
            .unwrap();
    }
    writer.commit(CommitMode::Normal).unwrap();
}

fn skus(index: &Index, results: &salix::search::Results) -> Vec<String> {
    let reader = index.reader().unwrap();
    results
        .doc_ids()
        .iter()
        .map(|&doc_id| {
            reader
                .stored_fields(doc_id)
                .unwrap()
                .get("sku")
                .unwrap()
                .as_text()
                .unwrap()
                .to_string()
        })
        .collect()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_file_storage_end_to_end() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::open(dir.path()).unwrap());
    let index = create_index(storage, catalog_schema()).unwrap();
    fill_catalog(&index);

    // A separate handle opened from the same directory sees the data.
    let storage = Arc::new(FileStorage::open(dir.path()).unwrap());
    let reopened = open_index(storage).unwrap();
    assert_eq!(reopened.doc_count().unwrap(), 5);

    let searcher = reopened.searcher().unwrap();
    let results = searcher
        .search(&Query::term("name", "socks"), &SearchRequest::default())
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn test_writer_lock_exclusion() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    let writer = index.writer(WriterConfig::default()).unwrap();
    assert!(matches!(
        index.writer(WriterConfig::default()),
        Err(SalixError::Locked(_))
    ));

    // Cancelling releases the lock.
    writer.cancel().unwrap();
    let writer = index.writer(WriterConfig::default()).unwrap();
    drop(writer);
    // Dropping an unfinished writer also releases it.
    assert!(index.writer(WriterConfig::default()).is_ok());
}

#[test]
fn test_pool_spill_round_trip() {
    init_logging();
    let schema = Schema::builder()
        .field("id", FieldDef::id().stored(true))
        .field("body", FieldDef::text())
        .build()
        .unwrap();
    let index = create_index(Arc::new(MemoryStorage::default()), schema).unwrap();

    // A tiny budget forces several spill runs.
    let mut writer = index
        .writer(WriterConfig {
            buffer_mb: 0,
            procs: 1,
        })
        .unwrap();
    for doc in 0..3000 {
        writer
            .add_document(
                Document::builder()
                    .add_text("id", format!("doc{doc}"))
                    .add_text("body", format!("common filler token{} token{}", doc % 7, doc))
                    .build(),
            )
            .unwrap();
    }
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let results = searcher
        .search(&Query::term("body", "common"), &SearchRequest::unlimited())
        .unwrap();
    assert_eq!(results.len(), 3000);

    let results = searcher
        .search(&Query::term("body", "token3"), &SearchRequest::unlimited())
        .unwrap();
    // doc % 7 == 3 plus the literal doc 3 (deduplicated by document).
    assert_eq!(results.len(), 3000 / 7 + 1);
}

#[test]
fn test_parallel_flush_produces_equivalent_index() {
    let schema = Schema::builder()
        .field("id", FieldDef::id().stored(true))
        .field("body", FieldDef::text())
        .build()
        .unwrap();
    let index = create_index(Arc::new(MemoryStorage::default()), schema).unwrap();

    let mut writer = index
        .writer(WriterConfig {
            buffer_mb: 64,
            procs: 3,
        })
        .unwrap();
    for doc in 0..30 {
        writer
            .add_document(
                Document::builder()
                    .add_text("id", format!("doc{doc}"))
                    .add_text("body", "every document says hello")
                    .build(),
            )
            .unwrap();
    }
    writer.commit(CommitMode::Normal).unwrap();

    let reader = index.reader().unwrap();
    assert_eq!(reader.segment_count(), 3);
    assert_eq!(reader.doc_count(), 30);

    let searcher = index.searcher().unwrap();
    let results = searcher
        .search(&Query::term("body", "hello"), &SearchRequest::unlimited())
        .unwrap();
    assert_eq!(results.len(), 30);
}

#[test]
fn test_expanding_queries() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    let searcher = index.searcher().unwrap();

    // Prefix.
    let results = searcher
        .search(
            &Query::Prefix {
                field: "name".to_string(),
                prefix: "so".to_string(),
            },
            &SearchRequest::unlimited(),
        )
        .unwrap();
    assert_eq!(results.len(), 2);

    // Wildcard.
    let results = searcher
        .search(
            &Query::Wildcard {
                field: "name".to_string(),
                pattern: "s*".to_string(),
            },
            &SearchRequest::unlimited(),
        )
        .unwrap();
    // socks (x2), sweater, shirt, scarf, silk.
    assert_eq!(results.len(), 5);

    // Regex.
    let results = searcher
        .search(
            &Query::Regex {
                field: "name".to_string(),
                pattern: "wo+l".to_string(),
            },
            &SearchRequest::unlimited(),
        )
        .unwrap();
    assert_eq!(results.len(), 2);

    // Fuzzy: one edit away from "wool".
    let results = searcher
        .search(
            &Query::FuzzyTerm {
                field: "name".to_string(),
                text: "wools".to_string(),
                max_edits: 1,
                prefix_len: 2,
            },
            &SearchRequest::unlimited(),
        )
        .unwrap();
    assert_eq!(results.len(), 2);

    // Numeric range: 10 <= price < 40.
    let results = searcher
        .search(
            &Query::NumericRange {
                field: "price".to_string(),
                lower: Some(10),
                upper: Some(40),
                include_lower: true,
                include_upper: false,
            },
            &SearchRequest::unlimited(),
        )
        .unwrap();
    let mut found = skus(&index, &results);
    found.sort();
    assert_eq!(found, vec!["sku2", "sku3"]);

    // Term range over the id terms.
    let results = searcher
        .search(
            &Query::TermRange {
                field: "color".to_string(),
                lower: Some("blue".to_string()),
                upper: Some("green".to_string()),
                include_lower: true,
                include_upper: true,
            },
            &SearchRequest::unlimited(),
        )
        .unwrap();
    assert_eq!(results.len(), 3);

    // Variations: inflections of "sock" include the indexed "socks".
    let results = searcher
        .search(
            &Query::Variations {
                field: "name".to_string(),
                text: "sock".to_string(),
            },
            &SearchRequest::unlimited(),
        )
        .unwrap();
    assert_eq!(results.len(), 2);

    // An exact count agrees with the unlimited search.
    assert_eq!(searcher.count(&Query::term("name", "socks")).unwrap(), 2);
}

#[test]
fn test_custom_weighting_model() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);

    // Raw frequency scoring: a single occurrence scores exactly 1.0.
    let searcher = index
        .searcher_with(Arc::new(salix::scoring::Frequency))
        .unwrap();
    let results = searcher
        .search(&Query::term("name", "scarf"), &SearchRequest::default())
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.hits[0].score, 1.0);
}

#[test]
fn test_term_cap_limits_expansion() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    let mut searcher = index.searcher().unwrap();
    searcher.set_term_cap(1);

    let err = searcher
        .search(
            &Query::Prefix {
                field: "name".to_string(),
                prefix: "s".to_string(),
            },
            &SearchRequest::default(),
        )
        .unwrap_err();
    assert!(matches!(err, SalixError::TooManyTerms { .. }));
}

#[test]
fn test_numeric_field_rejects_text_terms() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    let searcher = index.searcher().unwrap();
    let err = searcher
        .search(&Query::term("price", "cheap"), &SearchRequest::default())
        .unwrap_err();
    assert!(matches!(err, SalixError::Query(_)));
}

#[test]
fn test_grouping_by_field_facet() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    let searcher = index.searcher().unwrap();

    let request = SearchRequest {
        grouped_by: vec![(
            "by_color".to_string(),
            Facet::field("color"),
            FacetMapKind::Count,
        )],
        ..SearchRequest::unlimited()
    };
    let results = searcher.search(&Query::Every(None), &request).unwrap();

    let groups = results.groups("by_color").unwrap();
    assert_eq!(groups.count(&FacetKey::Text("red".to_string())), 2);
    assert_eq!(groups.count(&FacetKey::Text("blue".to_string())), 2);
    assert_eq!(groups.count(&FacetKey::Text("green".to_string())), 1);
}

#[test]
fn test_grouping_by_ranges_and_queries() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    let searcher = index.searcher().unwrap();

    let request = SearchRequest {
        grouped_by: vec![
            (
                "by_price".to_string(),
                Facet::NumericRanges {
                    field: "price".to_string(),
                    start: 0,
                    end: 100,
                    gap: 50,
                },
                FacetMapKind::OrderedList,
            ),
            (
                "by_kind".to_string(),
                Facet::Queries {
                    buckets: vec![
                        ("socks".to_string(), Query::term("name", "socks")),
                        ("wool".to_string(), Query::term("name", "wool")),
                    ],
                },
                FacetMapKind::Count,
            ),
        ],
        ..SearchRequest::unlimited()
    };
    let results = searcher.search(&Query::Every(None), &request).unwrap();

    let by_price = results.groups("by_price").unwrap();
    // Prices 9, 12, 25, 40 fall in [0,50); 80 in [50,100).
    assert_eq!(by_price.docs(&FacetKey::Int(0)).len(), 4);
    assert_eq!(by_price.docs(&FacetKey::Int(50)).len(), 1);

    let by_kind = results.groups("by_kind").unwrap();
    assert_eq!(by_kind.count(&FacetKey::Text("socks".to_string())), 2);
    assert_eq!(by_kind.count(&FacetKey::Text("wool".to_string())), 2);
}

#[test]
fn test_collapse_keeps_best_per_key() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    let searcher = index.searcher().unwrap();

    let request = SearchRequest {
        collapse: Some(Facet::field("color")),
        collapse_limit: 1,
        ..SearchRequest::unlimited()
    };
    let results = searcher.search(&Query::Every(None), &request).unwrap();

    // One hit per color.
    assert_eq!(results.len(), 3);
    let removed: usize = results
        .collapsed_counts
        .iter()
        .map(|(_, count)| count)
        .sum();
    assert_eq!(removed, 2);
}

#[test]
fn test_matched_terms_recording() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    let searcher = index.searcher().unwrap();

    let query = Query::or(vec![
        Query::term("name", "wool"),
        Query::term("name", "scarf"),
    ]);
    let request = SearchRequest {
        with_terms: true,
        ..SearchRequest::unlimited()
    };
    let results = searcher.search(&query, &request).unwrap();

    for hit in &results.hits {
        let terms = hit.matched_terms.as_ref().unwrap();
        assert!(!terms.is_empty());
        for term in terms {
            assert_eq!(term.field, "name");
            assert!(term.text == "wool" || term.text == "scarf");
        }
    }
    // The scarf document matched only "scarf".
    let scarf_hit = results
        .hits
        .iter()
        .find(|hit| {
            index
                .reader()
                .unwrap()
                .stored_fields(hit.doc_id)
                .unwrap()
                .get("sku")
                .unwrap()
                .as_text()
                == Some("sku5")
        })
        .unwrap();
    let texts: Vec<&str> = scarf_hit
        .matched_terms
        .as_ref()
        .unwrap()
        .iter()
        .map(|term| term.text.as_str())
        .collect();
    assert_eq!(texts, vec!["scarf"]);
}

#[test]
fn test_expired_time_limit_yields_partial_results() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    let searcher = index.searcher().unwrap();

    let request = SearchRequest {
        time_limit: Some(std::time::Duration::from_secs(0)),
        ..SearchRequest::unlimited()
    };
    let results = searcher.search(&Query::Every(None), &request).unwrap();
    assert!(results.partial);
    assert!(results.len() < 5);
}

#[test]
fn test_key_terms_from_vectors() {
    let schema = Schema::builder()
        .field("id", FieldDef::id().stored(true))
        .field("body", FieldDef::text().with_vectors(true))
        .build()
        .unwrap();
    let index = create_index(Arc::new(MemoryStorage::default()), schema).unwrap();

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer
        .add_document(
            Document::builder()
                .add_text("id", "a")
                .add_text("body", "ferrite core inductors and ferrite beads")
                .build(),
        )
        .unwrap();
    for doc in 0..5 {
        writer
            .add_document(
                Document::builder()
                    .add_text("id", format!("pad{doc}"))
                    .add_text("body", "core material common everywhere")
                    .build(),
            )
            .unwrap();
    }
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let terms = searcher.key_terms(0, "body", 2).unwrap();
    // "ferrite" is rare and occurs twice; it must outrank "core".
    assert_eq!(terms[0].0, "ferrite");
}

#[test]
fn test_standalone_not_and_every_field() {
    let schema = Schema::builder()
        .field("id", FieldDef::id().stored(true))
        .field("body", FieldDef::text())
        .field("note", FieldDef::text())
        .build()
        .unwrap();
    let index = create_index(Arc::new(MemoryStorage::default()), schema).unwrap();

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer
        .add_document(
            Document::builder()
                .add_text("id", "with-note")
                .add_text("body", "alpha")
                .add_text("note", "annotated")
                .build(),
        )
        .unwrap();
    writer
        .add_document(
            Document::builder()
                .add_text("id", "plain")
                .add_text("body", "beta")
                .build(),
        )
        .unwrap();
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();

    let results = searcher
        .search(
            &Query::not(Query::term("body", "alpha")),
            &SearchRequest::unlimited(),
        )
        .unwrap();
    assert_eq!(skus_of(&index, &results), vec!["plain"]);

    let results = searcher
        .search(
            &Query::Every(Some("note".to_string())),
            &SearchRequest::unlimited(),
        )
        .unwrap();
    assert_eq!(skus_of(&index, &results), vec!["with-note"]);

    fn skus_of(index: &Index, results: &salix::search::Results) -> Vec<String> {
        let reader = index.reader().unwrap();
        results
            .doc_ids()
            .iter()
            .map(|&doc_id| {
                reader
                    .stored_fields(doc_id)
                    .unwrap()
                    .get("id")
                    .unwrap()
                    .as_text()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }
}

#[test]
fn test_clear_commit_replaces_index() {
    let index = create_index(Arc::new(MemoryStorage::default()), catalog_schema()).unwrap();
    fill_catalog(&index);
    assert_eq!(index.doc_count().unwrap(), 5);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer
        .add_document(
            Document::builder()
                .add_text("sku", "fresh")
                .add_text("name", "replacement stock")
                .build(),
        )
        .unwrap();
    writer.commit(CommitMode::Clear).unwrap();

    assert_eq!(index.doc_count().unwrap(), 1);
    let searcher = index.searcher().unwrap();
    let results = searcher
        .search(&Query::term("name", "wool"), &SearchRequest::default())
        .unwrap();
    assert!(results.is_empty());
}
