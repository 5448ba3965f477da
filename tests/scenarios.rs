//! End-to-end scenarios through the public API.

use std::sync::Arc;

use salix::document::Document;
use salix::index::{create_index, Index};
use salix::query::Query;
use salix::schema::{FieldDef, Schema};
use salix::search::SearchRequest;
use salix::storage::memory::MemoryStorage;
use salix::writer::{CommitMode, WriterConfig};

fn memory_index(schema: Schema) -> Index {
    create_index(Arc::new(MemoryStorage::default()), schema).unwrap()
}

#[test]
fn test_basic_index_and_search() {
    let schema = Schema::builder()
        .field("title", FieldDef::text().stored(true))
        .field("path", FieldDef::id().stored(true))
        .field("content", FieldDef::text())
        .build()
        .unwrap();
    let index = memory_index(schema);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer
        .add_document(
            Document::builder()
                .add_text("title", "First document")
                .add_text("path", "/a")
                .add_text("content", "This is the first document we've added")
                .build(),
        )
        .unwrap();
    writer
        .add_document(
            Document::builder()
                .add_text("title", "Second document")
                .add_text("path", "/b")
                .add_text("content", "The second one is even more interesting")
                .build(),
        )
        .unwrap();
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let results = searcher
        .search(&Query::term("content", "first"), &SearchRequest::default())
        .unwrap();
    assert_eq!(results.len(), 1);

    let stored = searcher.document(results.hits[0].doc_id).unwrap();
    assert_eq!(stored.get("path").unwrap().as_text(), Some("/a"));
    assert_eq!(
        stored.get("title").unwrap().as_text(),
        Some("First document")
    );
}

#[test]
fn test_phrase_slop() {
    let schema = Schema::builder()
        .field("content", FieldDef::text())
        .build()
        .unwrap();
    let index = memory_index(schema);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer
        .add_document(
            Document::builder()
                .add_text("content", "Mary had a little lamb")
                .build(),
        )
        .unwrap();
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();

    let hit = searcher
        .search(
            &Query::phrase("content", vec!["little", "lamb"], 1),
            &SearchRequest::default(),
        )
        .unwrap();
    assert_eq!(hit.len(), 1);

    let miss = searcher
        .search(
            &Query::phrase("content", vec!["Mary", "lamb"], 1),
            &SearchRequest::default(),
        )
        .unwrap();
    assert_eq!(miss.len(), 0);

    let wide = searcher
        .search(
            &Query::phrase("content", vec!["Mary", "lamb"], 4),
            &SearchRequest::default(),
        )
        .unwrap();
    assert_eq!(wide.len(), 1);
}

#[test]
fn test_unique_field_update() {
    let schema = Schema::builder()
        .field("path", FieldDef::id().stored(true).unique(true))
        .field("content", FieldDef::text())
        .build()
        .unwrap();
    let index = memory_index(schema);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    for version in ["one", "two", "three"] {
        writer
            .update_document(
                Document::builder()
                    .add_text("path", "/x")
                    .add_text("content", version)
                    .build(),
            )
            .unwrap();
    }
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let results = searcher
        .search(&Query::term("path", "/x"), &SearchRequest::default())
        .unwrap();
    assert_eq!(results.len(), 1);

    // The survivor is the most recently written version.
    let survivors = searcher
        .search(&Query::term("content", "three"), &SearchRequest::default())
        .unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors.hits[0].doc_id, results.hits[0].doc_id);
}

#[test]
fn test_boolean_combinations() {
    let schema = Schema::builder()
        .field("content", FieldDef::text())
        .build()
        .unwrap();
    let index = memory_index(schema);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer
        .add_document(Document::builder().add_text("content", "apple pie").build())
        .unwrap();
    writer
        .add_document(Document::builder().add_text("content", "apple").build())
        .unwrap();
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();

    let both = Query::and(vec![
        Query::term("content", "apple"),
        Query::term("content", "pie"),
    ]);
    let results = searcher.search(&both, &SearchRequest::default()).unwrap();
    assert_eq!(results.doc_ids(), vec![0]);

    let either = Query::or(vec![
        Query::term("content", "apple"),
        Query::term("content", "pie"),
    ]);
    let results = searcher.search(&either, &SearchRequest::default()).unwrap();
    assert_eq!(results.len(), 2);

    let and_not = Query::and_not(
        Query::term("content", "apple"),
        Query::term("content", "pie"),
    );
    let results = searcher.search(&and_not, &SearchRequest::default()).unwrap();
    assert_eq!(results.doc_ids(), vec![1]);
}

#[test]
fn test_nested_group_parent_lookup() {
    let schema = Schema::builder()
        .field("kind", FieldDef::id())
        .field("name", FieldDef::id().stored(true))
        .build()
        .unwrap();
    let index = memory_index(schema);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    {
        let mut group = writer.group();
        group
            .add_document(
                Document::builder()
                    .add_text("kind", "class")
                    .add_text("name", "Index")
                    .build(),
            )
            .unwrap();
        group
            .add_document(
                Document::builder()
                    .add_text("kind", "method")
                    .add_text("name", "add")
                    .build(),
            )
            .unwrap();
        group
            .add_document(
                Document::builder()
                    .add_text("kind", "method")
                    .add_text("name", "close")
                    .build(),
            )
            .unwrap();
    }
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let query = Query::NestedParent {
        parents: Box::new(Query::term("kind", "class")),
        children: Box::new(Query::term("name", "close")),
    };
    let results = searcher.search(&query, &SearchRequest::default()).unwrap();
    assert_eq!(results.len(), 1);

    let parent = searcher.document(results.hits[0].doc_id).unwrap();
    assert_eq!(parent.get("name").unwrap().as_text(), Some("Index"));
}

#[test]
fn test_nested_children_lookup() {
    let schema = Schema::builder()
        .field("kind", FieldDef::id())
        .field("name", FieldDef::id().stored(true))
        .build()
        .unwrap();
    let index = memory_index(schema);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    {
        let mut group = writer.group();
        for (kind, name) in [("class", "Index"), ("method", "add"), ("method", "close")] {
            group
                .add_document(
                    Document::builder()
                        .add_text("kind", kind)
                        .add_text("name", name)
                        .build(),
                )
                .unwrap();
        }
    }
    {
        let mut group = writer.group();
        for (kind, name) in [("class", "Reader"), ("method", "open")] {
            group
                .add_document(
                    Document::builder()
                        .add_text("kind", kind)
                        .add_text("name", name)
                        .build(),
                )
                .unwrap();
        }
    }
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let query = Query::NestedChildren {
        parents: Box::new(Query::term("kind", "class")),
        parent_filter: Box::new(Query::term("name", "Index")),
    };
    let results = searcher
        .search(&query, &SearchRequest::unlimited())
        .unwrap();

    let names: Vec<String> = results
        .doc_ids()
        .iter()
        .map(|&doc_id| {
            searcher
                .document(doc_id)
                .unwrap()
                .get("name")
                .unwrap()
                .as_text()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(names, vec!["add", "close"]);
}

#[test]
fn test_sort_by_numeric_column() {
    let schema = Schema::builder()
        .field("name", FieldDef::id().stored(true))
        .field("price", FieldDef::numeric())
        .build()
        .unwrap();
    let index = memory_index(schema);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    for (name, price) in [("a", 20i64), ("b", 10), ("c", 15)] {
        writer
            .add_document(
                Document::builder()
                    .add_text("name", name)
                    .add_integer("price", price)
                    .build(),
            )
            .unwrap();
    }
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let prices = |results: &salix::search::Results| -> Vec<i64> {
        results
            .doc_ids()
            .iter()
            .map(|&doc_id| {
                searcher
                    .reader()
                    .stored_fields(doc_id)
                    .unwrap()
                    .get("name")
                    .unwrap()
                    .as_text()
                    .map(|name| match name {
                        "a" => 20,
                        "b" => 10,
                        _ => 15,
                    })
                    .unwrap()
            })
            .collect()
    };

    let request = SearchRequest {
        sorted_by: Some(salix::search::facet::Facet::field("price")),
        ..SearchRequest::default()
    };
    let results = searcher.search(&Query::Every(None), &request).unwrap();
    assert_eq!(prices(&results), vec![10, 15, 20]);

    let request = SearchRequest {
        sorted_by: Some(salix::search::facet::Facet::field("price")),
        reverse: true,
        ..SearchRequest::default()
    };
    let results = searcher.search(&Query::Every(None), &request).unwrap();
    assert_eq!(prices(&results), vec![20, 15, 10]);
}
