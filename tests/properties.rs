//! Invariant-level tests: posting round trips, ordering, deletion
//! visibility, snapshot isolation, merge transparency, top-K agreement
//! with a full scan, commit idempotence and phrase slop boundaries.

use std::sync::Arc;

use salix::document::Document;
use salix::index::{create_index, Index};
use salix::query::Query;
use salix::schema::{FieldDef, Schema};
use salix::search::SearchRequest;
use salix::storage::memory::MemoryStorage;
use salix::writer::{CommitMode, WriterConfig};

fn body_schema() -> Schema {
    // The `simple` analyzer keeps stop words, so token positions equal
    // word indices exactly.
    Schema::builder()
        .field("id", FieldDef::id().stored(true).unique(true))
        .field("body", FieldDef::text().with_analyzer("simple"))
        .build()
        .unwrap()
}

fn memory_index(schema: Schema) -> Index {
    create_index(Arc::new(MemoryStorage::default()), schema).unwrap()
}

fn add(writer: &mut salix::IndexWriter, id: &str, body: &str) {
    writer
        .add_document(
            Document::builder()
                .add_text("id", id)
                .add_text("body", body)
                .build(),
        )
        .unwrap();
}

fn ids_of(index: &Index, results: &salix::search::Results) -> Vec<String> {
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

#[test]
fn test_postings_round_trip() {
    let index = memory_index(body_schema());
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    add(&mut writer, "d0", "to be or not to be");
    writer.commit(CommitMode::Normal).unwrap();

    let reader = index.reader().unwrap();
    let (_, leaf) = reader.leaves().next().unwrap();

    // "to" occurs at positions 0 and 4, "be" at 1 and 5.
    let mut postings = leaf.postings("body", b"to").unwrap().unwrap();
    assert_eq!(postings.doc_id(), 0);
    assert_eq!(postings.frequency(), 2);
    assert_eq!(postings.positions(), &[0, 4]);
    assert!(!postings.advance().unwrap());

    let postings = leaf.postings("body", b"be").unwrap().unwrap();
    assert_eq!(postings.positions(), &[1, 5]);

    let postings = leaf.postings("body", b"not").unwrap().unwrap();
    assert_eq!(postings.frequency(), 1);
    assert_eq!(postings.positions(), &[3]);

    // Statistics agree with the text.
    let info = leaf.term_info("body", b"to").unwrap().unwrap();
    assert_eq!(info.doc_freq, 1);
    assert_eq!(info.total_freq, 2);
    assert_eq!(leaf.doc_field_length(0, "body").unwrap(), 6);
}

#[test]
fn test_posting_iteration_is_strictly_ascending() {
    let index = memory_index(body_schema());
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    for doc in 0..200 {
        let body = if doc % 3 == 0 {
            "shared word alpha"
        } else {
            "shared word beta"
        };
        add(&mut writer, &format!("d{doc}"), body);
    }
    writer.commit(CommitMode::Normal).unwrap();

    let reader = index.reader().unwrap();
    let mut postings = reader.postings("body", b"shared").unwrap();
    let mut previous = None;
    while !postings.is_exhausted() {
        let doc_id = postings.doc_id();
        if let Some(previous) = previous {
            assert!(doc_id > previous, "postings must strictly ascend");
        }
        previous = Some(doc_id);
        if !postings.advance().unwrap() {
            break;
        }
    }
    assert_eq!(previous, Some(199));
}

#[test]
fn test_deletion_visibility_and_doc_count() {
    let index = memory_index(body_schema());
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    add(&mut writer, "keep1", "stays around");
    add(&mut writer, "gone1", "doomed payload");
    add(&mut writer, "gone2", "doomed also");
    writer.commit(CommitMode::Normal).unwrap();
    assert_eq!(index.doc_count().unwrap(), 3);

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer.delete_by_term("body", "doomed").unwrap();
    writer.commit(CommitMode::Normal).unwrap();

    assert_eq!(index.doc_count().unwrap(), 1);
    let searcher = index.searcher().unwrap();
    for term in ["doomed", "payload", "also"] {
        let results = searcher
            .search(&Query::term("body", term), &SearchRequest::default())
            .unwrap();
        assert_eq!(results.len(), 0, "deleted docs must not match '{term}'");
    }
    let results = searcher
        .search(&Query::term("body", "stays"), &SearchRequest::default())
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[test]
fn test_delete_by_query() {
    let index = memory_index(body_schema());
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    add(&mut writer, "a", "red apple");
    add(&mut writer, "b", "red brick");
    add(&mut writer, "c", "blue sky");
    writer.commit(CommitMode::Normal).unwrap();

    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer
        .delete_by_query(Query::and(vec![
            Query::term("body", "red"),
            Query::term("body", "apple"),
        ]))
        .unwrap();
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let results = searcher
        .search(&Query::term("body", "red"), &SearchRequest::default())
        .unwrap();
    assert_eq!(ids_of(&index, &results), vec!["b"]);
}

#[test]
fn test_snapshot_isolation_until_refresh() {
    let index = memory_index(body_schema());
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    add(&mut writer, "old", "vintage entry");
    writer.commit(CommitMode::Normal).unwrap();

    let snapshot = index.reader().unwrap();
    let searcher_before =
        salix::search::Searcher::new(Arc::clone(&snapshot), Default::default());
    let query = Query::term("body", "entry");
    let before = searcher_before
        .search(&query, &SearchRequest::default())
        .unwrap();
    assert_eq!(before.len(), 1);

    // Two further commits: an addition and a deletion.
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    add(&mut writer, "new", "fresh entry");
    writer.commit(CommitMode::Normal).unwrap();
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    writer.delete_by_term("id", "old").unwrap();
    writer.commit(CommitMode::Normal).unwrap();

    // The old snapshot still answers identically.
    let again = searcher_before
        .search(&query, &SearchRequest::default())
        .unwrap();
    assert_eq!(again.doc_ids(), before.doc_ids());

    // A refresh observes the new state: "old" gone, "new" present.
    let refreshed = index.refresh(&snapshot).unwrap();
    let searcher_after = salix::search::Searcher::new(refreshed, Default::default());
    let after = searcher_after
        .search(&query, &SearchRequest::default())
        .unwrap();
    assert_eq!(after.len(), 1);
    let stored = searcher_after.document(after.hits[0].doc_id).unwrap();
    assert_eq!(stored.get("id").unwrap().as_text(), Some("new"));
}

#[test]
fn test_merge_preserves_semantics() {
    let index = memory_index(body_schema());

    // Three commits produce multiple segments.
    for (batch, words) in [
        ("x", "alpha beta gamma"),
        ("y", "alpha delta"),
        ("z", "beta delta epsilon"),
    ]
    .iter()
    .enumerate()
    {
        let mut writer = index.writer(WriterConfig::default()).unwrap();
        add(&mut writer, words.0, words.1);
        if batch == 1 {
            add(&mut writer, "extra", "alpha alpha alpha");
        }
        writer.commit(CommitMode::Normal).unwrap();
    }

    let searcher = index.searcher().unwrap();
    let query = Query::or(vec![
        Query::term("body", "alpha"),
        Query::term("body", "delta"),
    ]);
    let before = ids_of(
        &index,
        &searcher.search(&query, &SearchRequest::unlimited()).unwrap(),
    );

    // Force a full merge.
    let writer = index.writer(WriterConfig::default()).unwrap();
    writer.commit(CommitMode::Optimize).unwrap();

    let reader = index.reader().unwrap();
    assert_eq!(reader.segment_count(), 1);

    let searcher = index.searcher().unwrap();
    let after = ids_of(
        &index,
        &searcher.search(&query, &SearchRequest::unlimited()).unwrap(),
    );
    assert_eq!(after, before);
}

#[test]
fn test_top_k_agrees_with_full_scan() {
    let index = memory_index(body_schema());
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    let words = ["lion", "tiger", "bear", "wolf", "fox"];
    for doc in 0..60usize {
        // Deterministic but varied term mixes and field lengths.
        let mut body = String::new();
        for (idx, word) in words.iter().enumerate() {
            let repeats = (doc * (idx + 3)) % 5;
            for _ in 0..repeats {
                body.push_str(word);
                body.push(' ');
            }
        }
        if body.is_empty() {
            body.push_str("filler");
        }
        add(&mut writer, &format!("d{doc}"), body.trim());
    }
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    let query = Query::or(vec![
        Query::term("body", "lion"),
        Query::term("body", "bear"),
        Query::term("body", "fox"),
    ]);

    // The pruning top-K pipeline against the exhaustive scan.
    let top = searcher
        .search(&query, &SearchRequest::with_limit(10))
        .unwrap();
    let full = searcher
        .search(&query, &SearchRequest::unlimited())
        .unwrap();

    assert_eq!(top.len(), 10);
    let expected: Vec<u64> = full.doc_ids().into_iter().take(10).collect();
    assert_eq!(top.doc_ids(), expected);
    for (top_hit, full_hit) in top.hits.iter().zip(full.hits.iter()) {
        assert!((top_hit.score - full_hit.score).abs() < 1e-5);
    }
}

#[test]
fn test_commit_without_writes_is_a_noop() {
    let index = memory_index(body_schema());
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    add(&mut writer, "d", "something");
    let generation = writer.commit(CommitMode::Normal).unwrap();

    let writer = index.writer(WriterConfig::default()).unwrap();
    let same = writer.commit(CommitMode::Normal).unwrap();
    assert_eq!(same, generation);
    assert_eq!(index.latest_generation().unwrap(), generation);
}

#[test]
fn test_phrase_slop_boundary() {
    let index = memory_index(body_schema());
    let mut writer = index.writer(WriterConfig::default()).unwrap();
    // Position gaps between "start" and "end": 1, 2, 3.
    add(&mut writer, "gap1", "start end");
    add(&mut writer, "gap2", "start filler end");
    add(&mut writer, "gap3", "start filler filler end");
    writer.commit(CommitMode::Normal).unwrap();

    let searcher = index.searcher().unwrap();
    // Phrase(a, b, slop=k) matches exactly the docs with
    // 0 < pos(b) - pos(a) <= k + 1.
    for (slop, expected) in [
        (0u32, vec!["gap1"]),
        (1, vec!["gap1", "gap2"]),
        (2, vec!["gap1", "gap2", "gap3"]),
        (5, vec!["gap1", "gap2", "gap3"]),
    ] {
        let results = searcher
            .search(
                &Query::phrase("body", vec!["start", "end"], slop),
                &SearchRequest::unlimited(),
            )
            .unwrap();
        let mut ids = ids_of(&index, &results);
        ids.sort();
        assert_eq!(ids, expected, "slop={slop}");
    }

    // Reversed order never matches.
    let results = searcher
        .search(
            &Query::phrase("body", vec!["end", "start"], 10),
            &SearchRequest::unlimited(),
        )
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_unique_enforcement_across_commits() {
    let index = memory_index(body_schema());
    for round in 0..3 {
        let mut writer = index.writer(WriterConfig::default()).unwrap();
        writer
            .update_document(
                Document::builder()
                    .add_text("id", "/x")
                    .add_text("body", format!("round {round}"))
                    .build(),
            )
            .unwrap();
        writer.commit(CommitMode::Normal).unwrap();
    }

    let searcher = index.searcher().unwrap();
    let results = searcher
        .search(&Query::term("id", "/x"), &SearchRequest::default())
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(index.doc_count().unwrap(), 1);

    let latest = searcher
        .search(&Query::term("body", "2"), &SearchRequest::default())
        .unwrap();
    assert_eq!(latest.len(), 1);
}
