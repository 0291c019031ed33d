//! Saving a new graph and loading it back.

mod common;

use agstore::model::ChangeMarker;
use agstore::SqlAnnotationStore;

#[test]
fn on_disk_store_persists_across_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("agstore.db");
    {
        let mut store = SqlAnnotationStore::open(&path).unwrap();
        common::install_layers(&store);
        common::seed_transcript(&mut store, "disk.trs", "ada", &["hi", "ho"], 0.0, 2.0);
    }

    let store = SqlAnnotationStore::open(&path).unwrap();
    assert_eq!(store.get_graph_ids().unwrap(), vec!["disk.trs".to_string()]);
    let reloaded = store.get_graph("disk.trs").unwrap();
    assert_eq!(reloaded.annotations_in("word").len(), 2);
    assert_eq!(reloaded.corpus.as_deref(), Some("CC"));
}

#[test]
fn words_round_trip_with_ordinals_and_parents() {
    let mut store = common::test_store();
    let words = ["the", "quick", "brown", "fox"];
    common::seed_transcript(&mut store, "fox.trs", "ada", &words, 0.0, 4.0);

    let reloaded = store.get_graph("fox.trs").unwrap();
    let turns = reloaded.annotations_in("turn");
    assert_eq!(turns.len(), 1);
    // the stored speaker number resolves back to the participant name
    assert_eq!(turns[0].label, "ada");

    let loaded_words = reloaded.annotations_in("word");
    assert_eq!(loaded_words.len(), words.len());
    for (i, word) in loaded_words.iter().enumerate() {
        assert_eq!(word.label, words[i]);
        assert_eq!(word.ordinal, i as i64 + 1);
        assert_eq!(word.parent_id.as_ref(), Some(&turns[0].id));
        let (start, end) = reloaded.offsets_of(word);
        assert!(start.is_some() && end.is_some());
    }

    let participants = reloaded.annotations_in("participant");
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].label, "ada");

    assert_eq!(reloaded.corpus.as_deref(), Some("CC"));
    assert_eq!(reloaded.episode.as_deref(), Some("fox.trs-episode"));
    assert_eq!(reloaded.transcript_type.as_deref(), Some("interview"));
}

#[test]
fn save_assigns_durable_ids_in_memory() {
    let mut store = common::test_store();
    let graph = common::seed_transcript(&mut store, "ids.trs", "ada", &["hi"], 0.0, 1.0);

    assert!(!graph.has_changes());
    for annotation in graph.annotations() {
        assert!(!annotation.id.is_provisional(), "{}", annotation.id);
        assert_eq!(annotation.change, ChangeMarker::NoChange);
        assert!(!annotation.start_id.is_provisional());
        assert!(!annotation.end_id.is_provisional());
    }
    for anchor in graph.anchors() {
        assert!(!anchor.id.is_provisional());
    }
}

#[test]
fn graph_ids_resolve_by_pattern_and_row_id() {
    let mut store = common::test_store();
    let graph = common::seed_transcript(&mut store, "lookup.trs", "ada", &["hi"], 0.0, 1.0);
    let ag_id = graph.ag_id.unwrap();

    assert_eq!(store.get_graph("lookup.trs").unwrap().id, "lookup.trs");
    // suffix-tolerant: the caller may omit the extension
    assert_eq!(store.get_graph("lookup").unwrap().id, "lookup.trs");
    assert_eq!(store.get_graph(&ag_id.to_string()).unwrap().id, "lookup.trs");
    assert!(store.get_graph("no-such-graph").is_err());
}

#[test]
fn anchors_deduplicate_across_layers() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "dedupe.trs", "ada", &["a", "b"], 0.0, 2.0);

    let reloaded = store.get_graph_layers("dedupe.trs", &["word".into(), "turn".into()]).unwrap();
    // turn and word boundaries share anchors: 3 word bounds, turn reuses 2
    let aligned = reloaded.anchors().filter(|a| a.offset.is_some()).count();
    assert_eq!(aligned, 3);
}
