//! Change-log save behavior: idempotence, destroy safety, validation.

mod common;

use agstore::store::ValidationPolicy;
use agstore::StoreError;

#[test]
fn empty_change_log_is_a_no_op() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "noop.trs", "ada", &["hi"], 0.0, 1.0);

    let mut reloaded = store.get_graph("noop.trs").unwrap();
    assert!(!reloaded.has_changes());
    assert!(!store.save_graph(&mut reloaded).unwrap());
}

#[test]
fn destroying_a_referenced_anchor_is_refused() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "safety.trs", "ada", &["hi", "ho"], 0.0, 2.0);

    let mut reloaded = store.get_graph("safety.trs").unwrap();
    let anchor_count = reloaded.anchors().count();
    // the shared middle anchor bounds both words
    let shared = reloaded.annotations_in("word")[0].end_id.clone();
    reloaded.destroy_anchor(&shared);
    store.save_graph(&mut reloaded).unwrap();

    let again = store.get_graph("safety.trs").unwrap();
    assert!(again.has_anchor(&shared), "refused destroy must keep the anchor");
    assert_eq!(again.anchors().count(), anchor_count);
}

#[test]
fn destroying_a_word_removes_its_row() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "del.trs", "ada", &["hi", "ho"], 0.0, 2.0);

    let mut reloaded = store.get_graph("del.trs").unwrap();
    let doomed = reloaded.annotations_in("word")[1].id.clone();
    reloaded.destroy_annotation(&doomed);
    assert!(store.save_graph(&mut reloaded).unwrap());
    assert!(reloaded.annotation(&doomed).is_none());

    let again = store.get_graph("del.trs").unwrap();
    assert_eq!(again.annotations_in("word").len(), 1);
}

#[test]
fn label_updates_persist() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "upd.trs", "ada", &["teh"], 0.0, 1.0);

    let mut reloaded = store.get_graph("upd.trs").unwrap();
    let word = reloaded.annotations_in("word")[0].id.clone();
    reloaded.update_label(&word, "the");
    assert!(store.save_graph(&mut reloaded).unwrap());

    let again = store.get_graph("upd.trs").unwrap();
    assert_eq!(again.annotations_in("word")[0].label, "the");
}

#[test]
fn invalid_new_graph_saves_nothing() {
    let mut store = common::test_store();
    let mut graph = common::new_transcript(&store, "broken.trs");
    // word with no turn parent: structurally invalid
    let s = graph.create_anchor(Some(0.0), agstore::model::Confidence::Manual);
    let e = graph.create_anchor(Some(1.0), agstore::model::Confidence::Manual);
    graph.create_annotation("word", "orphan", None, s, e);

    let err = store.save_graph(&mut graph).unwrap_err();
    assert!(matches!(err, StoreError::InvalidGraph { .. }));
    // the transaction rolled everything back, container row included
    assert!(store.get_graph_ids().unwrap().is_empty());
}

#[test]
fn validation_problems_on_updates_respect_the_policy() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "lenient.trs", "ada", &["a", "b", "c"], 0.0, 3.0);

    // destroying the middle word leaves an ordinal gap
    let mut reloaded = store.get_graph("lenient.trs").unwrap();
    let middle = reloaded.annotations_in("word")[1].id.clone();
    reloaded.destroy_annotation(&middle);
    assert!(store.save_graph(&mut reloaded).unwrap(), "default policy proceeds");

    let mut again = store.get_graph("lenient.trs").unwrap();
    let last = again.annotations_in("word")[1].id.clone();
    again.update_label(&last, "z");
    store.set_validation_policy(ValidationPolicy::Fatal);
    let err = store.save_graph(&mut again).unwrap_err();
    assert!(matches!(err, StoreError::InvalidGraph { .. }));
}

#[test]
fn failed_save_leaves_the_graph_unassigned() {
    use agstore::model::{Anchor, AnchorId, Confidence};

    let mut store = common::test_store();
    let schema = store.get_schema().unwrap();
    let mut graph = agstore::Graph::new("fail.trs", schema);
    common::add_turn(&mut graph, "ada", &["hi"], 0.0, 1.0);
    // a word bounded by anchors that were never persisted; the insert
    // trips the anchor foreign key mid-pass, after the container row
    let turn = graph.annotations_in("turn")[0].id.clone();
    let s = graph.add_anchor(Anchor::new(AnchorId::Durable(9001), Some(0.2), Confidence::Manual));
    let e = graph.add_anchor(Anchor::new(AnchorId::Durable(9002), Some(0.4), Confidence::Manual));
    graph.create_annotation("word", "ghost", Some(turn), s, e);

    assert!(store.save_graph(&mut graph).is_err());
    assert!(graph.ag_id.is_none(), "no backend id without a commit");
    assert!(graph.corpus.is_none(), "no defaulted corpus without a commit");
    assert!(graph.episode.is_none());
    assert!(store.get_graph_ids().unwrap().is_empty());
}

#[test]
fn participants_persist_through_identity_tables() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "who.trs", "ada", &["hi"], 0.0, 1.0);
    assert_eq!(store.get_participant_ids().unwrap(), vec!["ada".to_string()]);

    // a second transcript by the same speaker reuses the speaker row
    common::seed_transcript(&mut store, "who2.trs", "ada", &["ho"], 0.0, 1.0);
    assert_eq!(store.get_participant_ids().unwrap().len(), 1);
}
