//! Expression matching against a populated store.

mod common;

use agstore::compiler::{Comparator, Expression, Operand, OrderKey};
use agstore::StoreError;

fn eq(left: Operand, right: Operand) -> Expression {
    Expression::compare(left, Comparator::Eq, right)
}

#[test]
fn graphs_filter_by_corpus() {
    let mut store = common::test_store();
    store.add_corpus("DD").unwrap();
    common::seed_transcript(&mut store, "a.trs", "ada", &["hi"], 0.0, 1.0);
    let mut other = common::new_transcript(&store, "b.trs");
    other.corpus = Some("DD".into());
    common::add_turn(&mut other, "bea", &["ho"], 0.0, 1.0);
    assert!(store.save_graph(&mut other).unwrap());

    let expr = eq(Operand::My("corpus".into()), Operand::String("CC".into()));
    assert_eq!(
        store.get_matching_graph_ids(Some(&expr), &[]).unwrap(),
        vec!["a.trs".to_string()]
    );
    assert_eq!(store.count_matching_graph_ids(&expr).unwrap(), 1);
    assert_eq!(
        store.get_graph_ids_in_corpus("DD").unwrap(),
        vec!["b.trs".to_string()]
    );
}

#[test]
fn default_order_is_ascending_and_reversible() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "b.trs", "ada", &["hi"], 0.0, 1.0);
    common::seed_transcript(&mut store, "a.trs", "ada", &["ho"], 0.0, 1.0);

    assert_eq!(
        store.get_graph_ids().unwrap(),
        vec!["a.trs".to_string(), "b.trs".to_string()]
    );
    assert_eq!(
        store
            .get_matching_graph_ids(None, &[OrderKey::desc(Operand::Id)])
            .unwrap(),
        vec!["b.trs".to_string(), "a.trs".to_string()]
    );
}

#[test]
fn participant_attributes_reach_both_dialects() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "a.trs", "ada", &["hi"], 0.0, 1.0);
    common::seed_transcript(&mut store, "b.trs", "bea", &["ho"], 0.0, 1.0);

    // tag ada with a language attribute
    let mut graph = store.get_graph("a.trs").unwrap();
    let who = graph.annotations_in("participant")[0].clone();
    graph.create_annotation(
        "participant_language",
        "en",
        Some(who.id.clone()),
        who.start_id.clone(),
        who.end_id.clone(),
    );
    assert!(store.save_graph(&mut graph).unwrap());

    // graph matching: transcripts with an 'en' speaker
    let expr = Expression::compare(
        Operand::String("en".into()),
        Comparator::In,
        Operand::Labels("participant_language".into()),
    );
    assert_eq!(
        store.get_matching_graph_ids(Some(&expr), &[]).unwrap(),
        vec!["a.trs".to_string()]
    );

    // participant matching: speakers whose own attribute is 'en'
    let expr = eq(
        Operand::My("participant_language".into()),
        Operand::String("en".into()),
    );
    assert_eq!(
        store.get_matching_participant_ids(Some(&expr), &[]).unwrap(),
        vec!["ada".to_string()]
    );
    assert_eq!(store.count_matching_participant_ids(&expr).unwrap(), 1);
}

#[test]
fn participant_ids_match_by_regex() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "a.trs", "ada", &["hi"], 0.0, 1.0);
    common::seed_transcript(&mut store, "b.trs", "bea", &["ho"], 0.0, 1.0);

    let expr = Expression::compare(
        Operand::Id,
        Comparator::Matches,
        Operand::String("^a.*".into()),
    );
    assert_eq!(
        store.get_matching_participant_ids(Some(&expr), &[]).unwrap(),
        vec!["ada".to_string()]
    );
}

#[test]
fn annotations_match_by_label_and_ordinal() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "fox.trs", "ada", &["the", "quick", "fox"], 0.0, 3.0);

    let by_label = eq(Operand::Label, Operand::String("quick".into()));
    let ids = store
        .get_matching_annotation_ids("word", Some(&by_label))
        .unwrap();
    assert_eq!(ids.len(), 1);
    let graph = store.get_graph("fox.trs").unwrap();
    assert_eq!(graph.annotation(&ids[0]).unwrap().label, "quick");

    let late = Expression::compare(Operand::Ordinal, Comparator::Ge, Operand::Number(2.0));
    let ids = store
        .get_matching_annotation_ids("word", Some(&late))
        .unwrap();
    assert_eq!(ids.len(), 2);
}

#[test]
fn episode_tags_round_trip_and_filter_graphs() {
    use agstore::schema::{Layer, LayerScope, ROOT_LAYER_ID};

    let mut store = common::test_store();
    let mut tag = Layer::system("episode_location", "Recording location", ROOT_LAYER_ID);
    tag.scope = LayerScope::EpisodeTag;
    store.register_layer(&tag).unwrap();

    common::seed_transcript(&mut store, "a.trs", "ada", &["hi"], 0.0, 1.0);
    common::seed_transcript(&mut store, "b.trs", "bea", &["ho"], 0.0, 1.0);

    let mut graph = store.get_graph("a.trs").unwrap();
    let start = graph.first_anchor_id().unwrap();
    let end = graph.last_anchor_id().unwrap();
    graph.create_annotation("episode_location", "valdivia", None, start, end);
    assert!(store.save_graph(&mut graph).unwrap());

    let mut again = store.get_graph("a.trs").unwrap();
    let tags = again.annotations_in("episode_location");
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].label, "valdivia");
    let tag_id = tags[0].id.clone();

    let by_tag = eq(
        Operand::My("episode_location".into()),
        Operand::String("valdivia".into()),
    );
    assert_eq!(
        store.get_matching_graph_ids(Some(&by_tag), &[]).unwrap(),
        vec!["a.trs".to_string()]
    );

    again.update_label(&tag_id, "osorno");
    assert!(store.save_graph(&mut again).unwrap());
    assert_eq!(store.count_matching_graph_ids(&by_tag).unwrap(), 0);

    let mut last = store.get_graph("a.trs").unwrap();
    assert_eq!(last.annotations_in("episode_location")[0].label, "osorno");
    last.destroy_annotation(&tag_id);
    assert!(store.save_graph(&mut last).unwrap());
    assert!(store
        .get_graph("a.trs")
        .unwrap()
        .annotations_in("episode_location")
        .is_empty());
}

#[test]
fn list_length_counts_annotations_per_graph() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "short.trs", "ada", &["hi"], 0.0, 1.0);
    common::seed_transcript(&mut store, "long.trs", "ada", &["one", "two", "three"], 0.0, 3.0);

    let expr = Expression::compare(
        Operand::ListLength("word".into()),
        Comparator::Ge,
        Operand::Number(2.0),
    );
    assert_eq!(
        store.get_matching_graph_ids(Some(&expr), &[]).unwrap(),
        vec!["long.trs".to_string()]
    );
}

#[test]
fn compile_failures_report_every_problem() {
    let store = common::test_store();
    let expr = eq(
        Operand::My("nope1".into()),
        Operand::My("nope2".into()),
    );
    let err = store.get_matching_graph_ids(Some(&expr), &[]).unwrap_err();
    let StoreError::Compile(compile) = err else {
        panic!("expected a compile error, got {err}");
    };
    assert_eq!(compile.errors.len(), 2);
    assert_eq!(
        compile.expression,
        "my('nope1').label = my('nope2').label"
    );
}
