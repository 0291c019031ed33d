//! Fragment extraction by defining annotation and by offset window.

mod common;

use agstore::series::{CancelFlag, FragmentSeries, FragmentSpec};

#[test]
fn fragment_excludes_a_simultaneous_speaker() {
    let mut store = common::test_store();
    let mut graph = common::new_transcript(&store, "overlap.trs");
    common::add_turn(&mut graph, "ada", &["one", "two", "three"], 10.0, 20.0);
    // a second speaker talking over the same window
    common::add_turn(&mut graph, "grace", &["four", "five"], 12.0, 18.0);
    assert!(store.save_graph(&mut graph).unwrap());

    let turns = graph.annotations_in("turn");
    let ada_turn = turns
        .iter()
        .find(|t| t.label == "ada")
        .expect("ada's turn")
        .id
        .to_string();

    let fragment = store
        .get_fragment("overlap.trs", &ada_turn, &["word".into()])
        .unwrap();
    assert_eq!(fragment.fragment_parent(), Some("overlap.trs"));
    assert_eq!(fragment.id, "overlap.trs__10.000-20.000");

    let labels: Vec<&str> = fragment
        .annotations_in("word")
        .iter()
        .map(|w| w.label.as_str())
        .collect();
    assert_eq!(labels, vec!["one", "two", "three"]);
    assert!(fragment.annotations_in("turn").len() == 1);

    // every included word carries both anchors
    for word in fragment.annotations_in("word") {
        assert!(fragment.has_anchor(&word.start_id));
        assert!(fragment.has_anchor(&word.end_id));
    }
}

#[test]
fn fragment_keeps_the_ancestor_chain() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "chain.trs", "ada", &["only"], 5.0, 6.0);

    let graph = store.get_graph("chain.trs").unwrap();
    let word_id = graph.annotations_in("word")[0].id.to_string();
    let fragment = store
        .get_fragment("chain.trs", &word_id, &["word".into()])
        .unwrap();

    assert_eq!(fragment.annotations_in("word").len(), 1);
    assert_eq!(fragment.annotations_in("turn").len(), 1);
    assert_eq!(fragment.annotations_in("participant").len(), 1);
    let word = &fragment.annotations_in("word")[0];
    let turn = &fragment.annotations_in("turn")[0];
    assert_eq!(word.parent_id.as_ref(), Some(&turn.id));
}

#[test]
fn unaligned_defining_annotation_is_rejected() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "un.trs", "ada", &["x"], 0.0, 1.0);
    let mut graph = store.get_graph("un.trs").unwrap();
    let word = graph.annotations_in("word")[0].id.clone();
    let start = graph.annotations_in("word")[0].start_id.clone();
    graph.update_anchor_offset(&start, None);
    store.save_graph(&mut graph).unwrap();

    assert!(store
        .get_fragment("un.trs", &word.to_string(), &["word".into()])
        .is_err());
}

#[test]
fn offset_window_backfills_parents_and_boundaries() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "win.trs", "ada", &["a", "b", "c", "d"], 0.0, 4.0);

    // the window covers only the middle two words; the turn spans past it
    let fragment = store
        .get_fragment_by_offsets("win.trs", 1.0, 3.0, &["word".into()])
        .unwrap();
    let labels: Vec<&str> = fragment
        .annotations_in("word")
        .iter()
        .map(|w| w.label.as_str())
        .collect();
    assert_eq!(labels, vec!["b", "c"]);

    // the turn is back-filled for structure, without its out-of-window anchors
    assert_eq!(fragment.annotations_in("turn").len(), 1);
    let turn = &fragment.annotations_in("turn")[0];
    assert!(!fragment.has_anchor(&turn.start_id));
    assert!(!fragment.has_anchor(&turn.end_id));

    // boundary anchors exist exactly at the window edges
    assert!(fragment.anchors().any(|a| a.offset == Some(1.0)));
    assert!(fragment.anchors().any(|a| a.offset == Some(3.0)));
}

#[test]
fn fragment_series_is_lazy_exact_and_cancellable() {
    let mut store = common::test_store();
    common::seed_transcript(&mut store, "s1.trs", "ada", &["a", "b"], 0.0, 2.0);
    common::seed_transcript(&mut store, "s2.trs", "ada", &["c", "d"], 0.0, 2.0);

    let specs = vec![
        FragmentSpec::new("s1.trs", 0.0, 2.0, vec!["word".into()]),
        FragmentSpec::new("s2.trs", 0.0, 2.0, vec!["word".into()]),
    ];
    let cancel = CancelFlag::new();
    let mut series = FragmentSeries::new(&store, specs.clone(), cancel.clone());
    assert_eq!(series.len(), 2);
    let first = series.next().unwrap().unwrap();
    assert_eq!(first.annotations_in("word").len(), 2);
    assert_eq!(series.size_hint(), (1, Some(1)));

    cancel.cancel();
    assert!(series.next().is_none(), "cancellation ends the series");

    // an uncancelled series yields everything
    let mut series = FragmentSeries::new(&store, specs, CancelFlag::new());
    assert_eq!(series.by_ref().count(), 2);
}
