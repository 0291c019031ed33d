//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Once;

use agstore::model::Confidence;
use agstore::schema::{Layer, TemporalScope};
use agstore::{Graph, SqlAnnotationStore};

static TRACING: Once = Once::new();

/// Installs a log subscriber once per test binary; `RUST_LOG` controls
/// what gets captured.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// An in-memory store with the conventional layer setup: turn/utterance
/// (meta), word plus an orthography tag (word), segment, and one
/// transcript and two participant attributes.
pub fn test_store() -> SqlAnnotationStore {
    let store = SqlAnnotationStore::open_in_memory().expect("open in-memory store");
    install_layers(&store);
    store
}

/// Applies the conventional layer setup to a store.
pub fn install_layers(store: &SqlAnnotationStore) {
    init_tracing();
    store.add_corpus("CC").unwrap();
    store.add_transcript_type("interview").unwrap();
    store
        .register_layer(&Layer::temporal(
            "turn",
            "Speaker turns",
            TemporalScope::Meta,
            "participant",
            11,
        ))
        .unwrap();
    store
        .register_layer(&Layer::temporal(
            "utterance",
            "Utterances",
            TemporalScope::Meta,
            "turn",
            12,
        ))
        .unwrap();
    store
        .register_layer(&Layer::temporal(
            "word",
            "Words",
            TemporalScope::Word,
            "turn",
            0,
        ))
        .unwrap();
    store
        .register_layer(&Layer::temporal(
            "orthography",
            "Orthography",
            TemporalScope::Word,
            "word",
            2,
        ))
        .unwrap();
    store
        .register_layer(&Layer::temporal(
            "segment",
            "Phones",
            TemporalScope::Segment,
            "word",
            1,
        ))
        .unwrap();
    store
        .register_transcript_attribute("language", "Language")
        .unwrap();
    store
        .register_participant_attribute("gender", "Gender")
        .unwrap();
    store
        .register_participant_attribute("language", "Language")
        .unwrap();
}

/// Builds and saves a transcript with one speaker turn containing evenly
/// spaced words, returning the committed graph.
pub fn seed_transcript(
    store: &mut SqlAnnotationStore,
    id: &str,
    speaker: &str,
    words: &[&str],
    start: f64,
    end: f64,
) -> Graph {
    let mut graph = new_transcript(store, id);
    add_turn(&mut graph, speaker, words, start, end);
    assert!(store.save_graph(&mut graph).unwrap());
    graph
}

/// A fresh unsaved transcript graph bound to the store's schema.
pub fn new_transcript(store: &SqlAnnotationStore, id: &str) -> Graph {
    let schema = store.get_schema().unwrap();
    let mut graph = Graph::new(id, schema);
    graph.corpus = Some("CC".into());
    graph.episode = Some(format!("{id}-episode"));
    graph.transcript_type = Some("interview".into());
    graph
}

/// Adds one speaker's turn with evenly spaced words to an in-memory graph.
pub fn add_turn(graph: &mut Graph, speaker: &str, words: &[&str], start: f64, end: f64) {
    let s = graph.create_anchor(Some(start), Confidence::Manual);
    let e = graph.create_anchor(Some(end), Confidence::Manual);
    let who = graph.create_annotation("participant", speaker, None, s.clone(), e.clone());
    let turn = graph.create_annotation("turn", speaker, Some(who), s.clone(), e.clone());
    let n = words.len();
    let mut bounds = vec![s];
    for i in 1..n {
        let offset = start + (end - start) * i as f64 / n as f64;
        bounds.push(graph.create_anchor(Some(offset), Confidence::Automatic));
    }
    bounds.push(e);
    for (i, word) in words.iter().enumerate() {
        graph.create_annotation(
            "word",
            *word,
            Some(turn.clone()),
            bounds[i].clone(),
            bounds[i + 1].clone(),
        );
    }
}
