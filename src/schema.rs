//! Layer definitions and the rooted layer hierarchy.
//!
//! A [`Layer`] describes one category of annotation: how it aligns to time,
//! how its peers may relate, where it sits in the structural tree and which
//! physical storage shape its rows take. A [`Schema`] is the rooted tree of
//! layers (virtual root `"graph"`) with designated well-known layers; the
//! ancestor/descendant relationships in this tree drive both fragment
//! traversal and query-join selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The virtual root layer id of every schema.
pub const ROOT_LAYER_ID: &str = "graph";

/// How annotations on a layer align to the timeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Alignment {
    /// Tag annotations with no alignment of their own.
    None,
    /// Instants: start and end anchors coincide.
    Point,
    /// Intervals with distinct start and end.
    Interval,
}

impl Alignment {
    /// Backend numeric code for this alignment.
    pub fn code(self) -> i64 {
        match self {
            Alignment::None => 0,
            Alignment::Point => 1,
            Alignment::Interval => 2,
        }
    }

    /// Decodes the backend numeric code, defaulting to interval alignment.
    pub fn from_code(code: i64) -> Alignment {
        match code {
            0 => Alignment::None,
            1 => Alignment::Point,
            _ => Alignment::Interval,
        }
    }
}

/// The label value type of a layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ValueType {
    /// Plain text labels.
    String,
    /// Numeric labels.
    Number,
    /// Phonological labels (segment symbols).
    Phonetic,
    /// Boolean flags.
    Boolean,
}

impl ValueType {
    /// Backend text code for this type.
    pub fn code(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Phonetic => "ipa",
            ValueType::Boolean => "boolean",
        }
    }

    /// Decodes the backend text code, defaulting to string.
    pub fn from_code(code: &str) -> ValueType {
        match code {
            "number" => ValueType::Number,
            "ipa" => ValueType::Phonetic,
            "boolean" => ValueType::Boolean,
            _ => ValueType::String,
        }
    }
}

/// Temporal storage granularity, ordered coarse to fine.
///
/// The rank drives cross-layer join-key selection: when two layers of
/// different scope are joined, the coarser scope (lower rank) wins.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum TemporalScope {
    /// Annotations spanning arbitrary stretches of the whole graph.
    Freeform,
    /// Turn-level structure (conversational turns, utterances, noises).
    Meta,
    /// Word-level annotations.
    Word,
    /// Sub-word segments (phonemes).
    Segment,
}

impl TemporalScope {
    /// Join rank: freeform=0, meta=1, word=2, segment=3.
    pub fn join_rank(self) -> u8 {
        match self {
            TemporalScope::Freeform => 0,
            TemporalScope::Meta => 1,
            TemporalScope::Word => 2,
            TemporalScope::Segment => 3,
        }
    }

    /// Single-character backend code for this scope.
    pub fn code(self) -> &'static str {
        match self {
            TemporalScope::Freeform => "F",
            TemporalScope::Meta => "M",
            TemporalScope::Word => "W",
            TemporalScope::Segment => "S",
        }
    }

    /// Decodes the backend scope code (case-insensitive).
    pub fn from_code(code: &str) -> Option<TemporalScope> {
        match code.to_ascii_uppercase().as_str() {
            "F" => Some(TemporalScope::Freeform),
            "M" => Some(TemporalScope::Meta),
            "W" => Some(TemporalScope::Word),
            "S" => Some(TemporalScope::Segment),
            _ => None,
        }
    }
}

/// Storage scope classification of a layer.
///
/// Downstream components treat this as authoritative for choosing storage
/// and join strategy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum LayerScope {
    /// A per-layer annotation table keyed by graph, turn, word or segment.
    Temporal(TemporalScope),
    /// A row in the generic transcript-attribute table.
    TranscriptAttribute,
    /// A row in the generic participant-attribute table.
    ParticipantAttribute,
    /// A tag on an episode (transcript family).
    EpisodeTag,
    /// A synthetic layer assembled from dedicated metadata tables
    /// (corpus, episode, transcript type, participant, main-participant).
    System,
}

impl LayerScope {
    /// The temporal scope, if this layer has per-layer annotation rows.
    pub fn temporal(&self) -> Option<TemporalScope> {
        match self {
            LayerScope::Temporal(s) => Some(*s),
            _ => None,
        }
    }
}

/// Definition of one annotation layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Unique layer id, e.g. `"word"` or `"participant_gender"`.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Temporal alignment of annotations on this layer.
    pub alignment: Alignment,
    /// Whether multiple peers may share one parent.
    pub peers: bool,
    /// Whether peers may overlap in time.
    pub peers_overlap: bool,
    /// Whether children must tile the parent's full span.
    pub saturated: bool,
    /// Parent layer id in the schema tree.
    pub parent_id: String,
    /// Whether the parent's span t-includes the child's.
    pub parent_includes: bool,
    /// Label value type.
    pub value_type: ValueType,
    /// Enumerated valid labels, if the layer is closed-vocabulary.
    pub valid_labels: Option<Vec<String>>,
    /// Storage scope classification.
    pub scope: LayerScope,
    /// Backend layer number, for layers stored in per-layer tables.
    pub layer_num: Option<i64>,
}

impl Layer {
    /// Creates a temporal layer definition with the given storage shape.
    pub fn temporal(
        id: impl Into<String>,
        description: impl Into<String>,
        scope: TemporalScope,
        parent_id: impl Into<String>,
        layer_num: i64,
    ) -> Layer {
        Layer {
            id: id.into(),
            description: description.into(),
            alignment: Alignment::Interval,
            peers: true,
            peers_overlap: scope == TemporalScope::Freeform || scope == TemporalScope::Meta,
            saturated: false,
            parent_id: parent_id.into(),
            parent_includes: true,
            value_type: ValueType::String,
            valid_labels: None,
            scope: LayerScope::Temporal(scope),
            layer_num: Some(layer_num),
        }
    }

    /// Creates a synthetic system layer (no per-layer annotation table).
    pub fn system(
        id: impl Into<String>,
        description: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Layer {
        Layer {
            id: id.into(),
            description: description.into(),
            alignment: Alignment::None,
            peers: true,
            peers_overlap: true,
            saturated: true,
            parent_id: parent_id.into(),
            parent_includes: true,
            value_type: ValueType::String,
            valid_labels: None,
            scope: LayerScope::System,
            layer_num: None,
        }
    }
}

/// The rooted tree of layers for a store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    layers: BTreeMap<String, Layer>,
    /// Layer ids in backend registry order, coarse layers first, so parents
    /// load before children.
    order: Vec<String>,
    /// Id of the participant layer.
    pub participant_layer_id: String,
    /// Id of the turn layer.
    pub turn_layer_id: String,
    /// Id of the utterance layer.
    pub utterance_layer_id: String,
    /// Id of the word layer.
    pub word_layer_id: String,
    /// Id of the segment layer.
    pub segment_layer_id: String,
    /// Id of the episode layer.
    pub episode_layer_id: String,
    /// Id of the corpus layer.
    pub corpus_layer_id: String,
}

impl Schema {
    /// Creates an empty schema with the conventional well-known layer ids.
    pub fn new() -> Schema {
        Schema {
            layers: BTreeMap::new(),
            order: Vec::new(),
            participant_layer_id: "participant".into(),
            turn_layer_id: "turn".into(),
            utterance_layer_id: "utterance".into(),
            word_layer_id: "word".into(),
            segment_layer_id: "segment".into(),
            episode_layer_id: "episode".into(),
            corpus_layer_id: "corpus".into(),
        }
    }

    /// Adds a layer definition. Insertion order is preserved as the load
    /// order for multi-layer operations.
    pub fn add_layer(&mut self, layer: Layer) {
        if !self.layers.contains_key(&layer.id) {
            self.order.push(layer.id.clone());
        }
        self.layers.insert(layer.id.clone(), layer);
    }

    /// Looks up a layer definition by id.
    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.get(id)
    }

    /// All layer ids in registry order.
    pub fn layer_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// All layer definitions in registry order.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.order.iter().filter_map(|id| self.layers.get(id))
    }

    /// The parent chain of a layer, bottom-up, excluding the virtual root.
    ///
    /// A layer already seen on the walk ends the chain, so a registry with
    /// a cyclic `parent_id` yields a finite chain instead of looping.
    pub fn ancestors_of(&self, layer_id: &str) -> Vec<&Layer> {
        let mut chain = Vec::new();
        let mut seen = vec![layer_id];
        let mut current = self.layers.get(layer_id);
        while let Some(layer) = current {
            if layer.parent_id == ROOT_LAYER_ID || seen.contains(&layer.parent_id.as_str()) {
                break;
            }
            match self.layers.get(&layer.parent_id) {
                Some(parent) => {
                    seen.push(parent.id.as_str());
                    chain.push(parent);
                    current = Some(parent);
                }
                None => break,
            }
        }
        chain
    }

    /// Whether `ancestor_id` appears in the parent chain of `layer_id`.
    pub fn is_ancestor(&self, ancestor_id: &str, layer_id: &str) -> bool {
        if ancestor_id == ROOT_LAYER_ID {
            return true;
        }
        self.ancestors_of(layer_id).iter().any(|l| l.id == ancestor_id)
    }

    /// Expands a requested layer set so that it stays a connected tree:
    /// any missing intermediate parent layers are back-filled, and the
    /// result is returned in registry order (parents before children).
    pub fn connected_layer_set(&self, layer_ids: &[String]) -> Vec<String> {
        let mut wanted: Vec<String> = Vec::new();
        for id in layer_ids {
            if self.layers.contains_key(id) && !wanted.contains(id) {
                wanted.push(id.clone());
            }
            for ancestor in self.ancestors_of(id) {
                if !wanted.contains(&ancestor.id) {
                    wanted.push(ancestor.id.clone());
                }
            }
        }
        self.order
            .iter()
            .filter(|id| wanted.contains(id))
            .cloned()
            .collect()
    }

    /// Temporal layers in registry order.
    pub fn temporal_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers().filter(|l| l.scope.temporal().is_some())
    }

    /// Resolves a backend layer number to its definition.
    pub fn layer_by_num(&self, layer_num: i64) -> Option<&Layer> {
        self.layers().find(|l| l.layer_num == Some(layer_num))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_layer(Layer::system("participant", "Participants", ROOT_LAYER_ID));
        schema.add_layer(Layer::temporal(
            "turn",
            "Speaker turns",
            TemporalScope::Meta,
            "participant",
            11,
        ));
        schema.add_layer(Layer::temporal(
            "word",
            "Words",
            TemporalScope::Word,
            "turn",
            0,
        ));
        schema.add_layer(Layer::temporal(
            "segment",
            "Phones",
            TemporalScope::Segment,
            "word",
            1,
        ));
        schema
    }

    #[test]
    fn ancestor_chain_is_bottom_up() {
        let schema = test_schema();
        let chain: Vec<&str> = schema
            .ancestors_of("segment")
            .iter()
            .map(|l| l.id.as_str())
            .collect();
        assert_eq!(chain, vec!["word", "turn", "participant"]);
    }

    #[test]
    fn is_ancestor_includes_root() {
        let schema = test_schema();
        assert!(schema.is_ancestor("turn", "segment"));
        assert!(schema.is_ancestor(ROOT_LAYER_ID, "turn"));
        assert!(!schema.is_ancestor("segment", "word"));
    }

    #[test]
    fn connected_set_backfills_parents() {
        let schema = test_schema();
        let set = schema.connected_layer_set(&["segment".to_string()]);
        assert_eq!(set, vec!["participant", "turn", "word", "segment"]);
    }

    #[test]
    fn cyclic_parent_registrations_yield_finite_chains() {
        let mut schema = Schema::new();
        schema.add_layer(Layer::system("a", "A", "b"));
        schema.add_layer(Layer::system("b", "B", "a"));
        schema.add_layer(Layer::system("own", "Own parent", "own"));

        let chain: Vec<&str> = schema.ancestors_of("a").iter().map(|l| l.id.as_str()).collect();
        assert_eq!(chain, vec!["b"]);
        assert!(schema.is_ancestor("a", "b"));
        assert!(schema.ancestors_of("own").is_empty());
        assert_eq!(
            schema.connected_layer_set(&["a".to_string()]),
            vec!["a", "b"]
        );
    }

    #[test]
    fn join_ranks_order_coarse_to_fine() {
        assert!(TemporalScope::Freeform.join_rank() < TemporalScope::Meta.join_rank());
        assert!(TemporalScope::Meta.join_rank() < TemporalScope::Word.join_rank());
        assert!(TemporalScope::Word.join_rank() < TemporalScope::Segment.join_rank());
    }

    #[test]
    fn scope_codes_round_trip() {
        for scope in [
            TemporalScope::Freeform,
            TemporalScope::Meta,
            TemporalScope::Word,
            TemporalScope::Segment,
        ] {
            assert_eq!(TemporalScope::from_code(scope.code()), Some(scope));
        }
        assert_eq!(TemporalScope::from_code("x"), None);
    }
}
