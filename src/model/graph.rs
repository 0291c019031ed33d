//! The annotation graph: anchors, annotations and their change log.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::model::anchor::{Anchor, Confidence};
use crate::model::annotation::Annotation;
use crate::model::change::{ChangeMarker, ChangeTarget};
use crate::model::ids::{AnchorId, AnnotationId};
use crate::schema::Schema;

/// Whether span `b` is temporally included in span `a`.
///
/// Inclusion requires `b.start >= a.start` and `b.end <= a.end`; a shared
/// boundary counts as included. Unknown offsets never include or get
/// included.
pub fn spans_include(
    a_start: Option<f64>,
    a_end: Option<f64>,
    b_start: Option<f64>,
    b_end: Option<f64>,
) -> bool {
    match (a_start, a_end, b_start, b_end) {
        (Some(a0), Some(a1), Some(b0), Some(b1)) => b0 >= a0 && b1 <= a1,
        _ => false,
    }
}

/// An annotation graph: a schema instance, a set of shared anchors, a set
/// of annotations, and an ordered change log spanning both.
///
/// A fragment is a graph bounded by two anchors that remembers the id of
/// the graph it was extracted from.
#[derive(Clone, Debug)]
pub struct Graph {
    /// Graph (transcript) id.
    pub id: String,
    /// The layer schema this graph was loaded under.
    pub schema: Arc<Schema>,
    /// Owning corpus name.
    pub corpus: Option<String>,
    /// Episode (transcript family) name.
    pub episode: Option<String>,
    /// Transcript type.
    pub transcript_type: Option<String>,
    /// Position of this graph within its episode.
    pub family_sequence: i64,
    /// Backend row id, once the graph has been saved.
    pub ag_id: Option<i64>,
    anchors: BTreeMap<AnchorId, Anchor>,
    annotations: BTreeMap<AnnotationId, Annotation>,
    change_log: Vec<ChangeTarget>,
    next_provisional: u64,
    fragment_parent: Option<String>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new(id: impl Into<String>, schema: Arc<Schema>) -> Graph {
        Graph {
            id: id.into(),
            schema,
            corpus: None,
            episode: None,
            transcript_type: None,
            family_sequence: 1,
            ag_id: None,
            anchors: BTreeMap::new(),
            annotations: BTreeMap::new(),
            change_log: Vec::new(),
            next_provisional: 1,
            fragment_parent: None,
        }
    }

    /// Creates an empty fragment of `parent`, identified by the parent id
    /// and its boundary offsets.
    pub fn fragment(parent: &Graph, start: f64, end: f64) -> Graph {
        let mut fragment = Graph::new(
            format!("{}__{:.3}-{:.3}", parent.id, start, end),
            Arc::clone(&parent.schema),
        );
        fragment.corpus = parent.corpus.clone();
        fragment.episode = parent.episode.clone();
        fragment.transcript_type = parent.transcript_type.clone();
        fragment.ag_id = parent.ag_id;
        fragment.fragment_parent = Some(parent.id.clone());
        fragment
    }

    /// Whether this graph is a fragment of a larger graph.
    pub fn is_fragment(&self) -> bool {
        self.fragment_parent.is_some()
    }

    /// The id of the graph this fragment was extracted from.
    pub fn fragment_parent(&self) -> Option<&str> {
        self.fragment_parent.as_deref()
    }

    /// Sets the fragment provenance; used by the extractor.
    pub fn set_fragment_parent(&mut self, parent_id: impl Into<String>) {
        self.fragment_parent = Some(parent_id.into());
    }

    // --- anchors ---

    /// Adds an anchor, recording its change marker in the log if pending.
    pub fn add_anchor(&mut self, anchor: Anchor) -> AnchorId {
        let id = anchor.id.clone();
        if anchor.change != ChangeMarker::NoChange {
            self.change_log.push(ChangeTarget::Anchor(id.clone()));
        }
        self.anchors.insert(id.clone(), anchor);
        id
    }

    /// Adds a loaded, already-consistent anchor under a fresh provisional
    /// identity without marking it for save; used for synthesized context
    /// and boundary anchors.
    pub fn add_context_anchor(&mut self, offset: Option<f64>) -> AnchorId {
        let id = AnchorId::Provisional(self.next_provisional);
        self.next_provisional += 1;
        self.anchors.insert(
            id.clone(),
            Anchor::new(id.clone(), offset, Confidence::Default),
        );
        id
    }

    /// Creates a new provisional anchor marked for creation.
    pub fn create_anchor(&mut self, offset: Option<f64>, confidence: Confidence) -> AnchorId {
        let id = AnchorId::Provisional(self.next_provisional);
        self.next_provisional += 1;
        let mut anchor = Anchor::new(id.clone(), offset, confidence);
        anchor.change = ChangeMarker::Create;
        self.add_anchor(anchor)
    }

    /// Looks up an anchor.
    pub fn anchor(&self, id: &AnchorId) -> Option<&Anchor> {
        self.anchors.get(id)
    }

    /// Whether the graph contains the given anchor.
    pub fn has_anchor(&self, id: &AnchorId) -> bool {
        self.anchors.contains_key(id)
    }

    /// Updates an anchor's offset, marking it for save.
    pub fn update_anchor_offset(&mut self, id: &AnchorId, offset: Option<f64>) {
        if let Some(anchor) = self.anchors.get_mut(id) {
            anchor.offset = offset;
            if anchor.change == ChangeMarker::NoChange {
                anchor.change = ChangeMarker::Update;
                self.change_log.push(ChangeTarget::Anchor(id.clone()));
            }
        }
    }

    /// Marks an anchor for deletion.
    pub fn destroy_anchor(&mut self, id: &AnchorId) {
        if let Some(anchor) = self.anchors.get_mut(id) {
            anchor.change = ChangeMarker::Destroy;
            self.change_log.push(ChangeTarget::Anchor(id.clone()));
        }
    }

    /// All anchors.
    pub fn anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.values()
    }

    /// Anchor ids ordered by offset (unaligned anchors last).
    pub fn sorted_anchor_ids(&self) -> Vec<AnchorId> {
        let mut ids: Vec<&Anchor> = self.anchors.values().collect();
        ids.sort_by(|a, b| match (a.offset, b.offset) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        });
        ids.into_iter().map(|a| a.id.clone()).collect()
    }

    /// The earliest aligned anchor, if any.
    pub fn first_anchor_id(&self) -> Option<AnchorId> {
        self.sorted_anchor_ids().into_iter().next()
    }

    /// The latest aligned anchor, if any.
    pub fn last_anchor_id(&self) -> Option<AnchorId> {
        self.sorted_anchor_ids().into_iter().last()
    }

    // --- annotations ---

    /// Adds an annotation, recording its change marker in the log if
    /// pending. An ordinal of zero is replaced by the next free sibling
    /// ordinal.
    pub fn add_annotation(&mut self, mut annotation: Annotation) -> AnnotationId {
        if annotation.ordinal == 0 {
            annotation.ordinal =
                self.next_ordinal(annotation.parent_id.as_ref(), &annotation.layer_id);
        }
        let id = annotation.id.clone();
        if annotation.change != ChangeMarker::NoChange {
            self.change_log.push(ChangeTarget::Annotation(id.clone()));
        }
        self.annotations.insert(id.clone(), annotation);
        id
    }

    /// Creates a new provisional annotation marked for creation, assigning
    /// the next sibling ordinal.
    pub fn create_annotation(
        &mut self,
        layer_id: impl Into<String>,
        label: impl Into<String>,
        parent_id: Option<AnnotationId>,
        start_id: AnchorId,
        end_id: AnchorId,
    ) -> AnnotationId {
        let id = AnnotationId::Provisional(self.next_provisional);
        self.next_provisional += 1;
        let layer_id = layer_id.into();
        let ordinal = self.next_ordinal(parent_id.as_ref(), &layer_id);
        let mut annotation = Annotation::new(id.clone(), label, layer_id, start_id, end_id);
        annotation.parent_id = parent_id;
        annotation.ordinal = ordinal;
        annotation.change = ChangeMarker::Create;
        self.add_annotation(annotation)
    }

    /// Looks up an annotation.
    pub fn annotation(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.annotations.get(id)
    }

    /// Updates an annotation's label, marking it for save.
    pub fn update_label(&mut self, id: &AnnotationId, label: impl Into<String>) {
        if let Some(annotation) = self.annotations.get_mut(id) {
            annotation.label = label.into();
            if annotation.change == ChangeMarker::NoChange {
                annotation.change = ChangeMarker::Update;
                self.change_log.push(ChangeTarget::Annotation(id.clone()));
            }
        }
    }

    /// Marks an annotation for deletion.
    pub fn destroy_annotation(&mut self, id: &AnnotationId) {
        if let Some(annotation) = self.annotations.get_mut(id) {
            annotation.change = ChangeMarker::Destroy;
            self.change_log.push(ChangeTarget::Annotation(id.clone()));
        }
    }

    /// All annotations.
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    /// Annotations on a layer, ordered by start offset, then longest
    /// first, then ordinal.
    pub fn annotations_in(&self, layer_id: &str) -> Vec<&Annotation> {
        let mut result: Vec<&Annotation> = self
            .annotations
            .values()
            .filter(|a| a.layer_id == layer_id)
            .collect();
        result.sort_by(|a, b| {
            let (a0, a1) = self.offsets_of(a);
            let (b0, b1) = self.offsets_of(b);
            cmp_offset(a0, b0)
                .then(cmp_offset(b1, a1))
                .then(a.ordinal.cmp(&b.ordinal))
        });
        result
    }

    /// Direct children of a parent on a layer, in ordinal order.
    pub fn children_of(&self, parent_id: &AnnotationId, layer_id: &str) -> Vec<&Annotation> {
        let mut result: Vec<&Annotation> = self
            .annotations
            .values()
            .filter(|a| a.layer_id == layer_id && a.parent_id.as_ref() == Some(parent_id))
            .collect();
        result.sort_by_key(|a| a.ordinal);
        result
    }

    /// The ancestor chain of an annotation, bottom-up.
    ///
    /// An annotation already seen on the walk ends the chain, so corrupt
    /// parent links that form a cycle yield a finite chain.
    pub fn ancestors_of_annotation(&self, id: &AnnotationId) -> Vec<&Annotation> {
        let mut chain = Vec::new();
        let mut seen = vec![id];
        let mut current = self.annotations.get(id).and_then(|a| a.parent_id.as_ref());
        while let Some(parent_id) = current {
            if seen.contains(&parent_id) {
                break;
            }
            match self.annotations.get(parent_id) {
                Some(parent) => {
                    seen.push(&parent.id);
                    chain.push(parent);
                    current = parent.parent_id.as_ref();
                }
                None => break,
            }
        }
        chain
    }

    /// The start and end offsets of an annotation, via its anchors.
    pub fn offsets_of(&self, annotation: &Annotation) -> (Option<f64>, Option<f64>) {
        let start = self.anchors.get(&annotation.start_id).and_then(|a| a.offset);
        let end = self.anchors.get(&annotation.end_id).and_then(|a| a.offset);
        (start, end)
    }

    /// Whether annotation `outer` t-includes annotation `inner`.
    pub fn t_includes(&self, outer: &AnnotationId, inner: &AnnotationId) -> bool {
        let (Some(outer), Some(inner)) =
            (self.annotations.get(outer), self.annotations.get(inner))
        else {
            return false;
        };
        let (o0, o1) = self.offsets_of(outer);
        let (i0, i1) = self.offsets_of(inner);
        spans_include(o0, o1, i0, i1)
    }

    /// The next free 1-based ordinal among siblings with the given parent
    /// and layer.
    pub fn next_ordinal(&self, parent_id: Option<&AnnotationId>, layer_id: &str) -> i64 {
        self.annotations
            .values()
            .filter(|a| a.layer_id == layer_id && a.parent_id.as_ref() == parent_id)
            .map(|a| a.ordinal)
            .max()
            .unwrap_or(0)
            + 1
    }

    // --- change log ---

    /// The pending changes, deduplicated, in original log order.
    pub fn changes(&self) -> Vec<ChangeTarget> {
        let mut seen = std::collections::HashSet::new();
        self.change_log
            .iter()
            .filter(|t| seen.insert((*t).clone()))
            .cloned()
            .collect()
    }

    /// Whether any change is pending.
    pub fn has_changes(&self) -> bool {
        !self.change_log.is_empty()
    }

    /// Applies durable ids assigned during a save pass: rewrites object
    /// identities and every reference to them, in one centralized step.
    pub fn apply_renames(
        &mut self,
        anchor_renames: &HashMap<AnchorId, AnchorId>,
        annotation_renames: &HashMap<AnnotationId, AnnotationId>,
    ) {
        if !anchor_renames.is_empty() {
            let anchors = std::mem::take(&mut self.anchors);
            self.anchors = anchors
                .into_iter()
                .map(|(id, mut anchor)| {
                    let id = anchor_renames.get(&id).cloned().unwrap_or(id);
                    anchor.id = id.clone();
                    (id, anchor)
                })
                .collect();
        }
        let annotations = std::mem::take(&mut self.annotations);
        self.annotations = annotations
            .into_iter()
            .map(|(id, mut annotation)| {
                let id = annotation_renames.get(&id).cloned().unwrap_or(id);
                annotation.id = id.clone();
                if let Some(parent) = annotation.parent_id.take() {
                    annotation.parent_id =
                        Some(annotation_renames.get(&parent).cloned().unwrap_or(parent));
                }
                if let Some(new_start) = anchor_renames.get(&annotation.start_id) {
                    annotation.start_id = new_start.clone();
                }
                if let Some(new_end) = anchor_renames.get(&annotation.end_id) {
                    annotation.end_id = new_end.clone();
                }
                (id, annotation)
            })
            .collect();
        for target in &mut self.change_log {
            match target {
                ChangeTarget::Anchor(id) => {
                    if let Some(new_id) = anchor_renames.get(id) {
                        *id = new_id.clone();
                    }
                }
                ChangeTarget::Annotation(id) => {
                    if let Some(new_id) = annotation_renames.get(id) {
                        *id = new_id.clone();
                    }
                }
            }
        }
    }

    /// Commits all pending changes: destroyed objects are dropped, all
    /// remaining markers reset, and the change log cleared.
    pub fn commit(&mut self) {
        self.anchors.retain(|_, a| a.change != ChangeMarker::Destroy);
        self.annotations
            .retain(|_, a| a.change != ChangeMarker::Destroy);
        for anchor in self.anchors.values_mut() {
            anchor.change = ChangeMarker::NoChange;
        }
        for annotation in self.annotations.values_mut() {
            annotation.change = ChangeMarker::NoChange;
        }
        self.change_log.clear();
    }

    /// Rolls back pending changes: created objects are dropped and all
    /// other markers reset. Modified attribute values are left as they
    /// are.
    pub fn rollback(&mut self) {
        self.anchors.retain(|_, a| a.change != ChangeMarker::Create);
        self.annotations
            .retain(|_, a| a.change != ChangeMarker::Create);
        for anchor in self.anchors.values_mut() {
            anchor.change = ChangeMarker::NoChange;
        }
        for annotation in self.annotations.values_mut() {
            annotation.change = ChangeMarker::NoChange;
        }
        self.change_log.clear();
    }

    /// Resets one anchor's Destroy marker, used when a delete is refused.
    pub fn rollback_anchor_destroy(&mut self, id: &AnchorId) {
        if let Some(anchor) = self.anchors.get_mut(id) {
            if anchor.change == ChangeMarker::Destroy {
                anchor.change = ChangeMarker::NoChange;
            }
        }
    }
}

fn cmp_offset(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Layer, Schema, TemporalScope, ROOT_LAYER_ID};

    fn schema() -> Arc<Schema> {
        let mut s = Schema::new();
        s.add_layer(Layer::system("participant", "Participants", ROOT_LAYER_ID));
        s.add_layer(Layer::temporal(
            "turn",
            "Turns",
            TemporalScope::Meta,
            "participant",
            11,
        ));
        s.add_layer(Layer::temporal("word", "Words", TemporalScope::Word, "turn", 0));
        Arc::new(s)
    }

    #[test]
    fn spans_include_honours_shared_boundaries() {
        assert!(spans_include(Some(1.0), Some(5.0), Some(1.0), Some(5.0)));
        assert!(spans_include(Some(1.0), Some(5.0), Some(2.0), Some(5.0)));
        assert!(!spans_include(Some(1.0), Some(5.0), Some(0.5), Some(4.0)));
        assert!(!spans_include(Some(1.0), None, Some(2.0), Some(3.0)));
    }

    #[test]
    fn create_annotation_assigns_contiguous_ordinals() {
        let mut g = Graph::new("t.trs", schema());
        let s = g.create_anchor(Some(0.0), Confidence::Manual);
        let e = g.create_anchor(Some(5.0), Confidence::Manual);
        let turn = g.create_annotation("turn", "jo", None, s.clone(), e.clone());
        let w1 = g.create_annotation("word", "the", Some(turn.clone()), s.clone(), e.clone());
        let w2 = g.create_annotation("word", "cat", Some(turn.clone()), s, e);
        assert_eq!(g.annotation(&w1).unwrap().ordinal, 1);
        assert_eq!(g.annotation(&w2).unwrap().ordinal, 2);
        assert_eq!(g.children_of(&turn, "word").len(), 2);
    }

    #[test]
    fn cyclic_annotation_parents_yield_finite_chains() {
        let mut g = Graph::new("t.trs", schema());
        let s = g.create_anchor(Some(0.0), Confidence::Manual);
        let e = g.create_anchor(Some(1.0), Confidence::Manual);
        let turn = g.create_annotation("turn", "jo", None, s.clone(), e.clone());
        let word = g.create_annotation("word", "hi", Some(turn.clone()), s, e);
        // corrupt the turn's parent link to point back at its own child
        g.annotations.get_mut(&turn).unwrap().parent_id = Some(word.clone());

        let chain: Vec<_> = g
            .ancestors_of_annotation(&word)
            .iter()
            .map(|a| a.id.clone())
            .collect();
        assert_eq!(chain, vec![turn]);
    }

    #[test]
    fn changes_deduplicate_preserving_order() {
        let mut g = Graph::new("t.trs", schema());
        let s = g.create_anchor(Some(0.0), Confidence::Manual);
        let e = g.create_anchor(Some(1.0), Confidence::Manual);
        let a = g.create_annotation("turn", "jo", None, s.clone(), e.clone());
        g.update_anchor_offset(&s, Some(0.5));
        let changes = g.changes();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0], ChangeTarget::Anchor(s));
        assert_eq!(changes[1], ChangeTarget::Anchor(e));
        assert_eq!(changes[2], ChangeTarget::Annotation(a));
    }

    #[test]
    fn renames_rewrite_references_once() {
        let mut g = Graph::new("t.trs", schema());
        let s = g.create_anchor(Some(0.0), Confidence::Manual);
        let e = g.create_anchor(Some(1.0), Confidence::Manual);
        let turn = g.create_annotation("turn", "jo", None, s.clone(), e.clone());
        let word = g.create_annotation("word", "hi", Some(turn.clone()), s.clone(), e.clone());

        let mut anchor_renames = HashMap::new();
        anchor_renames.insert(s.clone(), AnchorId::Durable(10));
        anchor_renames.insert(e.clone(), AnchorId::Durable(11));
        let mut annotation_renames = HashMap::new();
        annotation_renames.insert(
            turn.clone(),
            AnnotationId::temporal(TemporalScope::Meta, 11, 1),
        );
        annotation_renames.insert(
            word.clone(),
            AnnotationId::temporal(TemporalScope::Word, 0, 1),
        );
        g.apply_renames(&anchor_renames, &annotation_renames);

        let word = g
            .annotation(&AnnotationId::temporal(TemporalScope::Word, 0, 1))
            .unwrap();
        assert_eq!(word.start_id, AnchorId::Durable(10));
        assert_eq!(word.end_id, AnchorId::Durable(11));
        assert_eq!(
            word.parent_id,
            Some(AnnotationId::temporal(TemporalScope::Meta, 11, 1))
        );
        assert!(g.annotation(&turn).is_none());
    }

    #[test]
    fn commit_drops_destroyed_objects() {
        let mut g = Graph::new("t.trs", schema());
        let s = g.create_anchor(Some(0.0), Confidence::Manual);
        let e = g.create_anchor(Some(1.0), Confidence::Manual);
        let a = g.create_annotation("turn", "jo", None, s, e);
        g.commit();
        assert!(!g.has_changes());
        g.destroy_annotation(&a);
        g.commit();
        assert!(g.annotation(&a).is_none());
    }
}
