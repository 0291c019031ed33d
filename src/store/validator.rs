//! Structural validation of graphs before save.

use std::collections::BTreeMap;

use crate::model::{Annotation, ChangeMarker, Graph};
use crate::schema::ROOT_LAYER_ID;

/// How validation problems affect a save.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ValidationPolicy {
    /// Any validation problem aborts the save.
    Fatal,
    /// Problems on updates to existing graphs are logged and the save
    /// proceeds; problems on brand-new graphs are always fatal.
    #[default]
    LogAndProceed,
}

/// Structural validation collaborator, run before any write.
pub trait GraphValidator {
    /// Returns every problem found; an empty list means the graph is
    /// structurally sound.
    fn validate(&self, graph: &Graph) -> Vec<String>;
}

/// The default validator: checks anchor existence, layer resolution,
/// parent-layer agreement and ordinal contiguity.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultValidator;

impl GraphValidator for DefaultValidator {
    fn validate(&self, graph: &Graph) -> Vec<String> {
        let mut problems = Vec::new();
        let live = |a: &&Annotation| a.change != ChangeMarker::Destroy;

        for annotation in graph.annotations().filter(live) {
            let Some(layer) = graph.schema.layer(&annotation.layer_id) else {
                problems.push(format!(
                    "annotation {} is on unknown layer {}",
                    annotation.id, annotation.layer_id
                ));
                continue;
            };
            if !graph.has_anchor(&annotation.start_id) {
                problems.push(format!(
                    "annotation {} start anchor {} is missing",
                    annotation.id, annotation.start_id
                ));
            }
            if !graph.has_anchor(&annotation.end_id) {
                problems.push(format!(
                    "annotation {} end anchor {} is missing",
                    annotation.id, annotation.end_id
                ));
            }
            match &annotation.parent_id {
                Some(parent_id) => match graph.annotation(parent_id) {
                    Some(parent) if parent.layer_id != layer.parent_id => {
                        problems.push(format!(
                            "annotation {} parent is on layer {} but schema expects {}",
                            annotation.id, parent.layer_id, layer.parent_id
                        ));
                    }
                    Some(_) => {}
                    None => problems.push(format!(
                        "annotation {} parent {} is missing",
                        annotation.id, parent_id
                    )),
                },
                None if layer.parent_id != ROOT_LAYER_ID => {
                    problems.push(format!(
                        "annotation {} has no parent but layer {} is not top-level",
                        annotation.id, annotation.layer_id
                    ));
                }
                None => {}
            }
        }

        // ordinals contiguous 1..N per parent and layer
        let mut groups: BTreeMap<(String, String), Vec<i64>> = BTreeMap::new();
        for annotation in graph.annotations().filter(live) {
            let parent_key = annotation
                .parent_id
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_default();
            groups
                .entry((annotation.layer_id.clone(), parent_key))
                .or_default()
                .push(annotation.ordinal);
        }
        for ((layer_id, parent_key), mut ordinals) in groups {
            ordinals.sort_unstable();
            let contiguous = ordinals.iter().enumerate().all(|(i, o)| *o == i as i64 + 1);
            if !contiguous {
                problems.push(format!(
                    "ordinals on layer {layer_id} under parent {parent_key} are not contiguous: \
                     {ordinals:?}"
                ));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::model::Confidence;
    use crate::schema::{Layer, Schema, TemporalScope};

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
    fn sound_graph_passes() {
        let mut g = Graph::new("t.trs", schema());
        let s = g.create_anchor(Some(0.0), Confidence::Manual);
        let e = g.create_anchor(Some(1.0), Confidence::Manual);
        let who = g.create_annotation("participant", "sp1", None, s.clone(), e.clone());
        let turn = g.create_annotation("turn", "sp1", Some(who), s.clone(), e.clone());
        g.create_annotation("word", "hi", Some(turn), s, e);
        assert!(DefaultValidator.validate(&g).is_empty());
    }

    #[test]
    fn gaps_in_ordinals_are_reported() {
        let mut g = Graph::new("t.trs", schema());
        let s = g.create_anchor(Some(0.0), Confidence::Manual);
        let e = g.create_anchor(Some(1.0), Confidence::Manual);
        let who = g.create_annotation("participant", "sp1", None, s.clone(), e.clone());
        let turn = g.create_annotation("turn", "sp1", Some(who), s.clone(), e.clone());
        let w = g.create_annotation("word", "hi", Some(turn.clone()), s.clone(), e.clone());
        g.create_annotation("word", "there", Some(turn), s, e);
        g.destroy_annotation(&w);
        let problems = DefaultValidator.validate(&g);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("not contiguous"));
    }

    #[test]
    fn missing_anchor_is_reported() {
        let mut g = Graph::new("t.trs", schema());
        let s = g.create_anchor(Some(0.0), Confidence::Manual);
        let mut a = crate::model::Annotation::new(
            crate::model::AnnotationId::Provisional(99),
            "sp1",
            "turn",
            s.clone(),
            crate::model::AnchorId::Provisional(98),
        );
        a.change = ChangeMarker::Create;
        g.add_annotation(a);
        let problems = DefaultValidator.validate(&g);
        assert!(problems.iter().any(|p| p.contains("end anchor")));
    }
}
