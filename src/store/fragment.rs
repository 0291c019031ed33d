//! Bounded-fragment extraction.
//!
//! A fragment is a self-consistent sub-graph: the defining annotation (or
//! offset window), its full ancestor chain for structural context, and only
//! the descendants reachable from that chain and temporally included in the
//! defining span. A simultaneous speaker's annotations overlap the window
//! in time but are structurally unrelated, so they stay out.

use std::collections::BTreeSet;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::{spans_include, AnnotationId, Graph};
use crate::schema::LayerScope;
use crate::store::SqlAnnotationStore;

impl SqlAnnotationStore {
    /// Extracts the fragment defined by one annotation: the annotation, its
    /// ancestor chain to the schema root, and the descendants of that chain
    /// t-included by the annotation's span, on the requested layers.
    pub fn get_fragment(
        &self,
        graph_id: &str,
        annotation_id: &str,
        layer_ids: &[String],
    ) -> Result<Graph> {
        let defining_id = AnnotationId::from_str(annotation_id)?;
        let schema = self.get_schema()?;
        let defining_layer_id = match &defining_id {
            AnnotationId::Temporal { layer_num, .. } => schema
                .layer_by_num(*layer_num)
                .map(|l| l.id.clone())
                .ok_or_else(|| StoreError::not_found("layer", annotation_id))?,
            _ => {
                return Err(StoreError::InvalidArgument(format!(
                    "fragments are defined by temporal annotations: {annotation_id}"
                )))
            }
        };

        // ancestor layers plus requested layers, kept a connected tree
        let mut merged: Vec<String> = vec![defining_layer_id.clone()];
        merged.extend(layer_ids.iter().cloned());
        let merged = schema.connected_layer_set(&merged);
        let full = self.get_graph_layers(graph_id, &merged)?;

        let defining = full
            .annotation(&defining_id)
            .ok_or_else(|| StoreError::not_found("annotation", annotation_id))?;
        let (Some(start), Some(end)) = full.offsets_of(defining) else {
            return Err(StoreError::InvalidArgument(format!(
                "annotation {annotation_id} has unaligned boundaries"
            )));
        };

        let mut fragment = Graph::fragment(&full, start, end);
        let mut included: BTreeSet<AnnotationId> = BTreeSet::new();

        let mut copy = |fragment: &mut Graph,
                        included: &mut BTreeSet<AnnotationId>,
                        id: &AnnotationId,
                        with_anchors: bool| {
            if !included.insert(id.clone()) {
                return;
            }
            let Some(annotation) = full.annotation(id) else {
                return;
            };
            if with_anchors {
                for anchor_id in [&annotation.start_id, &annotation.end_id] {
                    if let Some(anchor) = full.anchor(anchor_id) {
                        if !fragment.has_anchor(anchor_id) {
                            fragment.add_anchor(anchor.clone());
                        }
                    }
                }
            }
            fragment.add_annotation(annotation.clone());
        };

        copy(&mut fragment, &mut included, &defining_id, true);

        // ancestors bottom-up: keep each for context, but only span-included
        // ancestors contribute their anchors to the fragment timeline
        for ancestor in full.ancestors_of_annotation(&defining_id) {
            let (a_start, a_end) = full.offsets_of(ancestor);
            let with_anchors = spans_include(Some(start), Some(end), a_start, a_end);
            copy(&mut fragment, &mut included, &ancestor.id, with_anchors);
        }

        // descendants top-down over the merged layer set
        for layer_id in &merged {
            let Some(layer) = full.schema.layer(layer_id) else {
                continue;
            };
            if layer.scope.temporal().is_none() {
                continue;
            }
            // peers of the defining annotation on its own layer stay out
            if *layer_id == defining_layer_id {
                continue;
            }
            let structural = full.schema.is_ancestor(&defining_layer_id, layer_id);
            let candidates: Vec<AnnotationId> = full
                .annotations_in(layer_id)
                .into_iter()
                .filter(|a| {
                    let parent_included = a
                        .parent_id
                        .as_ref()
                        .is_some_and(|p| included.contains(p));
                    if !parent_included {
                        return false;
                    }
                    if structural {
                        return true;
                    }
                    let (a_start, a_end) = full.offsets_of(a);
                    spans_include(Some(start), Some(end), a_start, a_end)
                })
                .map(|a| a.id.clone())
                .collect();
            for id in candidates {
                copy(&mut fragment, &mut included, &id, true);
            }
        }

        // non-temporal layers attach unconditionally as context
        for layer_id in &merged {
            let Some(layer) = full.schema.layer(layer_id) else {
                continue;
            };
            if matches!(layer.scope, LayerScope::Temporal(_)) {
                continue;
            }
            let ids: Vec<AnnotationId> = full
                .annotations_in(layer_id)
                .into_iter()
                .map(|a| a.id.clone())
                .collect();
            for id in ids {
                copy(&mut fragment, &mut included, &id, true);
            }
        }

        debug!(
            graph = graph_id,
            fragment = %fragment.id,
            annotations = included.len(),
            "extracted fragment"
        );
        Ok(fragment)
    }

    /// Extracts the fragment of a graph falling inside an explicit offset
    /// window, back-filling parents of orphaned annotations and
    /// synthesizing boundary anchors exactly at `start` and `end` when
    /// absent.
    pub fn get_fragment_by_offsets(
        &self,
        graph_id: &str,
        start: f64,
        end: f64,
        layer_ids: &[String],
    ) -> Result<Graph> {
        let schema = self.get_schema()?;
        let merged = schema.connected_layer_set(layer_ids);
        let full = self.get_graph_layers(graph_id, &merged)?;
        let mut fragment = Graph::fragment(&full, start, end);
        let mut included: BTreeSet<AnnotationId> = BTreeSet::new();

        // top-down: annotations whose whole span falls inside the window
        for layer_id in &merged {
            let Some(layer) = full.schema.layer(layer_id) else {
                continue;
            };
            if layer.scope.temporal().is_none() {
                continue;
            }
            for annotation in full.annotations_in(layer_id) {
                let (a_start, a_end) = full.offsets_of(annotation);
                if !spans_include(Some(start), Some(end), a_start, a_end) {
                    continue;
                }
                if included.insert(annotation.id.clone()) {
                    for anchor_id in [&annotation.start_id, &annotation.end_id] {
                        if let Some(anchor) = full.anchor(anchor_id) {
                            if !fragment.has_anchor(anchor_id) {
                                fragment.add_anchor(anchor.clone());
                            }
                        }
                    }
                    fragment.add_annotation(annotation.clone());
                }
            }
        }

        // bottom-up: back-fill missing parents, copying their anchors only
        // when they fall inside the window
        let orphans: Vec<AnnotationId> = included.iter().cloned().collect();
        for id in orphans {
            let mut current = full.annotation(&id).and_then(|a| a.parent_id.clone());
            while let Some(parent_id) = current {
                if included.contains(&parent_id) {
                    break;
                }
                let Some(parent) = full.annotation(&parent_id) else {
                    break;
                };
                for anchor_id in [&parent.start_id, &parent.end_id] {
                    let Some(anchor) = full.anchor(anchor_id) else {
                        continue;
                    };
                    let inside = anchor
                        .offset
                        .is_some_and(|o| o >= start && o <= end);
                    if inside && !fragment.has_anchor(anchor_id) {
                        fragment.add_anchor(anchor.clone());
                    }
                }
                fragment.add_annotation(parent.clone());
                included.insert(parent_id.clone());
                current = parent.parent_id.clone();
            }
        }

        // every fragment gets well-defined endpoints
        let has_boundary = |fragment: &Graph, offset: f64| {
            fragment
                .anchors()
                .any(|a| a.offset.is_some_and(|o| o == offset))
        };
        if !has_boundary(&fragment, start) {
            fragment.add_context_anchor(Some(start));
        }
        if !has_boundary(&fragment, end) {
            fragment.add_context_anchor(Some(end));
        }
        Ok(fragment)
    }
}
