//! Loading graphs from the backend.

use std::collections::HashMap;

use rusqlite::OptionalExtension;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::{Anchor, Annotation, AnnotationId, Confidence, Graph};
use crate::schema::LayerScope;
use crate::store::bootstrap::layer_table;
use crate::store::SqlAnnotationStore;

/// The transcript row backing one graph.
#[derive(Clone, Debug)]
pub(crate) struct GraphRow {
    pub ag_id: i64,
    pub transcript_id: String,
    pub corpus_name: Option<String>,
    pub family_id: Option<i64>,
    pub family_name: Option<String>,
    pub family_sequence: i64,
    pub type_name: Option<String>,
}

pub(crate) fn parse_when(text: Option<String>) -> Option<OffsetDateTime> {
    text.and_then(|t| OffsetDateTime::parse(&t, &Rfc3339).ok())
}

impl SqlAnnotationStore {
    /// Resolves a graph id to its transcript row: exact id first, then a
    /// suffix-tolerant pattern, then a numeric row id.
    pub(crate) fn resolve_graph_row(&self, id: &str) -> Result<GraphRow> {
        const COLUMNS: &str = "transcript.ag_id, transcript.transcript_id, \
             transcript.corpus_name, transcript.family_id, transcript_family.name, \
             transcript.family_sequence, transcript_type.transcript_type";
        const FROM: &str = "FROM transcript \
             LEFT JOIN transcript_family \
               ON transcript_family.family_id = transcript.family_id \
             LEFT JOIN transcript_type \
               ON transcript_type.type_id = transcript.type_id";
        let map = |row: &rusqlite::Row<'_>| {
            Ok(GraphRow {
                ag_id: row.get(0)?,
                transcript_id: row.get(1)?,
                corpus_name: row.get(2)?,
                family_id: row.get(3)?,
                family_name: row.get(4)?,
                family_sequence: row.get(5)?,
                type_name: row.get(6)?,
            })
        };
        let exact = self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} {FROM} WHERE transcript.transcript_id = ?1"),
                [id],
                map,
            )
            .optional()?;
        if let Some(row) = exact {
            return Ok(row);
        }
        let pattern = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} {FROM} WHERE transcript.transcript_id LIKE ?1 \
                     ORDER BY transcript.transcript_id LIMIT 1"
                ),
                [format!("{id}.%")],
                map,
            )
            .optional()?;
        if let Some(row) = pattern {
            debug!(requested = id, resolved = %row.transcript_id, "resolved graph id by pattern");
            return Ok(row);
        }
        if let Ok(ag_id) = id.parse::<i64>() {
            let by_row = self
                .conn()
                .query_row(
                    &format!("SELECT {COLUMNS} {FROM} WHERE transcript.ag_id = ?1"),
                    [ag_id],
                    map,
                )
                .optional()?;
            if let Some(row) = by_row {
                return Ok(row);
            }
        }
        Err(StoreError::not_found("graph", id))
    }

    /// Loads a graph with every schema layer populated.
    pub fn get_graph(&self, id: &str) -> Result<Graph> {
        let schema = self.get_schema()?;
        let all: Vec<String> = schema.layer_ids().map(str::to_string).collect();
        self.get_graph_layers(id, &all)
    }

    /// Loads a graph with the requested layers (plus any intermediate
    /// parent layers needed to keep the structure connected).
    pub fn get_graph_layers(&self, id: &str, layer_ids: &[String]) -> Result<Graph> {
        let schema = self.get_schema()?;
        let row = self.resolve_graph_row(id)?;
        let mut graph = Graph::new(row.transcript_id.clone(), schema.clone());
        graph.ag_id = Some(row.ag_id);
        graph.corpus = row.corpus_name.clone();
        graph.episode = row.family_name.clone();
        graph.transcript_type = row.type_name.clone();
        graph.family_sequence = row.family_sequence;

        let wanted = schema.connected_layer_set(layer_ids);
        let speakers = self.load_speaker_map(row.ag_id)?;

        // anchors first so every annotation's boundaries resolve
        if wanted
            .iter()
            .any(|l| schema.layer(l).is_some_and(|l| l.scope.temporal().is_some()))
        {
            self.load_anchors(row.ag_id, &mut graph)?;
        }

        for layer_id in &wanted {
            let Some(layer) = schema.layer(layer_id) else {
                continue;
            };
            match &layer.scope {
                LayerScope::Temporal(_) => {
                    self.load_temporal_layer(&row, layer_id, &speakers, &mut graph)?
                }
                LayerScope::System
                | LayerScope::TranscriptAttribute
                | LayerScope::ParticipantAttribute
                | LayerScope::EpisodeTag => {}
            }
        }

        // context anchors for anchor-less system and attribute annotations
        let bounds = self.context_bounds(&mut graph);
        for layer_id in &wanted {
            let Some(layer) = schema.layer(layer_id) else {
                continue;
            };
            match &layer.scope {
                LayerScope::System => {
                    self.load_system_layer(&row, layer_id, &speakers, bounds.clone(), &mut graph)?
                }
                LayerScope::TranscriptAttribute => {
                    self.load_transcript_attributes(&row, layer_id, bounds.clone(), &mut graph)?
                }
                LayerScope::ParticipantAttribute => self.load_participant_attributes(
                    &row,
                    layer_id,
                    &speakers,
                    bounds.clone(),
                    &mut graph,
                )?,
                LayerScope::EpisodeTag => {
                    self.load_episode_tags(&row, layer_id, bounds.clone(), &mut graph)?
                }
                LayerScope::Temporal(_) => {}
            }
        }
        Ok(graph)
    }

    fn load_speaker_map(&self, ag_id: i64) -> Result<HashMap<i64, String>> {
        let mut stmt = self.conn().prepare(
            "SELECT speaker.speaker_number, speaker.name FROM speaker \
             INNER JOIN transcript_speaker \
             ON transcript_speaker.speaker_number = speaker.speaker_number \
             WHERE transcript_speaker.ag_id = ?1",
        )?;
        let rows = stmt.query_map([ag_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut map = HashMap::new();
        for row in rows {
            let (number, name): (i64, String) = row?;
            map.insert(number, name);
        }
        Ok(map)
    }

    fn load_anchors(&self, ag_id: i64, graph: &mut Graph) -> Result<()> {
        let mut stmt = self.conn().prepare(
            "SELECT anchor_id, offset, alignment_status, annotated_by, annotated_when \
             FROM anchor WHERE ag_id = ?1",
        )?;
        let rows = stmt.query_map([ag_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        for row in rows {
            let (anchor_id, offset, status, annotated_by, annotated_when) = row?;
            let id = crate::model::AnchorId::Durable(anchor_id);
            if graph.has_anchor(&id) {
                continue;
            }
            let mut anchor = Anchor::new(id, offset, Confidence::from_status(status));
            anchor.annotator = annotated_by;
            anchor.when = parse_when(annotated_when);
            graph.add_anchor(anchor);
        }
        Ok(())
    }

    fn load_temporal_layer(
        &self,
        row: &GraphRow,
        layer_id: &str,
        speakers: &HashMap<i64, String>,
        graph: &mut Graph,
    ) -> Result<()> {
        let schema = graph.schema.clone();
        let Some(layer) = schema.layer(layer_id) else {
            return Ok(());
        };
        let (Some(scope), Some(num)) = (layer.scope.temporal(), layer.layer_num) else {
            return Ok(());
        };
        let parent_layer = schema.layer(&layer.parent_id);
        let parent_is_participant = layer.parent_id == schema.participant_layer_id;
        let speaker_labelled =
            layer_id == schema.turn_layer_id || layer_id == schema.utterance_layer_id;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT annotation_id, label, label_status, start_anchor_id, end_anchor_id, \
             parent_id, ordinal, annotated_by, annotated_when \
             FROM {} WHERE ag_id = ?1 ORDER BY ordinal",
            layer_table(num)
        ))?;
        let rows = stmt.query_map([row.ag_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, Option<i64>>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, Option<String>>(7)?,
                r.get::<_, Option<String>>(8)?,
            ))
        })?;
        for r in rows {
            let (
                annotation_id,
                label,
                status,
                start_anchor,
                end_anchor,
                parent_row,
                ordinal,
                annotated_by,
                annotated_when,
            ) = r?;
            let id = AnnotationId::temporal(scope, num, annotation_id);
            let mut label = label.unwrap_or_default();
            // turn and utterance rows store the speaker number as label
            if speaker_labelled {
                if let Some(name) = label.parse::<i64>().ok().and_then(|n| speakers.get(&n)) {
                    label = name.clone();
                }
            }
            let parent_id = parent_row.and_then(|p| {
                if parent_is_participant {
                    Some(AnnotationId::meta(schema.participant_layer_id.clone(), p))
                } else {
                    let parent = parent_layer?;
                    Some(AnnotationId::temporal(
                        parent.scope.temporal()?,
                        parent.layer_num?,
                        p,
                    ))
                }
            });
            let mut annotation = Annotation::new(
                id,
                label,
                layer_id,
                crate::model::AnchorId::Durable(start_anchor),
                crate::model::AnchorId::Durable(end_anchor),
            );
            annotation.parent_id = parent_id;
            annotation.ordinal = ordinal;
            annotation.confidence = Confidence::from_status(status);
            annotation.annotator = annotated_by;
            annotation.when = parse_when(annotated_when);
            graph.add_annotation(annotation);
        }
        Ok(())
    }

    /// The anchors that anchor-less annotations (participants, attributes)
    /// borrow: the graph's first and last aligned anchors, synthesized when
    /// the graph has none.
    fn context_bounds(
        &self,
        graph: &mut Graph,
    ) -> (crate::model::AnchorId, crate::model::AnchorId) {
        match (graph.first_anchor_id(), graph.last_anchor_id()) {
            (Some(first), Some(last)) if first != last => (first, last),
            _ => {
                let first = graph.add_context_anchor(None);
                let last = graph.add_context_anchor(None);
                (first, last)
            }
        }
    }

    fn load_system_layer(
        &self,
        row: &GraphRow,
        layer_id: &str,
        speakers: &HashMap<i64, String>,
        bounds: (crate::model::AnchorId, crate::model::AnchorId),
        graph: &mut Graph,
    ) -> Result<()> {
        let schema = graph.schema.clone();
        let (start, end) = bounds;
        if layer_id == schema.participant_layer_id {
            let mut numbers: Vec<i64> = speakers.keys().copied().collect();
            numbers.sort_unstable();
            for (i, number) in numbers.into_iter().enumerate() {
                let annotation = Annotation::new(
                    AnnotationId::meta(schema.participant_layer_id.clone(), number),
                    speakers[&number].clone(),
                    layer_id,
                    start.clone(),
                    end.clone(),
                )
                .with_ordinal(i as i64 + 1);
                graph.add_annotation(annotation);
            }
        } else if layer_id == "main_participant" {
            let mut stmt = self.conn().prepare(
                "SELECT speaker_number FROM transcript_speaker \
                 WHERE ag_id = ?1 AND main_speaker = 1",
            )?;
            let rows = stmt.query_map([row.ag_id], |r| r.get::<_, i64>(0))?;
            for number in rows {
                let number = number?;
                let Some(name) = speakers.get(&number) else {
                    continue;
                };
                let annotation = Annotation::new(
                    AnnotationId::meta("main_participant", number),
                    name.clone(),
                    layer_id,
                    start.clone(),
                    end.clone(),
                )
                .with_parent(AnnotationId::meta(schema.participant_layer_id.clone(), number));
                graph.add_annotation(annotation);
            }
        } else if layer_id == schema.corpus_layer_id {
            if let Some(corpus) = &row.corpus_name {
                graph.add_annotation(Annotation::new(
                    AnnotationId::meta(schema.corpus_layer_id.clone(), row.ag_id),
                    corpus.clone(),
                    layer_id,
                    start,
                    end,
                ));
            }
        } else if layer_id == schema.episode_layer_id {
            if let (Some(name), Some(family_id)) = (&row.family_name, row.family_id) {
                graph.add_annotation(Annotation::new(
                    AnnotationId::meta(schema.episode_layer_id.clone(), family_id),
                    name.clone(),
                    layer_id,
                    start,
                    end,
                ));
            }
        } else if layer_id == "transcript_type" {
            if let Some(name) = &row.type_name {
                graph.add_annotation(Annotation::new(
                    AnnotationId::meta("transcript_type", row.ag_id),
                    name.clone(),
                    layer_id,
                    start,
                    end,
                ));
            }
        }
        Ok(())
    }

    fn load_transcript_attributes(
        &self,
        row: &GraphRow,
        layer_id: &str,
        bounds: (crate::model::AnchorId, crate::model::AnchorId),
        graph: &mut Graph,
    ) -> Result<()> {
        let attribute = crate::compiler::graph::attribute_name(layer_id);
        let (start, end) = bounds;
        let mut stmt = self.conn().prepare(
            "SELECT annotation_id, label, label_status, annotated_by, annotated_when \
             FROM annotation_transcript WHERE ag_id = ?1 AND layer = ?2 ORDER BY annotation_id",
        )?;
        let rows = stmt.query_map(rusqlite::params![row.ag_id, attribute], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut ordinal = 0;
        for r in rows {
            let (annotation_id, label, status, annotated_by, annotated_when) = r?;
            ordinal += 1;
            let mut annotation = Annotation::new(
                AnnotationId::TranscriptAttr {
                    attribute: attribute.clone(),
                    row: annotation_id,
                },
                label.unwrap_or_default(),
                layer_id,
                start.clone(),
                end.clone(),
            )
            .with_ordinal(ordinal);
            annotation.confidence = Confidence::from_status(status);
            annotation.annotator = annotated_by;
            annotation.when = parse_when(annotated_when);
            graph.add_annotation(annotation);
        }
        Ok(())
    }

    fn load_participant_attributes(
        &self,
        row: &GraphRow,
        layer_id: &str,
        speakers: &HashMap<i64, String>,
        bounds: (crate::model::AnchorId, crate::model::AnchorId),
        graph: &mut Graph,
    ) -> Result<()> {
        let schema = graph.schema.clone();
        let attribute = crate::compiler::graph::attribute_name(layer_id);
        let (start, end) = bounds;
        let mut stmt = self.conn().prepare(
            "SELECT annotation_id, speaker_number, label, label_status, annotated_by, \
             annotated_when FROM annotation_participant \
             WHERE layer = ?1 AND speaker_number IN \
               (SELECT speaker_number FROM transcript_speaker WHERE ag_id = ?2) \
             ORDER BY annotation_id",
        )?;
        let rows = stmt.query_map(rusqlite::params![attribute, row.ag_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?;
        let mut ordinals: HashMap<i64, i64> = HashMap::new();
        for r in rows {
            let (annotation_id, speaker_number, label, status, annotated_by, annotated_when) = r?;
            if !speakers.contains_key(&speaker_number) {
                continue;
            }
            let ordinal = ordinals.entry(speaker_number).or_insert(0);
            *ordinal += 1;
            let mut annotation = Annotation::new(
                AnnotationId::ParticipantAttr {
                    attribute: attribute.clone(),
                    row: annotation_id,
                },
                label.unwrap_or_default(),
                layer_id,
                start.clone(),
                end.clone(),
            )
            .with_ordinal(*ordinal);
            annotation.parent_id = Some(AnnotationId::meta(
                schema.participant_layer_id.clone(),
                speaker_number,
            ));
            annotation.confidence = Confidence::from_status(status);
            annotation.annotator = annotated_by;
            annotation.when = parse_when(annotated_when);
            graph.add_annotation(annotation);
        }
        Ok(())
    }

    fn load_episode_tags(
        &self,
        row: &GraphRow,
        layer_id: &str,
        bounds: (crate::model::AnchorId, crate::model::AnchorId),
        graph: &mut Graph,
    ) -> Result<()> {
        let Some(family_id) = row.family_id else {
            return Ok(());
        };
        let attribute = crate::compiler::graph::attribute_name(layer_id);
        let (start, end) = bounds;
        let mut stmt = self.conn().prepare(
            "SELECT annotation_id, label FROM annotation_episode \
             WHERE family_id = ?1 AND layer = ?2 ORDER BY annotation_id",
        )?;
        let rows = stmt.query_map(rusqlite::params![family_id, attribute], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?))
        })?;
        let mut ordinal = 0;
        for r in rows {
            let (annotation_id, label) = r?;
            ordinal += 1;
            graph.add_annotation(
                Annotation::new(
                    AnnotationId::meta(layer_id, annotation_id),
                    label.unwrap_or_default(),
                    layer_id,
                    start.clone(),
                    end.clone(),
                )
                .with_ordinal(ordinal),
            );
        }
        Ok(())
    }
}
