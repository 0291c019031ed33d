//! Diff-based persistence of graph changes.
//!
//! `save_graph` walks the graph's ordered change log inside one
//! transaction, writing each distinct object exactly once. Anchors are
//! written before the annotations that reference them; durable ids
//! assigned during the pass collect in rename tables consulted at write
//! time and applied to the in-memory graph once at the end. Word- and
//! segment-scope rows carry denormalized ancestor keys computed from the
//! live parent chain; writes that stale other rows' keys queue extra
//! updates drained to a fixed point before the transaction commits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::model::{AnchorId, Annotation, AnnotationId, ChangeMarker, ChangeTarget, Graph};
use crate::schema::{LayerScope, Schema, TemporalScope};
use crate::store::bootstrap::layer_table;
use crate::store::load::GraphRow;
use crate::store::{SqlAnnotationStore, ValidationPolicy};

fn format_when(when: Option<OffsetDateTime>) -> Option<String> {
    when.or_else(|| Some(OffsetDateTime::now_utc()))
        .and_then(|w| w.format(&Rfc3339).ok())
}

/// A deferred refresh of denormalized keys in rows not listed in the
/// change log.
#[derive(Clone, Debug)]
enum ExtraUpdate {
    /// A word row's turn linkage changed; refresh every row keyed on it.
    WordMoved {
        word_row: i64,
        turn_row: Option<i64>,
        ordinal_in_turn: i64,
    },
    /// A segment row's ancestry changed; refresh every row keyed on it.
    SegmentMoved {
        segment_row: i64,
        word_row: Option<i64>,
        turn_row: Option<i64>,
        ordinal_in_word: i64,
    },
}

/// Denormalized ancestor keys for one temporal row.
#[derive(Clone, Copy, Debug, Default)]
struct AncestorKeys {
    turn_row: Option<i64>,
    word_row: Option<i64>,
    ordinal_in_turn: Option<i64>,
    segment_row: Option<i64>,
    ordinal_in_word: Option<i64>,
}

struct SavePass<'a> {
    conn: &'a Connection,
    schema: Arc<Schema>,
    ag_id: i64,
    family_id: Option<i64>,
    anchor_renames: HashMap<AnchorId, AnchorId>,
    annotation_renames: HashMap<AnnotationId, AnnotationId>,
    done: HashSet<ChangeTarget>,
    extra_updates: VecDeque<ExtraUpdate>,
    refused_anchor_destroys: Vec<AnchorId>,
    applied: bool,
}

impl SqlAnnotationStore {
    /// Persists the graph's pending changes.
    ///
    /// Returns whether any change was applied; an empty change log is a
    /// no-op returning `false`. The whole save runs in one transaction, so
    /// a failure leaves no partial rows behind. On success the graph's
    /// provisional ids are replaced by their durable assignments and the
    /// change log is committed.
    pub fn save_graph(&mut self, graph: &mut Graph) -> Result<bool> {
        if !graph.has_changes() {
            return Ok(false);
        }
        let schema = self.get_schema()?;
        let existing = match self.resolve_graph_row(&graph.id) {
            Ok(row) => Some(row),
            Err(StoreError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let is_new = existing.is_none();

        let problems = self.validator().validate(graph);
        if !problems.is_empty() {
            if is_new || self.validation_policy() == ValidationPolicy::Fatal {
                return Err(StoreError::InvalidGraph {
                    id: graph.id.clone(),
                    messages: problems,
                });
            }
            for problem in &problems {
                warn!(graph = %graph.id, %problem, "validation problem on update; saving anyway");
            }
        }

        preflight(graph, &schema)?;

        let changes = graph.changes();
        let tx = self.conn_mut().transaction()?;
        let row = match existing {
            Some(row) => row,
            None => create_container_row(&tx, graph)?,
        };

        let mut pass = SavePass {
            conn: &tx,
            schema: Arc::clone(&schema),
            ag_id: row.ag_id,
            family_id: row.family_id,
            anchor_renames: HashMap::new(),
            annotation_renames: HashMap::new(),
            done: HashSet::new(),
            extra_updates: VecDeque::new(),
            refused_anchor_destroys: Vec::new(),
            applied: is_new,
        };
        for target in &changes {
            pass.save_target(graph, target)?;
        }
        pass.drain_extra_updates()?;

        let SavePass {
            anchor_renames,
            annotation_renames,
            refused_anchor_destroys,
            applied,
            ..
        } = pass;
        tx.commit()?;

        // only a committed save may update the graph's identity; a failed
        // pass must not leave it pointing at rolled-back rows or defaults
        graph.ag_id = Some(row.ag_id);
        if is_new {
            graph.corpus = row.corpus_name.clone();
            graph.episode = row.family_name.clone();
            graph.transcript_type = row.type_name.clone();
        }

        for id in &refused_anchor_destroys {
            graph.rollback_anchor_destroy(id);
        }
        graph.apply_renames(&anchor_renames, &annotation_renames);
        graph.commit();
        debug!(graph = %graph.id, changes = changes.len(), "saved graph");
        Ok(applied)
    }
}

/// Checks every changed object's identity against its expected grammar and
/// layer before any write happens.
fn preflight(graph: &Graph, schema: &Schema) -> Result<()> {
    for target in graph.changes() {
        match &target {
            ChangeTarget::Anchor(id) => {
                let Some(anchor) = graph.anchor(id) else {
                    continue;
                };
                match anchor.change {
                    ChangeMarker::Create if !id.is_provisional() => {
                        return Err(StoreError::InvalidId(format!(
                            "anchor marked for creation has durable id {id}"
                        )));
                    }
                    ChangeMarker::Update | ChangeMarker::Destroy if id.is_provisional() => {
                        return Err(StoreError::InvalidId(format!(
                            "anchor {id} was never saved"
                        )));
                    }
                    _ => {}
                }
            }
            ChangeTarget::Annotation(id) => {
                let Some(annotation) = graph.annotation(id) else {
                    continue;
                };
                let Some(layer) = schema.layer(&annotation.layer_id) else {
                    return Err(StoreError::not_found("layer", annotation.layer_id.clone()));
                };
                if annotation.change == ChangeMarker::Create {
                    if !id.is_provisional() {
                        return Err(StoreError::InvalidId(format!(
                            "annotation marked for creation has durable id {id}"
                        )));
                    }
                    continue;
                }
                let matches = match (&layer.scope, id) {
                    (LayerScope::Temporal(scope), AnnotationId::Temporal { scope: s, layer_num, .. }) => {
                        s == scope && Some(*layer_num) == layer.layer_num
                    }
                    (LayerScope::TranscriptAttribute, AnnotationId::TranscriptAttr { .. }) => true,
                    (LayerScope::ParticipantAttribute, AnnotationId::ParticipantAttr { .. }) => {
                        true
                    }
                    (LayerScope::EpisodeTag | LayerScope::System, AnnotationId::Meta { .. }) => {
                        true
                    }
                    _ => false,
                };
                if !matches {
                    return Err(StoreError::InvalidId(format!(
                        "annotation id {id} does not fit layer {}",
                        annotation.layer_id
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Creates the transcript container row for a brand-new graph, defaulting
/// corpus, episode and type when unset. The chosen values travel back via
/// the returned row; the graph itself is only updated after commit.
fn create_container_row(conn: &Connection, graph: &Graph) -> Result<GraphRow> {
    let corpus = match graph.corpus.clone() {
        Some(c) => c,
        None => conn
            .query_row(
                "SELECT corpus_name FROM corpus ORDER BY corpus_id LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or_else(|| "corpus".to_string()),
    };
    conn.execute(
        "INSERT OR IGNORE INTO corpus (corpus_name) VALUES (?1)",
        [&corpus],
    )?;

    let episode = graph.episode.clone().unwrap_or_else(|| graph.id.clone());
    conn.execute(
        "INSERT OR IGNORE INTO transcript_family (name) VALUES (?1)",
        [&episode],
    )?;
    let family_id: i64 = conn.query_row(
        "SELECT family_id FROM transcript_family WHERE name = ?1",
        [&episode],
        |r| r.get(0),
    )?;

    let transcript_type = match graph.transcript_type.clone() {
        Some(t) => t,
        None => conn
            .query_row(
                "SELECT transcript_type FROM transcript_type ORDER BY type_id LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?
            .unwrap_or_else(|| "interview".to_string()),
    };
    conn.execute(
        "INSERT OR IGNORE INTO transcript_type (transcript_type) VALUES (?1)",
        [&transcript_type],
    )?;
    let type_id: i64 = conn.query_row(
        "SELECT type_id FROM transcript_type WHERE transcript_type = ?1",
        [&transcript_type],
        |r| r.get(0),
    )?;

    conn.execute(
        "INSERT INTO transcript (transcript_id, corpus_name, family_id, family_sequence, type_id) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![graph.id, corpus, family_id, graph.family_sequence, type_id],
    )?;
    let ag_id = conn.last_insert_rowid();
    Ok(GraphRow {
        ag_id,
        transcript_id: graph.id.clone(),
        corpus_name: Some(corpus),
        family_id: Some(family_id),
        family_name: Some(episode),
        family_sequence: graph.family_sequence,
        type_name: Some(transcript_type),
    })
}

impl SavePass<'_> {
    fn save_target(&mut self, graph: &Graph, target: &ChangeTarget) -> Result<()> {
        if !self.done.insert(target.clone()) {
            return Ok(());
        }
        match target {
            ChangeTarget::Anchor(id) => self.save_anchor(graph, id),
            ChangeTarget::Annotation(id) => self.save_annotation(graph, id),
        }
    }

    fn anchor_row(&self, id: &AnchorId) -> Result<i64> {
        self.anchor_renames
            .get(id)
            .unwrap_or(id)
            .row()
            .ok_or_else(|| StoreError::InvalidId(format!("anchor {id} was never saved")))
    }

    fn annotation_row(&self, id: &AnnotationId) -> Result<i64> {
        self.annotation_renames
            .get(id)
            .unwrap_or(id)
            .temporal_row()
            .ok_or_else(|| StoreError::InvalidId(format!("annotation {id} was never saved")))
    }

    fn save_anchor(&mut self, graph: &Graph, id: &AnchorId) -> Result<()> {
        let Some(anchor) = graph.anchor(id) else {
            return Ok(());
        };
        match anchor.change {
            ChangeMarker::NoChange => {}
            ChangeMarker::Create => {
                self.conn.execute(
                    "INSERT INTO anchor (ag_id, offset, alignment_status, annotated_by, \
                     annotated_when) VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        self.ag_id,
                        anchor.offset,
                        anchor.confidence.status(),
                        anchor.annotator,
                        format_when(anchor.when),
                    ],
                )?;
                self.anchor_renames
                    .insert(id.clone(), AnchorId::Durable(self.conn.last_insert_rowid()));
                self.applied = true;
            }
            ChangeMarker::Update => {
                let row = self.anchor_row(id)?;
                self.conn.execute(
                    "UPDATE anchor SET offset = ?1, alignment_status = ?2, annotated_by = ?3, \
                     annotated_when = ?4 WHERE anchor_id = ?5",
                    rusqlite::params![
                        anchor.offset,
                        anchor.confidence.status(),
                        anchor.annotator,
                        format_when(anchor.when),
                        row,
                    ],
                )?;
                self.applied = true;
            }
            ChangeMarker::Destroy => {
                let row = self.anchor_row(id)?;
                // the destroy is refused while any layer still references
                // the anchor, not only layers in this save
                for layer in self.schema.temporal_layers() {
                    let Some(num) = layer.layer_num else { continue };
                    let referenced: Option<i64> = self
                        .conn
                        .query_row(
                            &format!(
                                "SELECT 1 FROM {} WHERE start_anchor_id = ?1 OR end_anchor_id = ?1 \
                                 LIMIT 1",
                                layer_table(num)
                            ),
                            [row],
                            |r| r.get(0),
                        )
                        .optional()?;
                    if referenced.is_some() {
                        warn!(anchor = %id, layer = %layer.id, "anchor still referenced; destroy refused");
                        self.refused_anchor_destroys.push(id.clone());
                        return Ok(());
                    }
                }
                self.conn
                    .execute("DELETE FROM anchor WHERE anchor_id = ?1", [row])?;
                self.applied = true;
            }
        }
        Ok(())
    }

    fn save_annotation(&mut self, graph: &Graph, id: &AnnotationId) -> Result<()> {
        let Some(annotation) = graph.annotation(id) else {
            return Ok(());
        };
        if annotation.change == ChangeMarker::NoChange {
            return Ok(());
        }
        // anchors first, then any provisional parent, so every reference
        // this write needs already has a durable id
        if annotation.change != ChangeMarker::Destroy {
            for anchor_id in [&annotation.start_id, &annotation.end_id] {
                if anchor_id.is_provisional() && !self.anchor_renames.contains_key(anchor_id) {
                    self.save_target(graph, &ChangeTarget::Anchor(anchor_id.clone()))?;
                }
            }
            if let Some(parent_id) = &annotation.parent_id {
                if parent_id.is_provisional()
                    && !self.annotation_renames.contains_key(parent_id)
                {
                    self.save_target(graph, &ChangeTarget::Annotation(parent_id.clone()))?;
                }
            }
        }
        let Some(layer) = self.schema.layer(&annotation.layer_id) else {
            return Err(StoreError::not_found("layer", annotation.layer_id.clone()));
        };
        match layer.scope.clone() {
            LayerScope::Temporal(scope) => self.save_temporal(graph, annotation, scope),
            LayerScope::System => self.save_system(annotation),
            LayerScope::TranscriptAttribute => self.save_transcript_attribute(annotation),
            LayerScope::ParticipantAttribute => self.save_participant_attribute(annotation),
            LayerScope::EpisodeTag => self.save_episode_tag(annotation),
        }
    }

    /// Resolves the row id of the nearest ancestor on `layer_id`, walking
    /// the live chain first and falling back to the parent's stored keys.
    fn ancestor_row(
        &self,
        graph: &Graph,
        annotation: &Annotation,
        layer_id: &str,
    ) -> Result<Option<i64>> {
        if annotation.layer_id == layer_id {
            return Ok(annotation.id.temporal_row().or_else(|| {
                self.annotation_renames
                    .get(&annotation.id)
                    .and_then(AnnotationId::temporal_row)
            }));
        }
        for ancestor in graph.ancestors_of_annotation(&annotation.id) {
            if ancestor.layer_id == layer_id {
                return self.annotation_row(&ancestor.id).map(Some);
            }
        }
        // chain breaks in memory; follow the stored keys of the durable
        // parent row instead
        let Some(parent_id) = &annotation.parent_id else {
            return Ok(None);
        };
        let Some(parent_layer) = self
            .schema
            .layer(&self.schema.layer(&annotation.layer_id).map(|l| l.parent_id.clone()).unwrap_or_default())
        else {
            return Ok(None);
        };
        let (Some(parent_scope), Some(parent_num)) =
            (parent_layer.scope.temporal(), parent_layer.layer_num)
        else {
            return Ok(None);
        };
        let parent_row = self.annotation_row(parent_id)?;
        let target = self.schema.layer(layer_id);
        let (column, needed) = match target.and_then(|l| l.scope.temporal()) {
            Some(TemporalScope::Meta) => ("turn_annotation_id", TemporalScope::Meta),
            Some(TemporalScope::Word) => ("word_annotation_id", TemporalScope::Word),
            Some(TemporalScope::Segment) => ("segment_annotation_id", TemporalScope::Segment),
            _ => return Ok(None),
        };
        // the parent's table only carries the column for coarser scopes
        if parent_scope < needed {
            return Ok(None);
        }
        let row: Option<i64> = self
            .conn
            .query_row(
                &format!(
                    "SELECT {column} FROM {} WHERE annotation_id = ?1",
                    layer_table(parent_num)
                ),
                [parent_row],
                |r| r.get(0),
            )
            .optional()?
            .flatten();
        Ok(row)
    }

    fn ancestor_keys(
        &self,
        graph: &Graph,
        annotation: &Annotation,
        scope: TemporalScope,
    ) -> Result<AncestorKeys> {
        let mut keys = AncestorKeys::default();
        if scope >= TemporalScope::Meta {
            keys.turn_row = self.ancestor_row(graph, annotation, &self.schema.turn_layer_id)?;
        }
        if scope >= TemporalScope::Word {
            keys.word_row = self.ancestor_row(graph, annotation, &self.schema.word_layer_id)?;
            keys.ordinal_in_turn = if annotation.layer_id == self.schema.word_layer_id {
                Some(annotation.ordinal)
            } else {
                graph
                    .ancestors_of_annotation(&annotation.id)
                    .iter()
                    .find(|a| a.layer_id == self.schema.word_layer_id)
                    .map(|a| a.ordinal)
            };
        }
        if scope >= TemporalScope::Segment {
            keys.segment_row =
                self.ancestor_row(graph, annotation, &self.schema.segment_layer_id)?;
            keys.ordinal_in_word = if annotation.layer_id == self.schema.segment_layer_id {
                Some(annotation.ordinal)
            } else {
                graph
                    .ancestors_of_annotation(&annotation.id)
                    .iter()
                    .find(|a| a.layer_id == self.schema.segment_layer_id)
                    .map(|a| a.ordinal)
            };
        }
        Ok(keys)
    }

    /// The label stored for a row: turn and utterance rows store the
    /// owning participant's speaker number.
    fn stored_label(&self, graph: &Graph, annotation: &Annotation) -> Result<String> {
        let speaker_labelled = annotation.layer_id == self.schema.turn_layer_id
            || annotation.layer_id == self.schema.utterance_layer_id;
        if !speaker_labelled {
            return Ok(annotation.label.clone());
        }
        let speaker = std::iter::once(annotation)
            .chain(graph.ancestors_of_annotation(&annotation.id))
            .find_map(|a| {
                let parent = a.parent_id.as_ref()?;
                match self.annotation_renames.get(parent).unwrap_or(parent) {
                    AnnotationId::Meta { layer, entity }
                        if *layer == self.schema.participant_layer_id =>
                    {
                        Some(*entity)
                    }
                    _ => None,
                }
            });
        match speaker {
            Some(number) => Ok(number.to_string()),
            None => self.speaker_number_by_name(&annotation.label).map(|n| {
                n.map(|n| n.to_string())
                    .unwrap_or_else(|| annotation.label.clone())
            }),
        }
    }

    fn speaker_number_by_name(&self, name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT speaker_number FROM speaker WHERE name = ?1",
                [name],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn parent_column_value(&self, annotation: &Annotation) -> Result<Option<i64>> {
        let Some(parent) = &annotation.parent_id else {
            return Ok(None);
        };
        match self.annotation_renames.get(parent).unwrap_or(parent) {
            AnnotationId::Meta { layer, entity } if *layer == self.schema.participant_layer_id => {
                Ok(Some(*entity))
            }
            resolved => resolved
                .temporal_row()
                .map(Some)
                .ok_or_else(|| StoreError::InvalidId(format!("annotation {parent} was never saved"))),
        }
    }

    fn save_temporal(
        &mut self,
        graph: &Graph,
        annotation: &Annotation,
        scope: TemporalScope,
    ) -> Result<()> {
        let Some(num) = self
            .schema
            .layer(&annotation.layer_id)
            .and_then(|l| l.layer_num)
        else {
            return Err(StoreError::not_found("layer", annotation.layer_id.clone()));
        };
        let table = layer_table(num);
        match annotation.change {
            ChangeMarker::NoChange => Ok(()),
            ChangeMarker::Destroy => {
                let row = self.annotation_row(&annotation.id)?;
                self.conn
                    .execute(&format!("DELETE FROM {table} WHERE annotation_id = ?1"), [row])?;
                self.applied = true;
                Ok(())
            }
            ChangeMarker::Create | ChangeMarker::Update => {
                let keys = self.ancestor_keys(graph, annotation, scope)?;
                let label = self.stored_label(graph, annotation)?;
                let start = self.anchor_row(&annotation.start_id)?;
                let end = self.anchor_row(&annotation.end_id)?;
                let parent = self.parent_column_value(annotation)?;
                let mut columns = vec![
                    ("ag_id", Value::from(self.ag_id)),
                    ("label", Value::from(label)),
                    ("label_status", Value::from(annotation.confidence.status())),
                    ("start_anchor_id", Value::from(start)),
                    ("end_anchor_id", Value::from(end)),
                    ("parent_id", Value::from(parent)),
                    ("ordinal", Value::from(annotation.ordinal)),
                    ("annotated_by", Value::from(annotation.annotator.clone())),
                    ("annotated_when", Value::from(format_when(annotation.when))),
                ];
                if scope >= TemporalScope::Meta {
                    columns.push(("turn_annotation_id", Value::from(keys.turn_row)));
                }
                if scope >= TemporalScope::Word {
                    columns.push(("word_annotation_id", Value::from(keys.word_row)));
                    columns.push(("ordinal_in_turn", Value::from(keys.ordinal_in_turn)));
                }
                if scope >= TemporalScope::Segment {
                    columns.push(("segment_annotation_id", Value::from(keys.segment_row)));
                    columns.push(("ordinal_in_word", Value::from(keys.ordinal_in_word)));
                }

                let row = if annotation.change == ChangeMarker::Create {
                    let names: Vec<&str> = columns.iter().map(|(n, _)| *n).collect();
                    let placeholders: Vec<String> =
                        (1..=columns.len()).map(|i| format!("?{i}")).collect();
                    let values: Vec<&dyn rusqlite::ToSql> =
                        columns.iter().map(|(_, v)| v as &dyn rusqlite::ToSql).collect();
                    self.conn.execute(
                        &format!(
                            "INSERT INTO {table} ({}) VALUES ({})",
                            names.join(", "),
                            placeholders.join(", ")
                        ),
                        &values[..],
                    )?;
                    let row = self.conn.last_insert_rowid();
                    self.annotation_renames.insert(
                        annotation.id.clone(),
                        AnnotationId::temporal(scope, num, row),
                    );
                    row
                } else {
                    let row = self.annotation_row(&annotation.id)?;
                    let assignments: Vec<String> = columns
                        .iter()
                        .enumerate()
                        .map(|(i, (n, _))| format!("{n} = ?{}", i + 1))
                        .collect();
                    let mut values: Vec<&dyn rusqlite::ToSql> =
                        columns.iter().map(|(_, v)| v as &dyn rusqlite::ToSql).collect();
                    values.push(&row);
                    self.conn.execute(
                        &format!(
                            "UPDATE {table} SET {} WHERE annotation_id = ?{}",
                            assignments.join(", "),
                            columns.len() + 1
                        ),
                        &values[..],
                    )?;
                    row
                };
                self.applied = true;

                // base-layer rows are their own join key
                if annotation.layer_id == self.schema.turn_layer_id {
                    self.conn.execute(
                        &format!(
                            "UPDATE {table} SET turn_annotation_id = annotation_id \
                             WHERE annotation_id = ?1"
                        ),
                        [row],
                    )?;
                } else if annotation.layer_id == self.schema.word_layer_id {
                    self.conn.execute(
                        &format!(
                            "UPDATE {table} SET word_annotation_id = annotation_id \
                             WHERE annotation_id = ?1"
                        ),
                        [row],
                    )?;
                    self.extra_updates.push_back(ExtraUpdate::WordMoved {
                        word_row: row,
                        turn_row: keys.turn_row,
                        ordinal_in_turn: annotation.ordinal,
                    });
                } else if annotation.layer_id == self.schema.segment_layer_id {
                    self.conn.execute(
                        &format!(
                            "UPDATE {table} SET segment_annotation_id = annotation_id \
                             WHERE annotation_id = ?1"
                        ),
                        [row],
                    )?;
                    self.extra_updates.push_back(ExtraUpdate::SegmentMoved {
                        segment_row: row,
                        word_row: keys.word_row,
                        turn_row: keys.turn_row,
                        ordinal_in_word: annotation.ordinal,
                    });
                }
                Ok(())
            }
        }
    }

    /// Refreshes denormalized keys in rows whose ancestor rows were
    /// rewritten in this pass, until no further refreshes arise.
    fn drain_extra_updates(&mut self) -> Result<()> {
        while let Some(update) = self.extra_updates.pop_front() {
            match update {
                ExtraUpdate::WordMoved {
                    word_row,
                    turn_row,
                    ordinal_in_turn,
                } => {
                    let mut moved_segments = Vec::new();
                    for layer in self.schema.temporal_layers() {
                        let (Some(scope), Some(num)) = (layer.scope.temporal(), layer.layer_num)
                        else {
                            continue;
                        };
                        if scope < TemporalScope::Word {
                            continue;
                        }
                        let changed = self.conn.execute(
                            &format!(
                                "UPDATE {} SET turn_annotation_id = ?1, ordinal_in_turn = ?2 \
                                 WHERE word_annotation_id = ?3 AND annotation_id <> ?3 \
                                 AND (turn_annotation_id IS NOT ?1 OR ordinal_in_turn IS NOT ?2)",
                                layer_table(num)
                            ),
                            rusqlite::params![turn_row, ordinal_in_turn, word_row],
                        )?;
                        if changed > 0 && layer.id == self.schema.segment_layer_id {
                            let mut stmt = self.conn.prepare(&format!(
                                "SELECT annotation_id, ordinal FROM {} \
                                 WHERE word_annotation_id = ?1",
                                layer_table(num)
                            ))?;
                            let rows = stmt
                                .query_map([word_row], |r| Ok((r.get(0)?, r.get(1)?)))?;
                            for r in rows {
                                let (segment_row, ordinal_in_word): (i64, i64) = r?;
                                moved_segments.push(ExtraUpdate::SegmentMoved {
                                    segment_row,
                                    word_row: Some(word_row),
                                    turn_row,
                                    ordinal_in_word,
                                });
                            }
                        }
                    }
                    self.extra_updates.extend(moved_segments);
                }
                ExtraUpdate::SegmentMoved {
                    segment_row,
                    word_row,
                    turn_row,
                    ordinal_in_word,
                } => {
                    for layer in self.schema.temporal_layers() {
                        let (Some(scope), Some(num)) = (layer.scope.temporal(), layer.layer_num)
                        else {
                            continue;
                        };
                        if scope < TemporalScope::Segment {
                            continue;
                        }
                        self.conn.execute(
                            &format!(
                                "UPDATE {} SET turn_annotation_id = ?1, word_annotation_id = ?2, \
                                 ordinal_in_word = ?3 \
                                 WHERE segment_annotation_id = ?4 AND annotation_id <> ?4 \
                                 AND (turn_annotation_id IS NOT ?1 \
                                   OR word_annotation_id IS NOT ?2 \
                                   OR ordinal_in_word IS NOT ?3)",
                                layer_table(num)
                            ),
                            rusqlite::params![turn_row, word_row, ordinal_in_word, segment_row],
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn save_system(&mut self, annotation: &Annotation) -> Result<()> {
        let layer_id = annotation.layer_id.as_str();
        if layer_id == self.schema.participant_layer_id {
            self.save_participant(annotation)
        } else if layer_id == "main_participant" {
            self.save_main_participant(annotation)
        } else if layer_id == self.schema.corpus_layer_id {
            self.save_corpus_assignment(annotation)
        } else if layer_id == self.schema.episode_layer_id {
            self.save_episode_assignment(annotation)
        } else if layer_id == "transcript_type" {
            self.save_type_assignment(annotation)
        } else {
            Err(StoreError::InvalidArgument(format!(
                "layer {layer_id} cannot be saved per graph"
            )))
        }
    }

    fn save_participant(&mut self, annotation: &Annotation) -> Result<()> {
        match annotation.change {
            ChangeMarker::NoChange => {}
            ChangeMarker::Create => {
                self.conn.execute(
                    "INSERT OR IGNORE INTO speaker (name) VALUES (?1)",
                    [&annotation.label],
                )?;
                let number: i64 = self.conn.query_row(
                    "SELECT speaker_number FROM speaker WHERE name = ?1",
                    [&annotation.label],
                    |r| r.get(0),
                )?;
                self.conn.execute(
                    "INSERT OR IGNORE INTO transcript_speaker (ag_id, speaker_number) \
                     VALUES (?1, ?2)",
                    rusqlite::params![self.ag_id, number],
                )?;
                self.annotation_renames.insert(
                    annotation.id.clone(),
                    AnnotationId::meta(self.schema.participant_layer_id.clone(), number),
                );
                self.applied = true;
            }
            ChangeMarker::Update => {
                let AnnotationId::Meta { entity, .. } = &annotation.id else {
                    return Err(StoreError::InvalidId(annotation.id.to_string()));
                };
                self.conn.execute(
                    "UPDATE speaker SET name = ?1 WHERE speaker_number = ?2",
                    rusqlite::params![annotation.label, entity],
                )?;
                self.applied = true;
            }
            ChangeMarker::Destroy => {
                let AnnotationId::Meta { entity, .. } = &annotation.id else {
                    return Err(StoreError::InvalidId(annotation.id.to_string()));
                };
                self.conn.execute(
                    "DELETE FROM transcript_speaker WHERE ag_id = ?1 AND speaker_number = ?2",
                    rusqlite::params![self.ag_id, entity],
                )?;
                self.applied = true;
            }
        }
        Ok(())
    }

    fn save_main_participant(&mut self, annotation: &Annotation) -> Result<()> {
        let number = match annotation.parent_id.as_ref() {
            Some(parent) => match self.annotation_renames.get(parent).unwrap_or(parent) {
                AnnotationId::Meta { entity, .. } => *entity,
                _ => return Err(StoreError::InvalidId(annotation.id.to_string())),
            },
            None => match self.speaker_number_by_name(&annotation.label)? {
                Some(n) => n,
                None => {
                    return Err(StoreError::not_found(
                        "participant",
                        annotation.label.clone(),
                    ))
                }
            },
        };
        let flag = annotation.change != ChangeMarker::Destroy;
        self.conn.execute(
            "UPDATE transcript_speaker SET main_speaker = ?1 \
             WHERE ag_id = ?2 AND speaker_number = ?3",
            rusqlite::params![flag, self.ag_id, number],
        )?;
        if annotation.change == ChangeMarker::Create {
            self.annotation_renames.insert(
                annotation.id.clone(),
                AnnotationId::meta("main_participant", number),
            );
        }
        self.applied = true;
        Ok(())
    }

    fn save_corpus_assignment(&mut self, annotation: &Annotation) -> Result<()> {
        if annotation.change == ChangeMarker::Destroy {
            self.conn.execute(
                "UPDATE transcript SET corpus_name = NULL WHERE ag_id = ?1",
                [self.ag_id],
            )?;
        } else {
            self.conn.execute(
                "INSERT OR IGNORE INTO corpus (corpus_name) VALUES (?1)",
                [&annotation.label],
            )?;
            self.conn.execute(
                "UPDATE transcript SET corpus_name = ?1 WHERE ag_id = ?2",
                rusqlite::params![annotation.label, self.ag_id],
            )?;
            if annotation.change == ChangeMarker::Create {
                self.annotation_renames.insert(
                    annotation.id.clone(),
                    AnnotationId::meta(self.schema.corpus_layer_id.clone(), self.ag_id),
                );
            }
        }
        self.applied = true;
        Ok(())
    }

    fn save_episode_assignment(&mut self, annotation: &Annotation) -> Result<()> {
        if annotation.change == ChangeMarker::Destroy {
            self.conn.execute(
                "UPDATE transcript SET family_id = NULL WHERE ag_id = ?1",
                [self.ag_id],
            )?;
            self.applied = true;
            return Ok(());
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO transcript_family (name) VALUES (?1)",
            [&annotation.label],
        )?;
        let family_id: i64 = self.conn.query_row(
            "SELECT family_id FROM transcript_family WHERE name = ?1",
            [&annotation.label],
            |r| r.get(0),
        )?;
        self.conn.execute(
            "UPDATE transcript SET family_id = ?1 WHERE ag_id = ?2",
            rusqlite::params![family_id, self.ag_id],
        )?;
        self.family_id = Some(family_id);
        if annotation.change == ChangeMarker::Create {
            self.annotation_renames.insert(
                annotation.id.clone(),
                AnnotationId::meta(self.schema.episode_layer_id.clone(), family_id),
            );
        }
        self.applied = true;
        Ok(())
    }

    fn save_type_assignment(&mut self, annotation: &Annotation) -> Result<()> {
        if annotation.change == ChangeMarker::Destroy {
            self.conn.execute(
                "UPDATE transcript SET type_id = NULL WHERE ag_id = ?1",
                [self.ag_id],
            )?;
            self.applied = true;
            return Ok(());
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO transcript_type (transcript_type) VALUES (?1)",
            [&annotation.label],
        )?;
        let type_id: i64 = self.conn.query_row(
            "SELECT type_id FROM transcript_type WHERE transcript_type = ?1",
            [&annotation.label],
            |r| r.get(0),
        )?;
        self.conn.execute(
            "UPDATE transcript SET type_id = ?1 WHERE ag_id = ?2",
            rusqlite::params![type_id, self.ag_id],
        )?;
        if annotation.change == ChangeMarker::Create {
            self.annotation_renames.insert(
                annotation.id.clone(),
                AnnotationId::meta("transcript_type", self.ag_id),
            );
        }
        self.applied = true;
        Ok(())
    }

    fn save_transcript_attribute(&mut self, annotation: &Annotation) -> Result<()> {
        let attribute = crate::compiler::graph::attribute_name(&annotation.layer_id);
        match annotation.change {
            ChangeMarker::NoChange => {}
            ChangeMarker::Create => {
                self.conn.execute(
                    "INSERT INTO annotation_transcript (ag_id, layer, label, label_status, \
                     annotated_by, annotated_when) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        self.ag_id,
                        attribute,
                        annotation.label,
                        annotation.confidence.status(),
                        annotation.annotator,
                        format_when(annotation.when),
                    ],
                )?;
                self.annotation_renames.insert(
                    annotation.id.clone(),
                    AnnotationId::TranscriptAttr {
                        attribute,
                        row: self.conn.last_insert_rowid(),
                    },
                );
                self.applied = true;
            }
            ChangeMarker::Update => {
                let AnnotationId::TranscriptAttr { row, .. } = &annotation.id else {
                    return Err(StoreError::InvalidId(annotation.id.to_string()));
                };
                self.conn.execute(
                    "UPDATE annotation_transcript SET label = ?1, label_status = ?2, \
                     annotated_by = ?3, annotated_when = ?4 WHERE annotation_id = ?5",
                    rusqlite::params![
                        annotation.label,
                        annotation.confidence.status(),
                        annotation.annotator,
                        format_when(annotation.when),
                        row,
                    ],
                )?;
                self.applied = true;
            }
            ChangeMarker::Destroy => {
                let AnnotationId::TranscriptAttr { row, .. } = &annotation.id else {
                    return Err(StoreError::InvalidId(annotation.id.to_string()));
                };
                self.conn.execute(
                    "DELETE FROM annotation_transcript WHERE annotation_id = ?1",
                    [row],
                )?;
                self.applied = true;
            }
        }
        Ok(())
    }

    fn save_participant_attribute(&mut self, annotation: &Annotation) -> Result<()> {
        let attribute = crate::compiler::graph::attribute_name(&annotation.layer_id);
        match annotation.change {
            ChangeMarker::NoChange => {}
            ChangeMarker::Create => {
                let number = match annotation.parent_id.as_ref() {
                    Some(parent) => {
                        match self.annotation_renames.get(parent).unwrap_or(parent) {
                            AnnotationId::Meta { entity, .. } => *entity,
                            _ => return Err(StoreError::InvalidId(annotation.id.to_string())),
                        }
                    }
                    None => {
                        return Err(StoreError::InvalidArgument(format!(
                            "participant attribute {} has no participant parent",
                            annotation.id
                        )))
                    }
                };
                self.conn.execute(
                    "INSERT INTO annotation_participant (speaker_number, layer, label, \
                     label_status, annotated_by, annotated_when) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        number,
                        attribute,
                        annotation.label,
                        annotation.confidence.status(),
                        annotation.annotator,
                        format_when(annotation.when),
                    ],
                )?;
                self.annotation_renames.insert(
                    annotation.id.clone(),
                    AnnotationId::ParticipantAttr {
                        attribute,
                        row: self.conn.last_insert_rowid(),
                    },
                );
                self.applied = true;
            }
            ChangeMarker::Update => {
                let AnnotationId::ParticipantAttr { row, .. } = &annotation.id else {
                    return Err(StoreError::InvalidId(annotation.id.to_string()));
                };
                self.conn.execute(
                    "UPDATE annotation_participant SET label = ?1, label_status = ?2, \
                     annotated_by = ?3, annotated_when = ?4 WHERE annotation_id = ?5",
                    rusqlite::params![
                        annotation.label,
                        annotation.confidence.status(),
                        annotation.annotator,
                        format_when(annotation.when),
                        row,
                    ],
                )?;
                self.applied = true;
            }
            ChangeMarker::Destroy => {
                let AnnotationId::ParticipantAttr { row, .. } = &annotation.id else {
                    return Err(StoreError::InvalidId(annotation.id.to_string()));
                };
                self.conn.execute(
                    "DELETE FROM annotation_participant WHERE annotation_id = ?1",
                    [row],
                )?;
                self.applied = true;
            }
        }
        Ok(())
    }

    fn save_episode_tag(&mut self, annotation: &Annotation) -> Result<()> {
        let Some(family_id) = self.family_id else {
            return Err(StoreError::InvalidArgument(format!(
                "graph has no episode for tag {}",
                annotation.id
            )));
        };
        let attribute = crate::compiler::graph::attribute_name(&annotation.layer_id);
        match annotation.change {
            ChangeMarker::NoChange => {}
            ChangeMarker::Create => {
                self.conn.execute(
                    "INSERT INTO annotation_episode (family_id, layer, label, label_status, \
                     annotated_by, annotated_when) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        family_id,
                        attribute,
                        annotation.label,
                        annotation.confidence.status(),
                        annotation.annotator,
                        format_when(annotation.when),
                    ],
                )?;
                self.annotation_renames.insert(
                    annotation.id.clone(),
                    AnnotationId::meta(
                        annotation.layer_id.clone(),
                        self.conn.last_insert_rowid(),
                    ),
                );
                self.applied = true;
            }
            ChangeMarker::Update | ChangeMarker::Destroy => {
                let AnnotationId::Meta { entity, .. } = &annotation.id else {
                    return Err(StoreError::InvalidId(annotation.id.to_string()));
                };
                if annotation.change == ChangeMarker::Update {
                    self.conn.execute(
                        "UPDATE annotation_episode SET label = ?1 WHERE annotation_id = ?2",
                        rusqlite::params![annotation.label, entity],
                    )?;
                } else {
                    self.conn.execute(
                        "DELETE FROM annotation_episode WHERE annotation_id = ?1",
                        [entity],
                    )?;
                }
                self.applied = true;
            }
        }
        Ok(())
    }
}

/// Owned column value used when building per-scope statements.
#[derive(Clone, Debug)]
enum Value {
    Null,
    Integer(i64),
    Text(String),
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value as SqlV};
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlV::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlV::Integer(*i)),
            Value::Text(s) => ToSqlOutput::Owned(SqlV::Text(s.clone())),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Integer(v)
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Value {
        v.map(Value::Integer).unwrap_or(Value::Null)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Text(v)
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Value {
        v.map(Value::Text).unwrap_or(Value::Null)
    }
}
