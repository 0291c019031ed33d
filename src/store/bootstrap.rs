//! Physical schema bootstrap and layer registration.
//!
//! The backend shape is fixed: identity tables (transcript, family, corpus,
//! type, speaker, linkage), one shared anchor table, one annotation table
//! per temporal layer, generic attribute tables, and the layer/attribute
//! registries. Per-layer tables carry denormalized ancestor keys whose
//! columns depend on the layer's scope.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;
use crate::schema::{Layer, LayerScope, TemporalScope};

const BASE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS corpus (
  corpus_id INTEGER PRIMARY KEY,
  corpus_name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS transcript_family (
  family_id INTEGER PRIMARY KEY,
  name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS transcript_type (
  type_id INTEGER PRIMARY KEY,
  transcript_type TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS transcript (
  ag_id INTEGER PRIMARY KEY,
  transcript_id TEXT NOT NULL UNIQUE,
  corpus_name TEXT,
  family_id INTEGER REFERENCES transcript_family(family_id),
  family_sequence INTEGER NOT NULL DEFAULT 1,
  type_id INTEGER REFERENCES transcript_type(type_id)
);
CREATE TABLE IF NOT EXISTS speaker (
  speaker_number INTEGER PRIMARY KEY,
  name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS speaker_corpus (
  speaker_number INTEGER NOT NULL REFERENCES speaker(speaker_number),
  corpus_id INTEGER NOT NULL REFERENCES corpus(corpus_id),
  PRIMARY KEY (speaker_number, corpus_id)
);
CREATE TABLE IF NOT EXISTS transcript_speaker (
  ag_id INTEGER NOT NULL REFERENCES transcript(ag_id),
  speaker_number INTEGER NOT NULL REFERENCES speaker(speaker_number),
  main_speaker INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY (ag_id, speaker_number)
);
CREATE TABLE IF NOT EXISTS anchor (
  anchor_id INTEGER PRIMARY KEY,
  ag_id INTEGER NOT NULL REFERENCES transcript(ag_id),
  offset REAL,
  alignment_status INTEGER NOT NULL DEFAULT 0,
  annotated_by TEXT,
  annotated_when TEXT
);
CREATE INDEX IF NOT EXISTS idx_anchor_ag ON anchor(ag_id, offset);
CREATE TABLE IF NOT EXISTS layer (
  layer_id INTEGER PRIMARY KEY,
  short_description TEXT NOT NULL UNIQUE,
  description TEXT,
  alignment INTEGER NOT NULL DEFAULT 2,
  peers INTEGER NOT NULL DEFAULT 1,
  peers_overlap INTEGER NOT NULL DEFAULT 0,
  saturated INTEGER NOT NULL DEFAULT 0,
  parent_id TEXT NOT NULL,
  parent_includes INTEGER NOT NULL DEFAULT 1,
  type TEXT NOT NULL DEFAULT 'string',
  scope TEXT NOT NULL,
  valid_labels TEXT
);
CREATE TABLE IF NOT EXISTS attribute_definition (
  class_id TEXT NOT NULL,
  attribute TEXT NOT NULL,
  label TEXT,
  type TEXT NOT NULL DEFAULT 'string',
  valid_labels TEXT,
  PRIMARY KEY (class_id, attribute)
);
CREATE TABLE IF NOT EXISTS annotation_transcript (
  annotation_id INTEGER PRIMARY KEY,
  ag_id INTEGER NOT NULL REFERENCES transcript(ag_id),
  layer TEXT NOT NULL,
  label TEXT,
  label_status INTEGER NOT NULL DEFAULT 0,
  annotated_by TEXT,
  annotated_when TEXT
);
CREATE INDEX IF NOT EXISTS idx_at_ag_layer ON annotation_transcript(ag_id, layer);
CREATE TABLE IF NOT EXISTS annotation_participant (
  annotation_id INTEGER PRIMARY KEY,
  speaker_number INTEGER NOT NULL REFERENCES speaker(speaker_number),
  layer TEXT NOT NULL,
  label TEXT,
  label_status INTEGER NOT NULL DEFAULT 0,
  annotated_by TEXT,
  annotated_when TEXT
);
CREATE INDEX IF NOT EXISTS idx_ap_spk_layer ON annotation_participant(speaker_number, layer);
CREATE TABLE IF NOT EXISTS annotation_episode (
  annotation_id INTEGER PRIMARY KEY,
  family_id INTEGER NOT NULL REFERENCES transcript_family(family_id),
  layer TEXT NOT NULL,
  label TEXT,
  label_status INTEGER NOT NULL DEFAULT 0,
  annotated_by TEXT,
  annotated_when TEXT
);
";

/// Creates the base identity, anchor, registry and attribute tables.
pub fn create_base_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(BASE_TABLES)?;
    Ok(())
}

/// The annotation table name for a temporal layer number.
pub fn layer_table(layer_num: i64) -> String {
    format!("annotation_layer_{layer_num}")
}

/// The DDL for one per-layer annotation table.
///
/// Finer scopes add denormalized ancestor keys: meta and below carry the
/// owning turn, word and below the owning word and its position in the
/// turn, segment additionally the owning segment and its position in the
/// word. Base layers (turn, word, segment) set their own key column to
/// their row id so cross-layer joins stay uniform.
pub fn layer_table_ddl(layer_num: i64, scope: TemporalScope) -> String {
    let table = layer_table(layer_num);
    let mut columns = vec![
        "annotation_id INTEGER PRIMARY KEY".to_string(),
        "ag_id INTEGER NOT NULL REFERENCES transcript(ag_id)".to_string(),
        "label TEXT".to_string(),
        "label_status INTEGER NOT NULL DEFAULT 0".to_string(),
        "start_anchor_id INTEGER NOT NULL REFERENCES anchor(anchor_id)".to_string(),
        "end_anchor_id INTEGER NOT NULL REFERENCES anchor(anchor_id)".to_string(),
        "parent_id INTEGER".to_string(),
        "ordinal INTEGER NOT NULL DEFAULT 1".to_string(),
        "annotated_by TEXT".to_string(),
        "annotated_when TEXT".to_string(),
    ];
    if scope >= TemporalScope::Meta {
        columns.push("turn_annotation_id INTEGER".to_string());
    }
    if scope >= TemporalScope::Word {
        columns.push("word_annotation_id INTEGER".to_string());
        columns.push("ordinal_in_turn INTEGER".to_string());
    }
    if scope >= TemporalScope::Segment {
        columns.push("segment_annotation_id INTEGER".to_string());
        columns.push("ordinal_in_word INTEGER".to_string());
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {table} ({});\n\
         CREATE INDEX IF NOT EXISTS idx_{table}_ag ON {table}(ag_id);\n\
         CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table}(parent_id);",
        columns.join(", ")
    )
}

/// Registers a layer definition, creating its annotation table when the
/// layer is temporal.
pub fn register_layer(conn: &Connection, layer: &Layer) -> Result<()> {
    let scope_code = match &layer.scope {
        LayerScope::Temporal(s) => s.code().to_string(),
        LayerScope::TranscriptAttribute => "T".into(),
        LayerScope::ParticipantAttribute => "P".into(),
        LayerScope::EpisodeTag => "E".into(),
        LayerScope::System => "-".into(),
    };
    let valid_labels = layer
        .valid_labels
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| crate::error::StoreError::InvalidArgument(e.to_string()))?;
    conn.execute(
        "INSERT OR REPLACE INTO layer (layer_id, short_description, description, alignment, \
         peers, peers_overlap, saturated, parent_id, parent_includes, type, scope, valid_labels) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            layer.layer_num,
            layer.id,
            layer.description,
            layer.alignment.code(),
            layer.peers,
            layer.peers_overlap,
            layer.saturated,
            layer.parent_id,
            layer.parent_includes,
            layer.value_type.code(),
            scope_code,
            valid_labels,
        ],
    )?;
    if let (LayerScope::Temporal(scope), Some(num)) = (&layer.scope, layer.layer_num) {
        conn.execute_batch(&layer_table_ddl(num, *scope))?;
        debug!(layer = %layer.id, table = %layer_table(num), "registered temporal layer");
    }
    Ok(())
}

/// Registers a transcript- or participant-attribute definition.
pub fn register_attribute(
    conn: &Connection,
    class_id: &str,
    attribute: &str,
    label: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO attribute_definition (class_id, attribute, label) \
         VALUES (?1, ?2, ?3)",
        rusqlite::params![class_id, attribute, label],
    )?;
    Ok(())
}
