//! Assembling the layer schema from its four backend sources.
//!
//! Temporal layers come from the layer registry, transcript and participant
//! attributes from the attribute-definition registry, and a small set of
//! synthetic layers (participant, main-participant, corpus, episode,
//! transcript type) are defined in code over dedicated metadata tables.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;
use crate::schema::{
    Alignment, Layer, LayerScope, Schema, TemporalScope, ValueType, ROOT_LAYER_ID,
};

fn synthetic_layers(schema: &mut Schema) {
    schema.add_layer(Layer::system("corpus", "Corpus the transcript belongs to", ROOT_LAYER_ID));
    schema.add_layer(Layer::system("episode", "Episode the transcript belongs to", ROOT_LAYER_ID));
    schema.add_layer(Layer::system("transcript_type", "Type of transcript", ROOT_LAYER_ID));
    schema.add_layer(Layer::system("participant", "Participants in the transcript", ROOT_LAYER_ID));
    let mut main = Layer::system("main_participant", "Main participant flag", "participant");
    main.value_type = ValueType::Boolean;
    schema.add_layer(main);
}

/// Loads the complete schema snapshot from the registries.
///
/// Registry rows load coarse scope first so parents are defined before
/// their children; synthetic layers come first of all.
pub fn load_schema(conn: &Connection) -> Result<Schema> {
    let mut schema = Schema::new();
    synthetic_layers(&mut schema);

    let mut stmt = conn.prepare(
        "SELECT layer_id, short_description, description, alignment, peers, peers_overlap, \
         saturated, parent_id, parent_includes, type, scope, valid_labels \
         FROM layer \
         ORDER BY CASE scope \
           WHEN 'F' THEN 0 WHEN 'M' THEN 1 WHEN 'W' THEN 2 WHEN 'S' THEN 3 ELSE 4 END, \
         layer_id",
    )?;
    let rows = stmt.query_map([], |row| {
        let layer_num: Option<i64> = row.get(0)?;
        let id: String = row.get(1)?;
        let description: Option<String> = row.get(2)?;
        let alignment: i64 = row.get(3)?;
        let peers: bool = row.get(4)?;
        let peers_overlap: bool = row.get(5)?;
        let saturated: bool = row.get(6)?;
        let parent_id: String = row.get(7)?;
        let parent_includes: bool = row.get(8)?;
        let value_type: String = row.get(9)?;
        let scope_code: String = row.get(10)?;
        let valid_labels: Option<String> = row.get(11)?;
        Ok((
            layer_num,
            id,
            description,
            alignment,
            peers,
            peers_overlap,
            saturated,
            parent_id,
            parent_includes,
            value_type,
            scope_code,
            valid_labels,
        ))
    })?;
    for row in rows {
        let (
            layer_num,
            id,
            description,
            alignment,
            peers,
            peers_overlap,
            saturated,
            parent_id,
            parent_includes,
            value_type,
            scope_code,
            valid_labels,
        ) = row?;
        let scope = match scope_code.as_str() {
            "T" => LayerScope::TranscriptAttribute,
            "P" => LayerScope::ParticipantAttribute,
            "E" => LayerScope::EpisodeTag,
            "-" => LayerScope::System,
            code => match TemporalScope::from_code(code) {
                Some(s) => LayerScope::Temporal(s),
                None => {
                    debug!(layer = %id, scope = %scope_code, "skipping layer with unknown scope");
                    continue;
                }
            },
        };
        let valid_labels = valid_labels
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok());
        schema.add_layer(Layer {
            id,
            description: description.unwrap_or_default(),
            alignment: Alignment::from_code(alignment),
            peers,
            peers_overlap,
            saturated,
            parent_id,
            parent_includes,
            value_type: ValueType::from_code(&value_type),
            valid_labels,
            scope,
            layer_num,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT class_id, attribute, label FROM attribute_definition ORDER BY class_id, attribute",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;
    for row in rows {
        let (class_id, attribute, label) = row?;
        let (prefix, scope, parent) = match class_id.as_str() {
            "speaker" => (
                "participant",
                LayerScope::ParticipantAttribute,
                schema.participant_layer_id.clone(),
            ),
            _ => (
                "transcript",
                LayerScope::TranscriptAttribute,
                ROOT_LAYER_ID.to_string(),
            ),
        };
        let id = format!("{prefix}_{attribute}");
        if schema.layer(&id).is_some() {
            continue;
        }
        let mut layer = Layer::system(id, label.unwrap_or(attribute), parent);
        layer.scope = scope;
        schema.add_layer(layer);
    }

    Ok(schema)
}
