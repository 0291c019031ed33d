//! Graph-matching dialect: expressions evaluated per transcript row.

use crate::compiler::ast::Operand;
use crate::compiler::ir::{translate_common, Dialect, SqlValue, Term, TranslatedOperand};
use crate::schema::{LayerScope, Schema};

/// Strips the attribute-class prefix from a layer id, yielding the name the
/// generic attribute tables key on.
pub(crate) fn attribute_name(layer_id: &str) -> String {
    layer_id
        .strip_prefix("transcript_")
        .or_else(|| layer_id.strip_prefix("participant_"))
        .unwrap_or(layer_id)
        .to_string()
}

/// Operand translation with the transcript as home entity.
///
/// `my('corpus')` is a direct column reference; episode and transcript type
/// resolve through their dedicated tables; attribute layers correlate with
/// the generic attribute tables keyed by owner and attribute name; temporal
/// layers correlate with their per-layer annotation table on the graph key.
pub struct GraphDialect<'a> {
    schema: &'a Schema,
}

impl<'a> GraphDialect<'a> {
    /// Creates a dialect bound to the given schema snapshot.
    pub fn new(schema: &'a Schema) -> GraphDialect<'a> {
        GraphDialect { schema }
    }

    fn layer_values(
        &self,
        layer_id: &str,
        first_only: bool,
        errors: &mut Vec<String>,
    ) -> Option<Term> {
        if layer_id == self.schema.corpus_layer_id {
            return Some(if first_only {
                Term::raw("transcript.corpus_name")
            } else {
                Term::raw("(SELECT transcript.corpus_name)")
            });
        }
        if layer_id == self.schema.episode_layer_id {
            let sql = "(SELECT name FROM transcript_family \
                 WHERE transcript_family.family_id = transcript.family_id)";
            return Some(Term::raw(sql));
        }
        if layer_id == "transcript_type" {
            let sql = "(SELECT transcript_type FROM transcript_type \
                 WHERE transcript_type.type_id = transcript.type_id)";
            return Some(Term::raw(sql));
        }
        if layer_id == self.schema.participant_layer_id {
            let mut sql = "(SELECT speaker.name FROM speaker \
                 INNER JOIN transcript_speaker \
                 ON speaker.speaker_number = transcript_speaker.speaker_number \
                 WHERE transcript_speaker.ag_id = transcript.ag_id \
                 ORDER BY speaker.name"
                .to_string();
            if first_only {
                sql.push_str(" LIMIT 1");
            }
            sql.push(')');
            return Some(Term::raw(sql));
        }
        let Some(layer) = self.schema.layer(layer_id) else {
            errors.push(format!("unknown layer: {layer_id}"));
            return None;
        };
        match &layer.scope {
            LayerScope::TranscriptAttribute => {
                let mut sql = "(SELECT DISTINCT label FROM annotation_transcript \
                     WHERE annotation_transcript.ag_id = transcript.ag_id \
                     AND annotation_transcript.layer = ?"
                    .to_string();
                if first_only {
                    sql.push_str(" LIMIT 1");
                }
                sql.push(')');
                Some(Term::with_params(
                    sql,
                    vec![SqlValue::Text(attribute_name(layer_id))],
                ))
            }
            LayerScope::ParticipantAttribute => {
                // participant linkage: any participant of the transcript
                let mut sql = "(SELECT DISTINCT label FROM annotation_participant \
                     INNER JOIN transcript_speaker \
                     ON annotation_participant.speaker_number = transcript_speaker.speaker_number \
                     WHERE transcript_speaker.ag_id = transcript.ag_id \
                     AND annotation_participant.layer = ?"
                    .to_string();
                if first_only {
                    sql.push_str(" LIMIT 1");
                }
                sql.push(')');
                Some(Term::with_params(
                    sql,
                    vec![SqlValue::Text(attribute_name(layer_id))],
                ))
            }
            LayerScope::EpisodeTag => {
                let mut sql = "(SELECT label FROM annotation_episode \
                     WHERE annotation_episode.family_id = transcript.family_id \
                     AND annotation_episode.layer = ?"
                    .to_string();
                if first_only {
                    sql.push_str(" LIMIT 1");
                }
                sql.push(')');
                Some(Term::with_params(
                    sql,
                    vec![SqlValue::Text(attribute_name(layer_id))],
                ))
            }
            LayerScope::Temporal(_) => {
                let Some(num) = layer.layer_num else {
                    errors.push(format!("layer has no annotation table: {layer_id}"));
                    return None;
                };
                let sql = if first_only {
                    format!(
                        "(SELECT label FROM annotation_layer_{num} \
                         WHERE annotation_layer_{num}.ag_id = transcript.ag_id \
                         ORDER BY ordinal LIMIT 1)"
                    )
                } else {
                    format!(
                        "(SELECT DISTINCT label FROM annotation_layer_{num} \
                         WHERE annotation_layer_{num}.ag_id = transcript.ag_id)"
                    )
                };
                Some(Term::raw(sql))
            }
            LayerScope::System => {
                errors.push(format!("layer not queryable here: {layer_id}"));
                None
            }
        }
    }

    fn temporal_table(&self, layer_id: &str, errors: &mut Vec<String>) -> Option<i64> {
        match self.schema.layer(layer_id).and_then(|l| l.layer_num) {
            Some(num) => Some(num),
            None => {
                errors.push(format!("layer has no annotation table: {layer_id}"));
                None
            }
        }
    }
}

impl Dialect for GraphDialect<'_> {
    fn home_key(&self) -> &'static str {
        "transcript.transcript_id"
    }

    fn translate(&self, operand: &Operand, errors: &mut Vec<String>) -> Option<TranslatedOperand> {
        if let Some(t) = translate_common(self.home_key(), operand) {
            return Some(t);
        }
        match operand {
            Operand::Ordinal => Some(TranslatedOperand::scalar(Term::raw(
                "transcript.family_sequence",
            ))),
            Operand::My(layer) => self
                .layer_values(layer, true, errors)
                .map(TranslatedOperand::scalar),
            Operand::Labels(layer) => self
                .layer_values(layer, false, errors)
                .map(TranslatedOperand::set),
            Operand::List(layer) => {
                let num = self.temporal_table(layer, errors)?;
                Some(TranslatedOperand::set(Term::raw(format!(
                    "(SELECT annotation_id FROM annotation_layer_{num} \
                     WHERE annotation_layer_{num}.ag_id = transcript.ag_id \
                     ORDER BY ordinal)"
                ))))
            }
            Operand::ListLength(layer) => {
                let num = self.temporal_table(layer, errors)?;
                Some(TranslatedOperand::scalar(Term::raw(format!(
                    "(SELECT COUNT(*) FROM annotation_layer_{num} \
                     WHERE annotation_layer_{num}.ag_id = transcript.ag_id)"
                ))))
            }
            Operand::Annotators(layer) => {
                let num = self.temporal_table(layer, errors)?;
                Some(TranslatedOperand::set(Term::raw(format!(
                    "(SELECT DISTINCT annotated_by FROM annotation_layer_{num} \
                     WHERE annotation_layer_{num}.ag_id = transcript.ag_id)"
                ))))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{Comparator, Expression, Operand};
    use crate::compiler::ir::lower;
    use crate::schema::{Layer, LayerScope, Schema, TemporalScope, ROOT_LAYER_ID};

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.add_layer(Layer::system("participant", "Participants", ROOT_LAYER_ID));
        s.add_layer(Layer::temporal(
            "turn",
            "Turns",
            TemporalScope::Meta,
            "participant",
            11,
        ));
        let mut lang = Layer::system("participant_language", "Language", "participant");
        lang.scope = LayerScope::ParticipantAttribute;
        s.add_layer(lang);
        s
    }

    #[test]
    fn corpus_is_a_direct_column() {
        let schema = schema();
        let dialect = GraphDialect::new(&schema);
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::My("corpus".into()),
            Comparator::Eq,
            Operand::String("CC".into()),
        );
        let term = lower(&expr, &dialect, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(term.sql, "transcript.corpus_name = ?");
        assert!(!term.sql.contains("SELECT"));
    }

    #[test]
    fn participant_attribute_joins_on_participant_linkage() {
        let schema = schema();
        let dialect = GraphDialect::new(&schema);
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::String("en".into()),
            Comparator::In,
            Operand::Labels("participant_language".into()),
        );
        let term = lower(&expr, &dialect, &mut errors);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(term.sql.contains("annotation_participant"));
        assert!(term.sql.contains("transcript_speaker"));
        assert_eq!(
            term.params,
            vec![
                SqlValue::Text("en".into()),
                SqlValue::Text("language".into())
            ]
        );
    }

    #[test]
    fn list_operands_target_the_layer_table() {
        let schema = schema();
        let dialect = GraphDialect::new(&schema);
        let mut errors = Vec::new();

        let length = Expression::compare(
            Operand::ListLength("turn".into()),
            Comparator::Ge,
            Operand::Number(2.0),
        );
        let term = lower(&length, &dialect, &mut errors);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(term.sql.contains("SELECT COUNT(*) FROM annotation_layer_11"));
        assert_eq!(term.params, vec![SqlValue::Real(2.0)]);

        let membership = Expression::compare(
            Operand::Number(5.0),
            Comparator::In,
            Operand::List("turn".into()),
        );
        let term = lower(&membership, &dialect, &mut errors);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(term.sql.contains("SELECT annotation_id FROM annotation_layer_11"));
        assert!(term.sql.contains(" IN "));
    }

    #[test]
    fn annotators_read_the_annotated_by_column() {
        let schema = schema();
        let dialect = GraphDialect::new(&schema);
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::String("aligner".into()),
            Comparator::In,
            Operand::Annotators("turn".into()),
        );
        let term = lower(&expr, &dialect, &mut errors);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(term.sql.contains("SELECT DISTINCT annotated_by FROM annotation_layer_11"));
        assert_eq!(term.params, vec![SqlValue::Text("aligner".into())]);
    }

    #[test]
    fn list_operands_need_an_annotation_table() {
        let schema = schema();
        let dialect = GraphDialect::new(&schema);
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::ListLength("participant_language".into()),
            Comparator::Eq,
            Operand::Number(1.0),
        );
        lower(&expr, &dialect, &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no annotation table"));
    }

    #[test]
    fn unknown_layers_accumulate() {
        let schema = schema();
        let dialect = GraphDialect::new(&schema);
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::My("nope1".into()),
            Comparator::Eq,
            Operand::My("nope2".into()),
        );
        lower(&expr, &dialect, &mut errors);
        assert_eq!(errors.len(), 2);
    }
}
