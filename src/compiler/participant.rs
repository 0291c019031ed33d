//! Participant-matching dialect: expressions evaluated per speaker row.

use crate::compiler::ast::Operand;
use crate::compiler::graph::attribute_name;
use crate::compiler::ir::{translate_common, Dialect, SqlValue, Term, TranslatedOperand};
use crate::schema::{LayerScope, Schema};

/// Operand translation with the speaker as home entity.
///
/// The natural key is the participant name; participant attributes
/// correlate with the generic participant-attribute table on the speaker
/// key; corpus membership and transcript appearance resolve through the
/// linkage tables.
pub struct ParticipantDialect<'a> {
    schema: &'a Schema,
}

impl<'a> ParticipantDialect<'a> {
    /// Creates a dialect bound to the given schema snapshot.
    pub fn new(schema: &'a Schema) -> ParticipantDialect<'a> {
        ParticipantDialect { schema }
    }

    fn layer_values(
        &self,
        layer_id: &str,
        first_only: bool,
        errors: &mut Vec<String>,
    ) -> Option<Term> {
        if layer_id == self.schema.corpus_layer_id {
            let mut sql = "(SELECT corpus.corpus_name FROM corpus \
                 INNER JOIN speaker_corpus \
                 ON corpus.corpus_id = speaker_corpus.corpus_id \
                 WHERE speaker_corpus.speaker_number = speaker.speaker_number \
                 ORDER BY corpus.corpus_name"
                .to_string();
            if first_only {
                sql.push_str(" LIMIT 1");
            }
            sql.push(')');
            return Some(Term::raw(sql));
        }
        if layer_id == "transcript" {
            let mut sql = "(SELECT transcript.transcript_id FROM transcript \
                 INNER JOIN transcript_speaker \
                 ON transcript.ag_id = transcript_speaker.ag_id \
                 WHERE transcript_speaker.speaker_number = speaker.speaker_number \
                 ORDER BY transcript.transcript_id"
                .to_string();
            if first_only {
                sql.push_str(" LIMIT 1");
            }
            sql.push(')');
            return Some(Term::raw(sql));
        }
        if layer_id == "main_participant" {
            let sql = "(SELECT MAX(main_speaker) FROM transcript_speaker \
                 WHERE transcript_speaker.speaker_number = speaker.speaker_number)";
            return Some(Term::raw(sql));
        }
        let Some(layer) = self.schema.layer(layer_id) else {
            errors.push(format!("unknown layer: {layer_id}"));
            return None;
        };
        match &layer.scope {
            LayerScope::ParticipantAttribute => {
                let mut sql = "(SELECT DISTINCT label FROM annotation_participant \
                     WHERE annotation_participant.speaker_number = speaker.speaker_number \
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
            _ => {
                errors.push(format!(
                    "layer not queryable per participant: {layer_id}"
                ));
                None
            }
        }
    }
}

impl Dialect for ParticipantDialect<'_> {
    fn home_key(&self) -> &'static str {
        "speaker.name"
    }

    fn translate(&self, operand: &Operand, errors: &mut Vec<String>) -> Option<TranslatedOperand> {
        if let Some(t) = translate_common(self.home_key(), operand) {
            return Some(t);
        }
        match operand {
            Operand::My(layer) => self
                .layer_values(layer, true, errors)
                .map(TranslatedOperand::scalar),
            Operand::Labels(layer) => self
                .layer_values(layer, false, errors)
                .map(TranslatedOperand::set),
            Operand::ListLength(layer) if layer == "transcript" => {
                Some(TranslatedOperand::scalar(Term::raw(
                    "(SELECT COUNT(*) FROM transcript_speaker \
                     WHERE transcript_speaker.speaker_number = speaker.speaker_number)",
                )))
            }
            other => {
                errors.push(format!("cannot resolve per participant: {other}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{Comparator, Expression, Operand};
    use crate::compiler::ir::lower;
    use crate::schema::{Layer, Schema, ROOT_LAYER_ID};

    fn schema() -> Schema {
        let mut s = Schema::new();
        let mut gender = Layer::system("participant_gender", "Gender", "participant");
        gender.scope = LayerScope::ParticipantAttribute;
        s.add_layer(Layer::system("participant", "Participants", ROOT_LAYER_ID));
        s.add_layer(gender);
        s
    }

    #[test]
    fn name_is_the_home_key() {
        let schema = schema();
        let dialect = ParticipantDialect::new(&schema);
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::Id,
            Comparator::Matches,
            Operand::String("Ada.*".into()),
        );
        let term = lower(&expr, &dialect, &mut errors);
        assert!(errors.is_empty());
        assert_eq!(term.sql, "speaker.name REGEXP ?");
    }

    #[test]
    fn attributes_correlate_on_speaker_number() {
        let schema = schema();
        let dialect = ParticipantDialect::new(&schema);
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::My("participant_gender".into()),
            Comparator::Eq,
            Operand::String("F".into()),
        );
        let term = lower(&expr, &dialect, &mut errors);
        assert!(errors.is_empty(), "{errors:?}");
        assert!(term.sql.contains("speaker.speaker_number"));
        assert_eq!(
            term.params,
            vec![SqlValue::Text("gender".into()), SqlValue::Text("F".into())]
        );
    }
}
