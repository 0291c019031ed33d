//! Annotation-matching dialect: expressions evaluated per annotation row of
//! one temporal home layer.
//!
//! Cross-layer references correlate two per-layer tables on a shared
//! denormalized key. The key granularity is the coarser of the two layers'
//! scopes, so a word-scope query referencing a segment-scope layer joins at
//! word granularity rather than over-restricting to segments.

use crate::compiler::ast::Operand;
use crate::compiler::ir::{
    join_scope, translate_common, Dialect, Term, TranslatedOperand,
};
use crate::schema::{Layer, Schema, TemporalScope};

/// The denormalized join-key column shared by tables at or below a scope.
pub(crate) fn scope_key_column(scope: TemporalScope) -> &'static str {
    match scope {
        TemporalScope::Freeform => "ag_id",
        TemporalScope::Meta => "turn_annotation_id",
        TemporalScope::Word => "word_annotation_id",
        TemporalScope::Segment => "segment_annotation_id",
    }
}

/// Operand translation with one temporal layer's annotation row as home
/// entity, aliased `annotation`.
pub struct AnnotationDialect<'a> {
    schema: &'a Schema,
    home: &'a Layer,
    home_scope: TemporalScope,
}

impl<'a> AnnotationDialect<'a> {
    /// Creates a dialect whose home is the given temporal layer.
    ///
    /// Returns `None` for layers without per-layer annotation rows.
    pub fn new(schema: &'a Schema, home_layer_id: &str) -> Option<AnnotationDialect<'a>> {
        let home = schema.layer(home_layer_id)?;
        let home_scope = home.scope.temporal()?;
        Some(AnnotationDialect {
            schema,
            home,
            home_scope,
        })
    }

    /// The home layer definition.
    pub fn home_layer(&self) -> &Layer {
        self.home
    }

    fn correlated(
        &self,
        layer_id: &str,
        first_only: bool,
        errors: &mut Vec<String>,
    ) -> Option<Term> {
        let Some(layer) = self.schema.layer(layer_id) else {
            errors.push(format!("unknown layer: {layer_id}"));
            return None;
        };
        let (Some(scope), Some(num)) = (layer.scope.temporal(), layer.layer_num) else {
            errors.push(format!("layer has no annotation table: {layer_id}"));
            return None;
        };
        let key = scope_key_column(join_scope(self.home_scope, scope));
        let sql = if first_only {
            format!(
                "(SELECT label FROM annotation_layer_{num} \
                 WHERE annotation_layer_{num}.{key} = annotation.{key} \
                 ORDER BY ordinal LIMIT 1)"
            )
        } else {
            format!(
                "(SELECT DISTINCT label FROM annotation_layer_{num} \
                 WHERE annotation_layer_{num}.{key} = annotation.{key})"
            )
        };
        Some(Term::raw(sql))
    }
}

impl Dialect for AnnotationDialect<'_> {
    fn home_key(&self) -> &'static str {
        "annotation.annotation_id"
    }

    fn translate(&self, operand: &Operand, errors: &mut Vec<String>) -> Option<TranslatedOperand> {
        match operand {
            // label is the row's own label column here, not the natural key
            Operand::Label => Some(TranslatedOperand::scalar(Term::raw("annotation.label"))),
            Operand::Ordinal => Some(TranslatedOperand::scalar(Term::raw("annotation.ordinal"))),
            Operand::My(layer) => self
                .correlated(layer, true, errors)
                .map(TranslatedOperand::scalar),
            Operand::Labels(layer) => self
                .correlated(layer, false, errors)
                .map(TranslatedOperand::set),
            Operand::Annotators(layer) => {
                let Some(num) = self.schema.layer(layer).and_then(|l| l.layer_num) else {
                    errors.push(format!("layer has no annotation table: {layer}"));
                    return None;
                };
                Some(TranslatedOperand::set(Term::raw(format!(
                    "(SELECT DISTINCT annotated_by FROM annotation_layer_{num} \
                     WHERE annotation_layer_{num}.ag_id = annotation.ag_id)"
                ))))
            }
            other => {
                if let Some(t) = translate_common(self.home_key(), other) {
                    return Some(t);
                }
                errors.push(format!("cannot resolve per annotation: {other}"));
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
        s.add_layer(Layer::system("participant", "Participants", ROOT_LAYER_ID));
        s.add_layer(Layer::temporal(
            "turn",
            "Turns",
            TemporalScope::Meta,
            "participant",
            11,
        ));
        s.add_layer(Layer::temporal("word", "Words", TemporalScope::Word, "turn", 0));
        s.add_layer(Layer::temporal(
            "segment",
            "Phones",
            TemporalScope::Segment,
            "word",
            1,
        ));
        s
    }

    #[test]
    fn coarser_scope_picks_the_join_key() {
        let schema = schema();
        let dialect = AnnotationDialect::new(&schema, "word").unwrap();
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::My("segment".into()),
            Comparator::Eq,
            Operand::String("I".into()),
        );
        let term = lower(&expr, &dialect, &mut errors);
        assert!(errors.is_empty(), "{errors:?}");
        // word is coarser than segment, so the correlation key is the word id
        assert!(term.sql.contains("word_annotation_id"));
        assert!(!term.sql.contains("segment_annotation_id"));
    }

    #[test]
    fn meta_reference_joins_on_turn() {
        let schema = schema();
        let dialect = AnnotationDialect::new(&schema, "segment").unwrap();
        let mut errors = Vec::new();
        let expr = Expression::compare(
            Operand::My("turn".into()),
            Comparator::Eq,
            Operand::String("sp1".into()),
        );
        let term = lower(&expr, &dialect, &mut errors);
        assert!(errors.is_empty());
        assert!(term.sql.contains("turn_annotation_id"));
    }

    #[test]
    fn non_temporal_home_is_rejected() {
        let schema = schema();
        assert!(AnnotationDialect::new(&schema, "participant").is_none());
    }
}
