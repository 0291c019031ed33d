//! Listing and expression-filtered matching.

use rusqlite::ToSql;

use crate::compiler::{
    compile_clauses, AnnotationDialect, CompiledQuery, Expression, GraphDialect, OrderKey,
    ParticipantDialect,
};
use crate::error::{Result, StoreError};
use crate::model::AnnotationId;
use crate::store::bootstrap::layer_table;
use crate::store::SqlAnnotationStore;

fn bind(params: &[crate::compiler::SqlValue]) -> Vec<&dyn ToSql> {
    params.iter().map(|p| p as &dyn ToSql).collect()
}

impl SqlAnnotationStore {
    fn string_column(&self, query: &CompiledQuery) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(&query.sql)?;
        let rows = stmt.query_map(&bind(&query.params)[..], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// All layer ids, in registry order.
    pub fn get_layer_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .get_schema()?
            .layer_ids()
            .map(str::to_string)
            .collect())
    }

    /// One layer definition.
    pub fn get_layer(&self, id: &str) -> Result<crate::schema::Layer> {
        self.get_schema()?
            .layer(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("layer", id))
    }

    /// All corpus names.
    pub fn get_corpus_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT corpus_name FROM corpus ORDER BY corpus_name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// All participant names.
    pub fn get_participant_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT name FROM speaker ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// All graph ids, ascending.
    pub fn get_graph_ids(&self) -> Result<Vec<String>> {
        self.get_matching_graph_ids(None, &[])
    }

    /// The graph ids in one corpus, ascending.
    pub fn get_graph_ids_in_corpus(&self, corpus: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT transcript_id FROM transcript WHERE corpus_name = ?1 ORDER BY transcript_id",
        )?;
        let rows = stmt.query_map([corpus], |row| row.get(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Graph ids matching an optional filter expression, in the requested
    /// order (natural id order when none is given).
    pub fn get_matching_graph_ids(
        &self,
        expression: Option<&Expression>,
        order: &[OrderKey],
    ) -> Result<Vec<String>> {
        let schema = self.get_schema()?;
        let dialect = GraphDialect::new(&schema);
        let query = compile_clauses(expression, order, &dialect)?
            .into_query("SELECT transcript.transcript_id FROM transcript");
        self.string_column(&query)
    }

    /// How many graphs match a filter expression.
    pub fn count_matching_graph_ids(&self, expression: &Expression) -> Result<usize> {
        let schema = self.get_schema()?;
        let dialect = GraphDialect::new(&schema);
        let query = compile_clauses(Some(expression), &[], &dialect)?
            .into_query("SELECT COUNT(*) FROM transcript");
        let count: i64 = self
            .conn()
            .query_row(&query.sql, &bind(&query.params)[..], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Participant names matching an optional filter expression.
    pub fn get_matching_participant_ids(
        &self,
        expression: Option<&Expression>,
        order: &[OrderKey],
    ) -> Result<Vec<String>> {
        let schema = self.get_schema()?;
        let dialect = ParticipantDialect::new(&schema);
        let query = compile_clauses(expression, order, &dialect)?
            .into_query("SELECT speaker.name FROM speaker");
        self.string_column(&query)
    }

    /// How many participants match a filter expression.
    pub fn count_matching_participant_ids(&self, expression: &Expression) -> Result<usize> {
        let schema = self.get_schema()?;
        let dialect = ParticipantDialect::new(&schema);
        let query = compile_clauses(Some(expression), &[], &dialect)?
            .into_query("SELECT COUNT(*) FROM speaker");
        let count: i64 = self
            .conn()
            .query_row(&query.sql, &bind(&query.params)[..], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Annotation ids on one temporal layer matching an optional filter
    /// expression, in natural id order.
    pub fn get_matching_annotation_ids(
        &self,
        layer_id: &str,
        expression: Option<&Expression>,
    ) -> Result<Vec<AnnotationId>> {
        let schema = self.get_schema()?;
        let dialect = AnnotationDialect::new(&schema, layer_id)
            .ok_or_else(|| StoreError::not_found("layer", layer_id))?;
        let layer = dialect.home_layer();
        let (Some(scope), Some(num)) = (layer.scope.temporal(), layer.layer_num) else {
            return Err(StoreError::not_found("layer", layer_id));
        };
        let query = compile_clauses(expression, &[], &dialect)?.into_query(&format!(
            "SELECT annotation.annotation_id FROM {} annotation",
            layer_table(num)
        ));
        let mut stmt = self.conn().prepare(&query.sql)?;
        let rows = stmt.query_map(&bind(&query.params)[..], |row| row.get::<_, i64>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(AnnotationId::temporal(scope, num, row?));
        }
        Ok(result)
    }
}
