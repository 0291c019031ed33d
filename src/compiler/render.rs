//! Final rendering of lowered fragments into complete statements.

use crate::compiler::ast::{Expression, OrderKey};
use crate::compiler::ir::{lower, lower_order, Dialect, SqlValue, Term};
use crate::error::CompileError;

/// A complete, parameterized SQL statement.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    /// The statement text, with `?` placeholders.
    pub sql: String,
    /// Bound values matching the placeholders left to right.
    pub params: Vec<SqlValue>,
}

/// The WHERE and ORDER BY fragments of one compiled filter.
#[derive(Clone, Debug, PartialEq)]
pub struct Clauses {
    where_term: Option<Term>,
    order_term: Term,
}

impl Clauses {
    /// Attaches the fragments to a `SELECT ... FROM ...` prefix.
    pub fn into_query(self, select_from: &str) -> CompiledQuery {
        let mut sql = select_from.to_string();
        let mut params = Vec::new();
        if let Some(where_term) = self.where_term {
            sql.push_str(" WHERE ");
            sql.push_str(&where_term.sql);
            params.extend(where_term.params);
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_term.sql);
        params.extend(self.order_term.params);
        CompiledQuery { sql, params }
    }
}

/// Compiles an optional filter expression and order clause for one dialect.
///
/// Every problem found anywhere in the tree is reported; compilation fails
/// only after the whole walk.
pub fn compile_clauses(
    expression: Option<&Expression>,
    order: &[OrderKey],
    dialect: &dyn Dialect,
) -> Result<Clauses, CompileError> {
    let mut errors = Vec::new();
    let where_term = expression.map(|e| lower(e, dialect, &mut errors));
    let order_term = lower_order(order, dialect, &mut errors);
    if !errors.is_empty() {
        let expression = expression
            .map(|e| e.to_string())
            .unwrap_or_else(|| order.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", "));
        return Err(CompileError { expression, errors });
    }
    Ok(Clauses {
        where_term,
        order_term,
    })
}
