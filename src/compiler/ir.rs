//! Lowering from expression trees to SQL fragments.
//!
//! Operand translation is dialect-specific; the lowering pass itself is
//! shared. Every literal value becomes a `?` placeholder with a matching
//! bound value, so caller content never reaches the query text. Problems
//! found during the walk accumulate; the walk always finishes so the caller
//! sees every problem at once.

use std::fmt;

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;

use crate::compiler::ast::{Comparator, Expression, Operand, OrderKey};
use crate::schema::TemporalScope;

/// A value bound to a `?` placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    /// A text parameter.
    Text(String),
    /// A floating-point parameter.
    Real(f64),
    /// An integer parameter.
    Integer(i64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
            SqlValue::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
        })
    }
}

/// A fragment of SQL plus the values bound to its placeholders, in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Term {
    /// The SQL text, with `?` placeholders.
    pub sql: String,
    /// Bound values matching the placeholders left to right.
    pub params: Vec<SqlValue>,
}

impl Term {
    /// A fragment with no placeholders.
    pub fn raw(sql: impl Into<String>) -> Term {
        Term {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A single placeholder bound to one value.
    pub fn param(value: SqlValue) -> Term {
        Term {
            sql: "?".into(),
            params: vec![value],
        }
    }

    /// A fragment with placeholders and their values.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Term {
        Term {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// How an operand's fragment behaves in a comparison.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cardinality {
    /// A scalar value.
    Scalar,
    /// A multi-row subquery, usable on the right of `IN`.
    Set,
}

/// A translated operand.
#[derive(Clone, Debug, PartialEq)]
pub struct TranslatedOperand {
    /// The SQL fragment.
    pub term: Term,
    /// Whether the fragment yields one row or many.
    pub cardinality: Cardinality,
}

impl TranslatedOperand {
    /// A scalar fragment.
    pub fn scalar(term: Term) -> TranslatedOperand {
        TranslatedOperand {
            term,
            cardinality: Cardinality::Scalar,
        }
    }

    /// A multi-row fragment.
    pub fn set(term: Term) -> TranslatedOperand {
        TranslatedOperand {
            term,
            cardinality: Cardinality::Set,
        }
    }
}

/// The join-key granularity for correlating two temporal scopes: the
/// coarser scope (lower rank) wins, so a word-scope query referencing a
/// segment-scope layer joins at word granularity.
pub fn join_scope(a: TemporalScope, b: TemporalScope) -> TemporalScope {
    if a.join_rank() <= b.join_rank() {
        a
    } else {
        b
    }
}

/// Dialect-specific operand translation.
///
/// Implementations resolve layer references against the store schema and
/// emit correlated fragments against the dialect's home entity. A failed
/// translation pushes a message and returns `None`; the lowering pass keeps
/// walking.
pub trait Dialect {
    /// The home entity's natural key column.
    fn home_key(&self) -> &'static str;

    /// Translates one operand, accumulating problems in `errors`.
    fn translate(&self, operand: &Operand, errors: &mut Vec<String>) -> Option<TranslatedOperand>;
}

/// Translates literal and home-key operands shared by every dialect.
/// Returns `None` when the operand needs dialect-specific resolution.
pub fn translate_common(home_key: &str, operand: &Operand) -> Option<TranslatedOperand> {
    match operand {
        Operand::Id | Operand::Label => Some(TranslatedOperand::scalar(Term::raw(home_key))),
        Operand::String(s) => Some(TranslatedOperand::scalar(Term::param(SqlValue::Text(
            s.clone(),
        )))),
        Operand::Number(n) => Some(TranslatedOperand::scalar(Term::param(SqlValue::Real(*n)))),
        _ => None,
    }
}

/// Lowers an expression tree to one WHERE-clause fragment.
///
/// Problems accumulate in `errors`; when any were recorded the resulting
/// fragment must be discarded by the caller.
pub fn lower(expression: &Expression, dialect: &dyn Dialect, errors: &mut Vec<String>) -> Term {
    match expression {
        Expression::Compare {
            left,
            comparator,
            right,
        } => lower_comparison(left, *comparator, right, dialect, errors),
        Expression::And(a, b) => {
            let a = lower(a, dialect, errors);
            let b = lower(b, dialect, errors);
            combine(a, " AND ", b)
        }
        Expression::Or(a, b) => {
            let a = lower(a, dialect, errors);
            let b = lower(b, dialect, errors);
            let mut term = combine(a, " OR ", b);
            term.sql = format!("({})", term.sql);
            term
        }
    }
}

/// Lowers an order clause; an empty clause defaults to the home key
/// ascending.
pub fn lower_order(keys: &[OrderKey], dialect: &dyn Dialect, errors: &mut Vec<String>) -> Term {
    if keys.is_empty() {
        return Term::raw(format!("{} ASC", dialect.home_key()));
    }
    let mut sql = String::new();
    let mut params = Vec::new();
    for key in keys {
        let Some(translated) = dialect.translate(&key.operand, errors) else {
            continue;
        };
        if !sql.is_empty() {
            sql.push_str(", ");
        }
        sql.push_str(&translated.term.sql);
        sql.push_str(if key.descending { " DESC" } else { " ASC" });
        params.extend(translated.term.params);
    }
    Term::with_params(sql, params)
}

fn lower_comparison(
    left: &Operand,
    comparator: Comparator,
    right: &Operand,
    dialect: &dyn Dialect,
    errors: &mut Vec<String>,
) -> Term {
    let left_t = dialect.translate(left, errors);
    let right_t = dialect.translate(right, errors);
    let (Some(left_t), Some(right_t)) = (left_t, right_t) else {
        return Term::default();
    };
    match comparator {
        Comparator::In | Comparator::NotIn => {
            if right_t.cardinality != Cardinality::Set {
                errors.push(format!(
                    "right operand of {comparator} must be a multi-row expression: {right}"
                ));
                return Term::default();
            }
            let keyword = if comparator == Comparator::In {
                "IN"
            } else {
                "NOT IN"
            };
            combine(left_t.term, &format!(" {keyword} "), right_t.term)
        }
        Comparator::Matches | Comparator::NotMatches => {
            let mut term = combine(left_t.term, " REGEXP ", right_t.term);
            if comparator == Comparator::NotMatches {
                term.sql = format!("NOT ({})", term.sql);
            }
            term
        }
        Comparator::Eq
        | Comparator::Ne
        | Comparator::Lt
        | Comparator::Gt
        | Comparator::Le
        | Comparator::Ge => {
            let op = match comparator {
                Comparator::Eq => "=",
                Comparator::Ne => "<>",
                Comparator::Lt => "<",
                Comparator::Gt => ">",
                Comparator::Le => "<=",
                _ => ">=",
            };
            combine(left_t.term, &format!(" {op} "), right_t.term)
        }
    }
}

fn combine(a: Term, separator: &str, b: Term) -> Term {
    let mut params = a.params;
    params.extend(b.params);
    Term {
        sql: format!("{}{separator}{}", a.sql, b.sql),
        params,
    }
}
