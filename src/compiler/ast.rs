//! Expression trees for the query language.
//!
//! Both query dialects share this grammar: comparisons between operands,
//! combined with `AND`/`OR`. The compiler consumes an already-parsed tree;
//! `Display` reproduces the canonical expression text, which is what error
//! reports carry back to the caller.

use std::fmt;

/// One operand of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// The home entity's natural key (`id`).
    Id,
    /// The home entity's label, an alias for the natural key.
    Label,
    /// The home entity's sibling ordinal.
    Ordinal,
    /// A string literal.
    String(String),
    /// A numeric literal.
    Number(f64),
    /// `my('layer')`: the first (or only) label on the named layer for the
    /// current row.
    My(String),
    /// `labels('layer')`: the distinct label values on the named layer,
    /// usable as the right operand of `IN`.
    Labels(String),
    /// `list('layer')`: the ordered annotation ids on the named layer.
    List(String),
    /// `list('layer').length`: the annotation count on the named layer.
    ListLength(String),
    /// `annotators('layer')`: the distinct annotator identifiers on the
    /// named layer.
    Annotators(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Id => write!(f, "id"),
            Operand::Label => write!(f, "label"),
            Operand::Ordinal => write!(f, "ordinal"),
            Operand::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Operand::Number(n) => write!(f, "{n}"),
            Operand::My(layer) => write!(f, "my('{layer}').label"),
            Operand::Labels(layer) => write!(f, "labels('{layer}')"),
            Operand::List(layer) => write!(f, "list('{layer}')"),
            Operand::ListLength(layer) => write!(f, "list('{layer}').length"),
            Operand::Annotators(layer) => write!(f, "annotators('{layer}')"),
        }
    }
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Comparator {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `MATCHES`: regular-expression match.
    Matches,
    /// `NOT MATCHES`: regular-expression non-match.
    NotMatches,
    /// `IN`: membership in a multi-row operand.
    In,
    /// `NOT IN`: non-membership in a multi-row operand.
    NotIn,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Lt => "<",
            Comparator::Gt => ">",
            Comparator::Le => "<=",
            Comparator::Ge => ">=",
            Comparator::Matches => "MATCHES",
            Comparator::NotMatches => "NOT MATCHES",
            Comparator::In => "IN",
            Comparator::NotIn => "NOT IN",
        };
        f.write_str(text)
    }
}

/// An expression: a comparison, or a boolean combination of two
/// sub-expressions.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// `left <comparator> right`.
    Compare {
        /// Left operand.
        left: Operand,
        /// The comparison operator.
        comparator: Comparator,
        /// Right operand.
        right: Operand,
    },
    /// Conjunction.
    And(Box<Expression>, Box<Expression>),
    /// Disjunction.
    Or(Box<Expression>, Box<Expression>),
}

impl Expression {
    /// Builds a comparison expression.
    pub fn compare(left: Operand, comparator: Comparator, right: Operand) -> Expression {
        Expression::Compare {
            left,
            comparator,
            right,
        }
    }

    /// Conjunction, builder style.
    pub fn and(self, other: Expression) -> Expression {
        Expression::And(Box::new(self), Box::new(other))
    }

    /// Disjunction, builder style.
    pub fn or(self, other: Expression) -> Expression {
        Expression::Or(Box::new(self), Box::new(other))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Compare {
                left,
                comparator,
                right,
            } => write!(f, "{left} {comparator} {right}"),
            Expression::And(a, b) => write!(f, "{a} AND {b}"),
            Expression::Or(a, b) => write!(f, "({a} OR {b})"),
        }
    }
}

/// One sort key of an order clause.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderKey {
    /// The operand to sort by.
    pub operand: Operand,
    /// Whether to sort descending.
    pub descending: bool,
}

impl OrderKey {
    /// An ascending sort key.
    pub fn asc(operand: Operand) -> OrderKey {
        OrderKey {
            operand,
            descending: false,
        }
    }

    /// A descending sort key.
    pub fn desc(operand: Operand) -> OrderKey {
        OrderKey {
            operand,
            descending: true,
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.operand,
            if self.descending { "DESC" } else { "ASC" }
        )
    }
}
