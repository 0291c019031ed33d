//! Query-expression compiler.
//!
//! Expressions arrive as [`ast::Expression`] trees, are lowered to SQL
//! fragments with placeholder parameters ([`ir`]), and rendered into
//! complete statements ([`render`]). Three dialects share the lowering
//! pass and differ only in operand translation: per transcript
//! ([`GraphDialect`]), per participant ([`ParticipantDialect`]) and per
//! annotation row of a temporal layer ([`AnnotationDialect`]).

pub mod annotation;
pub mod ast;
pub mod graph;
pub mod ir;
pub mod participant;
pub mod render;

pub use annotation::AnnotationDialect;
pub use ast::{Comparator, Expression, Operand, OrderKey};
pub use graph::GraphDialect;
pub use ir::{join_scope, Dialect, SqlValue, Term};
pub use participant::ParticipantDialect;
pub use render::{compile_clauses, Clauses, CompiledQuery};
