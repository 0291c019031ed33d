//! Relational store for layered, time-aligned annotation graphs.
//!
//! Transcripts are modelled as annotation graphs: anchors (shared temporal
//! boundary points) connected by labelled annotations organised into layers
//! (turns, utterances, words, segments, tags). The crate provides the layer
//! schema model, the change-tracked in-memory graph, a query-expression
//! compiler producing parameterized SQL, a bounded-fragment extractor, and a
//! diff-based persistence engine over SQLite.

#![forbid(unsafe_code)]

pub mod compiler;
pub mod error;
pub mod model;
pub mod schema;
pub mod series;
pub mod store;

pub use error::{Result, StoreError};
pub use model::graph::Graph;
pub use schema::{Layer, LayerScope, Schema};
pub use series::{CancelFlag, FragmentSeries, FragmentSpec};
pub use store::SqlAnnotationStore;
