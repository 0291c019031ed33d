//! In-memory annotation graph data model with change tracking.

pub mod anchor;
pub mod annotation;
pub mod change;
pub mod graph;
pub mod ids;

pub use anchor::{Anchor, Confidence};
pub use annotation::Annotation;
pub use change::{ChangeMarker, ChangeTarget};
pub use graph::{spans_include, Graph};
pub use ids::{AnchorId, AnnotationId};
