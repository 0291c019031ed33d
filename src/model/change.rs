//! Change tracking primitives.

use crate::model::ids::{AnchorId, AnnotationId};

/// Pending persistence state of an anchor or annotation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ChangeMarker {
    /// The object matches durable storage.
    #[default]
    NoChange,
    /// The object is memory-only and must be inserted.
    Create,
    /// The object was previously saved and has been modified.
    Update,
    /// The object was previously saved and must be deleted.
    Destroy,
}

/// One entry in a graph's ordered change log.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChangeTarget {
    /// An anchor changed.
    Anchor(AnchorId),
    /// An annotation changed.
    Annotation(AnnotationId),
}
