//! Annotations: labelled spans between anchors.

use time::OffsetDateTime;

use crate::model::anchor::Confidence;
use crate::model::change::ChangeMarker;
use crate::model::ids::{AnchorId, AnnotationId};

/// A labelled span on one layer, bounded by a start and end anchor.
///
/// Each annotation has exactly one structural parent per the schema tree,
/// but its temporal position is independent of the parent's, which is what
/// allows overlapping structure such as simultaneous speakers.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    /// Identity of this annotation.
    pub id: AnnotationId,
    /// The label value.
    pub label: String,
    /// Owning layer id.
    pub layer_id: String,
    /// Structural parent annotation, if any.
    pub parent_id: Option<AnnotationId>,
    /// 1-based position among siblings sharing parent and layer.
    pub ordinal: i64,
    /// Start boundary anchor.
    pub start_id: AnchorId,
    /// End boundary anchor.
    pub end_id: AnchorId,
    /// Confidence of the label.
    pub confidence: Confidence,
    /// Who last set the label.
    pub annotator: Option<String>,
    /// When the label was last set.
    pub when: Option<OffsetDateTime>,
    /// Pending persistence state.
    pub change: ChangeMarker,
}

impl Annotation {
    /// Creates an annotation with the given identity, label and bounds.
    pub fn new(
        id: AnnotationId,
        label: impl Into<String>,
        layer_id: impl Into<String>,
        start_id: AnchorId,
        end_id: AnchorId,
    ) -> Annotation {
        Annotation {
            id,
            label: label.into(),
            layer_id: layer_id.into(),
            parent_id: None,
            ordinal: 1,
            start_id,
            end_id,
            confidence: Confidence::Unknown,
            annotator: None,
            when: None,
            change: ChangeMarker::NoChange,
        }
    }

    /// Sets the structural parent, builder style.
    pub fn with_parent(mut self, parent_id: AnnotationId) -> Annotation {
        self.parent_id = Some(parent_id);
        self
    }

    /// Sets the sibling ordinal, builder style.
    pub fn with_ordinal(mut self, ordinal: i64) -> Annotation {
        self.ordinal = ordinal;
        self
    }
}
