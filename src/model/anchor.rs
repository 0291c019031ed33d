//! Anchors: shared temporal boundary points.

use time::OffsetDateTime;

use crate::model::change::ChangeMarker;
use crate::model::ids::AnchorId;

/// How much trust to place in an offset or label.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub enum Confidence {
    /// No information about how the value was arrived at.
    #[default]
    Unknown,
    /// A default value, e.g. linear interpolation between aligned anchors.
    Default,
    /// Assigned by an automatic process such as forced alignment.
    Automatic,
    /// Checked by a human annotator.
    Manual,
}

impl Confidence {
    /// Backend numeric status code.
    pub fn status(self) -> i64 {
        match self {
            Confidence::Unknown => 0,
            Confidence::Default => 10,
            Confidence::Automatic => 50,
            Confidence::Manual => 100,
        }
    }

    /// Decodes a backend status code; intermediate values round down.
    pub fn from_status(status: i64) -> Confidence {
        match status {
            s if s >= 100 => Confidence::Manual,
            s if s >= 50 => Confidence::Automatic,
            s if s >= 10 => Confidence::Default,
            _ => Confidence::Unknown,
        }
    }
}

/// A point on the timeline shared by every annotation that starts or ends
/// there. Sharing anchors is what keeps adjacent and simultaneous
/// annotations synchronized.
#[derive(Clone, Debug, PartialEq)]
pub struct Anchor {
    /// Identity of this anchor.
    pub id: AnchorId,
    /// Offset in seconds (or ordinal position), if aligned.
    pub offset: Option<f64>,
    /// Confidence of the offset.
    pub confidence: Confidence,
    /// Who last set the offset.
    pub annotator: Option<String>,
    /// When the offset was last set.
    pub when: Option<OffsetDateTime>,
    /// Pending persistence state.
    pub change: ChangeMarker,
}

impl Anchor {
    /// Creates an anchor with the given identity and offset.
    pub fn new(id: AnchorId, offset: Option<f64>, confidence: Confidence) -> Anchor {
        Anchor {
            id,
            offset,
            confidence,
            annotator: None,
            when: None,
            change: ChangeMarker::NoChange,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_codes_round_trip() {
        for c in [
            Confidence::Unknown,
            Confidence::Default,
            Confidence::Automatic,
            Confidence::Manual,
        ] {
            assert_eq!(Confidence::from_status(c.status()), c);
        }
        assert_eq!(Confidence::from_status(75), Confidence::Automatic);
        assert_eq!(Confidence::from_status(-1), Confidence::Unknown);
    }
}
