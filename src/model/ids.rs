//! Structured object identifiers with explicit parse and format rules.
//!
//! Identity encodes where an object lives in the backend: anchors are rows
//! of the shared anchor table; annotations are rows of a per-layer table
//! (tagged with their temporal scope), rows of a dedicated metadata table,
//! or rows of the generic attribute tables. Objects that have never been
//! saved carry a provisional identity allocated by their graph; the durable
//! identity is assigned on save.

use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;
use crate::schema::TemporalScope;

/// Identity of an anchor.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum AnchorId {
    /// A saved anchor row, `n_<row>`.
    Durable(i64),
    /// A memory-only anchor awaiting its first save, `n+<seq>`.
    Provisional(u64),
}

impl AnchorId {
    /// The backend row id, if this anchor has been saved.
    pub fn row(&self) -> Option<i64> {
        match self {
            AnchorId::Durable(row) => Some(*row),
            AnchorId::Provisional(_) => None,
        }
    }

    /// Whether this id is still provisional.
    pub fn is_provisional(&self) -> bool {
        matches!(self, AnchorId::Provisional(_))
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorId::Durable(row) => write!(f, "n_{row}"),
            AnchorId::Provisional(seq) => write!(f, "n+{seq}"),
        }
    }
}

impl FromStr for AnchorId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("n_") {
            let row = rest
                .parse()
                .map_err(|_| StoreError::InvalidId(s.to_string()))?;
            Ok(AnchorId::Durable(row))
        } else if let Some(rest) = s.strip_prefix("n+") {
            let seq = rest
                .parse()
                .map_err(|_| StoreError::InvalidId(s.to_string()))?;
            Ok(AnchorId::Provisional(seq))
        } else {
            Err(StoreError::InvalidId(s.to_string()))
        }
    }
}

/// Identity of an annotation.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum AnnotationId {
    /// A row of a per-layer annotation table, `e<scope>_<layer>_<row>`
    /// where `<scope>` is one of `f`, `m`, `w`, `s`.
    Temporal {
        /// Storage scope of the owning layer.
        scope: TemporalScope,
        /// Backend layer number.
        layer_num: i64,
        /// Row id within the layer table.
        row: i64,
    },
    /// A row of a dedicated metadata table (participant, main-participant,
    /// corpus, episode, transcript type, episode tags), `m_<layer>_<entity>`.
    Meta {
        /// The layer id the row belongs to.
        layer: String,
        /// The entity row id.
        entity: i64,
    },
    /// A row of the generic transcript-attribute table, `t|<attr>|<row>`.
    TranscriptAttr {
        /// Attribute name.
        attribute: String,
        /// Row id within the attribute table.
        row: i64,
    },
    /// A row of the generic participant-attribute table, `p|<attr>|<row>`.
    ParticipantAttr {
        /// Attribute name.
        attribute: String,
        /// Row id within the attribute table.
        row: i64,
    },
    /// A memory-only annotation awaiting its first save, `e+<seq>`.
    Provisional(u64),
}

impl AnnotationId {
    /// Builds a temporal id.
    pub fn temporal(scope: TemporalScope, layer_num: i64, row: i64) -> AnnotationId {
        AnnotationId::Temporal {
            scope,
            layer_num,
            row,
        }
    }

    /// Builds a meta-entity id.
    pub fn meta(layer: impl Into<String>, entity: i64) -> AnnotationId {
        AnnotationId::Meta {
            layer: layer.into(),
            entity,
        }
    }

    /// Whether this id is still provisional.
    pub fn is_provisional(&self) -> bool {
        matches!(self, AnnotationId::Provisional(_))
    }

    /// The per-layer table row id, for temporal ids.
    pub fn temporal_row(&self) -> Option<i64> {
        match self {
            AnnotationId::Temporal { row, .. } => Some(*row),
            _ => None,
        }
    }
}

fn scope_char(scope: TemporalScope) -> char {
    match scope {
        TemporalScope::Freeform => 'f',
        TemporalScope::Meta => 'm',
        TemporalScope::Word => 'w',
        TemporalScope::Segment => 's',
    }
}

fn scope_from_char(c: char) -> Option<TemporalScope> {
    match c {
        'f' => Some(TemporalScope::Freeform),
        'm' => Some(TemporalScope::Meta),
        'w' => Some(TemporalScope::Word),
        's' => Some(TemporalScope::Segment),
        _ => None,
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationId::Temporal {
                scope,
                layer_num,
                row,
            } => write!(f, "e{}_{layer_num}_{row}", scope_char(*scope)),
            AnnotationId::Meta { layer, entity } => write!(f, "m_{layer}_{entity}"),
            AnnotationId::TranscriptAttr { attribute, row } => write!(f, "t|{attribute}|{row}"),
            AnnotationId::ParticipantAttr { attribute, row } => write!(f, "p|{attribute}|{row}"),
            AnnotationId::Provisional(seq) => write!(f, "e+{seq}"),
        }
    }
}

impl FromStr for AnnotationId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidId(s.to_string());
        if let Some(rest) = s.strip_prefix("e+") {
            return rest
                .parse()
                .map(AnnotationId::Provisional)
                .map_err(|_| invalid());
        }
        if let Some(rest) = s.strip_prefix("m_") {
            // layer ids may themselves contain underscores, so split from
            // the right
            let (layer, entity) = rest.rsplit_once('_').ok_or_else(invalid)?;
            if layer.is_empty() {
                return Err(invalid());
            }
            return Ok(AnnotationId::Meta {
                layer: layer.to_string(),
                entity: entity.parse().map_err(|_| invalid())?,
            });
        }
        if let Some(rest) = s.strip_prefix("t|") {
            let (attribute, row) = rest.rsplit_once('|').ok_or_else(invalid)?;
            return Ok(AnnotationId::TranscriptAttr {
                attribute: attribute.to_string(),
                row: row.parse().map_err(|_| invalid())?,
            });
        }
        if let Some(rest) = s.strip_prefix("p|") {
            let (attribute, row) = rest.rsplit_once('|').ok_or_else(invalid)?;
            return Ok(AnnotationId::ParticipantAttr {
                attribute: attribute.to_string(),
                row: row.parse().map_err(|_| invalid())?,
            });
        }
        if let Some(rest) = s.strip_prefix('e') {
            let mut chars = rest.chars();
            let scope = chars.next().and_then(scope_from_char).ok_or_else(invalid)?;
            let rest = chars.as_str();
            let rest = rest.strip_prefix('_').ok_or_else(invalid)?;
            let (layer_num, row) = rest.split_once('_').ok_or_else(invalid)?;
            return Ok(AnnotationId::Temporal {
                scope,
                layer_num: layer_num.parse().map_err(|_| invalid())?,
                row: row.parse().map_err(|_| invalid())?,
            });
        }
        Err(invalid())
    }
}
