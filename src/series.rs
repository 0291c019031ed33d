//! Lazy, cancellable iteration over fragment results.
//!
//! Large result sets are never materialized eagerly: a [`FragmentSeries`]
//! holds the cheap fragment descriptors and loads one graph per `next()`
//! call. Cancellation is cooperative; a shared [`CancelFlag`] is checked
//! before each item is produced, and once set the series simply ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::model::Graph;
use crate::store::SqlAnnotationStore;

/// A shared cooperative cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A descriptor of one fragment to extract: a graph id, an offset window
/// and the layers to include.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentSpec {
    /// Id of the graph to extract from.
    pub graph_id: String,
    /// Window start offset, seconds.
    pub start: f64,
    /// Window end offset, seconds.
    pub end: f64,
    /// Layers to include.
    pub layer_ids: Vec<String>,
}

impl FragmentSpec {
    /// Creates a descriptor.
    pub fn new(
        graph_id: impl Into<String>,
        start: f64,
        end: f64,
        layer_ids: Vec<String>,
    ) -> FragmentSpec {
        FragmentSpec {
            graph_id: graph_id.into(),
            start,
            end,
            layer_ids,
        }
    }
}

/// Pull-based fragment iteration against one store.
///
/// `size_hint` is exact: the number of descriptors not yet consumed.
pub struct FragmentSeries<'a> {
    store: &'a SqlAnnotationStore,
    specs: std::vec::IntoIter<FragmentSpec>,
    cancel: CancelFlag,
}

impl<'a> FragmentSeries<'a> {
    /// Creates a series over the given descriptors.
    pub fn new(
        store: &'a SqlAnnotationStore,
        specs: Vec<FragmentSpec>,
        cancel: CancelFlag,
    ) -> FragmentSeries<'a> {
        FragmentSeries {
            store,
            specs: specs.into_iter(),
            cancel,
        }
    }

    /// The cancellation flag shared with the producer.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

impl Iterator for FragmentSeries<'_> {
    type Item = Result<Graph>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let spec = self.specs.next()?;
        Some(self.store.get_fragment_by_offsets(
            &spec.graph_id,
            spec.start,
            spec.end,
            &spec.layer_ids,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.specs.size_hint()
    }
}

impl ExactSizeIterator for FragmentSeries<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
