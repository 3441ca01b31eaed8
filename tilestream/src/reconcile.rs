//! Extent reconciliation.
//!
//! Each viewport tick produces a fresh [`VisibleSet`]. Diffing it against the
//! tiles that currently hold a slot yields three lists:
//!
//! - `to_dispose`: active, no longer visible, and allowed to go
//! - `to_reposition`: everything that stays active (including vetoed tiles)
//! - `to_add`: visible but not yet active
//!
//! Applying the lists in that order lets a disposed tile's slot be reused by
//! an add within the same tick.

use std::collections::HashSet;

use crate::tile::{UnwrappedTileId, VisibleSet};

/// Decides whether a tile that left the viewport may be disposed now.
pub type CleanupPredicate = Box<dyn Fn(&UnwrappedTileId) -> bool + Send>;

/// Work to apply for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileDelta {
    pub to_dispose: Vec<UnwrappedTileId>,
    pub to_reposition: Vec<UnwrappedTileId>,
    pub to_add: Vec<UnwrappedTileId>,
}

impl ReconcileDelta {
    /// True when the tick neither frees nor allocates a slot.
    pub fn is_settled(&self) -> bool {
        self.to_dispose.is_empty() && self.to_add.is_empty()
    }
}

/// Diff `active` against `new_visible`.
///
/// Lists are sorted so that callers observe a deterministic order.
pub fn reconcile<'a, F>(
    new_visible: &VisibleSet,
    active: impl IntoIterator<Item = &'a UnwrappedTileId>,
    cleanup_eligible: F,
) -> ReconcileDelta
where
    F: Fn(&UnwrappedTileId) -> bool,
{
    let active: HashSet<UnwrappedTileId> = active.into_iter().copied().collect();

    let mut to_dispose = Vec::new();
    let mut to_reposition = Vec::new();
    for tile in &active {
        if !new_visible.contains(tile) && cleanup_eligible(tile) {
            to_dispose.push(*tile);
        } else {
            to_reposition.push(*tile);
        }
    }

    let mut to_add: Vec<UnwrappedTileId> = new_visible
        .iter()
        .filter(|tile| !active.contains(*tile))
        .copied()
        .collect();

    to_dispose.sort();
    to_reposition.sort();
    to_add.sort();

    ReconcileDelta {
        to_dispose,
        to_reposition,
        to_add,
    }
}

/// Holds the last visible set and the cleanup veto.
pub struct ExtentReconciler {
    previous: VisibleSet,
    cleanup_eligible: CleanupPredicate,
}

impl ExtentReconciler {
    /// A reconciler that disposes every tile as soon as it leaves the view.
    pub fn new() -> Self {
        Self::with_cleanup(Box::new(|_| true))
    }

    pub fn with_cleanup(cleanup_eligible: CleanupPredicate) -> Self {
        Self {
            previous: VisibleSet::new(),
            cleanup_eligible,
        }
    }

    pub fn set_cleanup(&mut self, cleanup_eligible: CleanupPredicate) {
        self.cleanup_eligible = cleanup_eligible;
    }

    /// The visible set from the last tick.
    pub fn previous(&self) -> &VisibleSet {
        &self.previous
    }

    /// Diff the new extent against the active tiles and remember it.
    pub fn reconcile<'a>(
        &mut self,
        new_visible: VisibleSet,
        active: impl IntoIterator<Item = &'a UnwrappedTileId>,
    ) -> ReconcileDelta {
        let delta = reconcile(&new_visible, active, &self.cleanup_eligible);
        self.previous = new_visible;
        delta
    }
}

impl Default for ExtentReconciler {
    fn default() -> Self {
        Self::new()
    }
}
