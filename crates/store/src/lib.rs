//! Mirador store: keyed-list reconciliation and the UI overlay that survives it.

#![forbid(unsafe_code)]

use mirador_core::{Entity, ListId};
use tracing::debug;

pub mod banner;
pub mod edit;
pub mod overlay;
pub mod reconcile;

pub use banner::{Banner, BannerExpired, BannerSlot, BannerState, BannerTimers};
pub use edit::{EditError, EditPhase, EditSession};
pub use overlay::{BeginEdit, OverlayEntry, OverlayStore, StoreOutcome};
pub use reconcile::{reconcile, PlanCounts, RenderOp, RenderPlan, RenderedList, RenderedRow, RowMode};

/// Container state and overlay for one keyed list.
pub struct ListState {
    pub rendered: RenderedList,
    pub overlay: OverlayStore,
}

impl ListState {
    pub fn new(overlay: OverlayStore) -> Self {
        Self { rendered: RenderedList::new(), overlay }
    }

    pub fn list(&self) -> ListId { self.overlay.list() }

    /// One full reconciliation pass: diff, apply to the rendered list, then
    /// reap overlay entries for keys that vanished. Returns the applied plan.
    pub fn sync<E: Entity>(&mut self, incoming: &[E]) -> RenderPlan {
        let plan = reconcile(&self.rendered, incoming, &self.overlay);
        self.rendered.apply(&plan);
        let reaped = self.overlay.reap_orphans(incoming.iter().map(|e| e.key()));
        let c = plan.counts();
        metrics::counter!("reconcile_ops_total", plan.len() as u64);
        debug!(
            list = %self.list(),
            inserts = c.inserts,
            updates = c.updates,
            removes = c.removes,
            modes = c.modes,
            reaped,
            "store: reconciled"
        );
        plan
    }

    /// Push the overlay's current mode for `key` into the rendered row.
    pub fn refresh_mode(&mut self, key: &str) -> Option<RenderOp> {
        let mode = self.overlay.mode_of(key);
        self.rendered.set_mode(key, mode)
    }
}
