#![forbid(unsafe_code)]

use std::time::Instant;

use tracing::info;

use crate::{Session, UiUpdate};

impl Session {
    /// Fetch the active view's full snapshot in the background.
    pub(crate) fn start_full_fetch(&self) {
        let token = self.token();
        let api = self.api.clone();
        info!(view = %token.view, generation = token.generation, "snapshot: request start");
        self.spawn_task(async move {
            let t0 = Instant::now();
            match api.snapshot(token.view).await {
                Ok(snapshot) => {
                    info!(view = %token.view, took_ms = %t0.elapsed().as_millis(), "snapshot: response ok");
                    UiUpdate::Snapshot { token, snapshot }
                }
                Err(e) => {
                    info!(view = %token.view, error = %e, took_ms = %t0.elapsed().as_millis(), "snapshot: request failed");
                    UiUpdate::SnapshotFailed { token, message: e.to_string() }
                }
            }
        });
    }
}
