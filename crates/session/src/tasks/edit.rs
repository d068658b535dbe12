#![forbid(unsafe_code)]

use std::time::Instant;

use mirador_api::{ConsoleError, ConsoleResult, UpdateAttributesRequest};
use mirador_core::ListId;
use mirador_store::{BannerSlot, BannerState, BeginEdit, EditError};
use tracing::{info, warn};

use crate::{Session, UiUpdate};

fn edit_error(e: EditError) -> ConsoleError {
    ConsoleError::Validation(e.to_string())
}

impl Session {
    /// Enter edit mode for a queue's attributes. Without cached attributes a
    /// fetch is issued first and editing starts when it lands.
    pub fn begin_edit(&mut self, key: &str) -> ConsoleResult<BeginEdit> {
        self.require_row(ListId::Queues, key)?;
        let outcome = match self.lists.get_mut(&ListId::Queues) {
            Some(st) => st.overlay.begin_edit(key),
            None => return Err(ConsoleError::Validation("queues list unavailable".into())),
        };
        match outcome {
            BeginEdit::Started => {
                self.present_mode(ListId::Queues, key);
                self.present_attributes(key);
            }
            BeginEdit::NeedsFetch => self.fetch_attributes(key, true)?,
            BeginEdit::AlreadyEditing | BeginEdit::Waiting => {}
        }
        info!(key, outcome = ?outcome, "edit: begin");
        Ok(outcome)
    }

    pub fn set_draft(&mut self, key: &str, name: &str, value: impl Into<String>) -> ConsoleResult<()> {
        match self.lists.get_mut(&ListId::Queues) {
            Some(st) => st.overlay.set_draft(key, name, value).map_err(edit_error),
            None => Err(edit_error(EditError::NotEditing)),
        }
    }

    /// Validate the draft and send it. A range failure shows the first failing
    /// field on the attribute banner, keeps the session editing and sends
    /// nothing. A second submit while one is in flight is refused.
    pub fn submit_edit(&mut self, key: &str) -> ConsoleResult<()> {
        self.require_row(ListId::Queues, key)?;
        let submitted = match self.lists.get_mut(&ListId::Queues) {
            Some(st) => st.overlay.submit_edit(key),
            None => Err(EditError::NotEditing),
        };
        let values = match submitted {
            Ok(v) => v,
            Err(EditError::Invalid(message)) => {
                if let Some(st) = self.lists.get_mut(&ListId::Queues) {
                    st.overlay.set_status(key, BannerSlot::Attributes, BannerState::Error, message.clone());
                }
                self.present_banner(ListId::Queues, key, BannerSlot::Attributes);
                return Err(ConsoleError::Validation(message));
            }
            Err(e) => {
                warn!(key, error = %e, "edit: submit refused");
                return Err(edit_error(e));
            }
        };
        self.present_attributes(key);
        let token = self.token();
        let api = self.api.clone();
        let req = UpdateAttributesRequest::new(key, &values);
        let key = key.to_string();
        info!(key = %key, "edit: submit");
        self.spawn_task(async move {
            let t0 = Instant::now();
            let result = api.update_attributes(&req).await.map(|_| ()).map_err(|e| e.to_string());
            info!(key = %key, ok = result.is_ok(), took_ms = %t0.elapsed().as_millis(), "edit: update finished");
            UiUpdate::AttributesSaved { token, key, values, result }
        });
        Ok(())
    }

    /// Leave edit mode without saving. Refused while a submit is in flight.
    pub fn cancel_edit(&mut self, key: &str) -> ConsoleResult<()> {
        match self.lists.get_mut(&ListId::Queues) {
            Some(st) => st.overlay.cancel_edit(key).map_err(edit_error)?,
            None => return Ok(()),
        }
        self.present_mode(ListId::Queues, key);
        self.present_attributes(key);
        Ok(())
    }

    /// The single Edit/Save control: enters edit mode, or submits when
    /// already editing.
    pub fn toggle_edit(&mut self, key: &str) -> ConsoleResult<()> {
        let editing = self.lists.get(&ListId::Queues).map(|l| l.overlay.is_editing(key)).unwrap_or(false);
        if editing {
            self.submit_edit(key)
        } else {
            self.begin_edit(key).map(|_| ())
        }
    }
}
