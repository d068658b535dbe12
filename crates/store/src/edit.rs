#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use mirador_core::attributes::{is_editable, ATTRIBUTE_RANGES};
use mirador_core::{AttributeMap, QueueAttributeValues};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditPhase {
    Editing,
    /// Submit accepted locally and in flight to the backend.
    Validating,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("{0}")]
    Invalid(String),
    #[error("attribute update already in flight")]
    InFlight,
    #[error("{0} is not editable")]
    NotEditable(String),
    #[error("not editing")]
    NotEditing,
}

/// Draft values for one entity's attribute form. The draft is owned here, not
/// read back from whatever renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditSession {
    phase: EditPhase,
    draft: BTreeMap<String, String>,
}

impl EditSession {
    /// Seed the draft from the cached attributes.
    pub fn begin(cache: &AttributeMap) -> Self {
        let draft = ATTRIBUTE_RANGES
            .iter()
            .map(|r| (r.name.to_string(), cache.get(r.name).unwrap_or_default().to_string()))
            .collect();
        Self { phase: EditPhase::Editing, draft }
    }

    pub fn phase(&self) -> EditPhase { self.phase }
    pub fn draft(&self) -> &BTreeMap<String, String> { &self.draft }
    pub fn in_flight(&self) -> bool { self.phase == EditPhase::Validating }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> Result<(), EditError> {
        if self.in_flight() {
            return Err(EditError::InFlight);
        }
        if !is_editable(name) {
            return Err(EditError::NotEditable(name.to_string()));
        }
        self.draft.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Validate the draft. On success the session moves to `Validating` and
    /// rejects further submits until [`EditSession::reject`] or the owner drops it.
    pub fn submit(&mut self) -> Result<QueueAttributeValues, EditError> {
        if self.in_flight() {
            return Err(EditError::InFlight);
        }
        let values = QueueAttributeValues::from_draft(&self.draft).map_err(EditError::Invalid)?;
        self.phase = EditPhase::Validating;
        Ok(values)
    }

    /// Backend refused the update: back to editing with the draft intact.
    pub fn reject(&mut self) {
        self.phase = EditPhase::Editing;
    }
}
