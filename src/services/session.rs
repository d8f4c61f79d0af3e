//! Kiosk session - the in-progress family selection
//!
//! Tracks which instance the kiosk is checking in to and which family
//! members are selected. Submitting hands the selection to the orchestrator
//! and clears it once the check-ins have been recorded.

use crate::domain::types::{FamilyMember, InstanceId, PersonId};
use crate::services::checkin::{
    AttendanceService, BatchCheckin, BatchError, BatchOutcome, BatchRequest, LabelPrinter,
};
use tracing::debug;

#[derive(Debug, Default)]
pub struct KioskSession {
    instance_id: Option<InstanceId>,
    selection: Vec<FamilyMember>,
}

impl KioskSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch event instance; a selection never carries over to another instance
    pub fn set_instance(&mut self, instance_id: InstanceId) {
        if self.instance_id != Some(instance_id) {
            self.selection.clear();
        }
        self.instance_id = Some(instance_id);
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance_id
    }

    pub fn selection(&self) -> &[FamilyMember] {
        &self.selection
    }

    pub fn is_selected(&self, person_id: PersonId) -> bool {
        self.selection.iter().any(|m| m.person_id == person_id)
    }

    pub fn select(&mut self, member: FamilyMember) {
        if !self.is_selected(member.person_id) {
            self.selection.push(member);
        }
    }

    pub fn deselect(&mut self, person_id: PersonId) {
        self.selection.retain(|m| m.person_id != person_id);
    }

    /// Select when unselected, deselect otherwise; returns the new state
    pub fn toggle(&mut self, member: FamilyMember) -> bool {
        if self.is_selected(member.person_id) {
            self.deselect(member.person_id);
            false
        } else {
            self.select(member);
            true
        }
    }

    pub fn clear(&mut self) {
        self.selection.clear();
    }

    /// Whether the check-in action is enabled
    pub fn can_submit(&self) -> bool {
        self.instance_id.is_some() && !self.selection.is_empty()
    }

    /// Submit the current selection as one batch
    ///
    /// Returns `Ok(None)` without touching the network when there is nothing
    /// to submit. The selection is cleared after the batch completes, including
    /// when only printing failed (the check-ins are already recorded); it is
    /// kept after an admission rejection or an unreachable service so the
    /// operator can adjust and retry.
    pub async fn submit<A, P>(
        &mut self,
        orchestrator: &BatchCheckin<A, P>,
    ) -> Result<Option<BatchOutcome>, BatchError>
    where
        A: AttendanceService + ?Sized + 'static,
        P: LabelPrinter + ?Sized,
    {
        let Some(instance_id) = self.instance_id else {
            debug!("kiosk_submit_ignored_no_instance");
            return Ok(None);
        };
        if self.selection.is_empty() {
            debug!(instance_id = %instance_id, "kiosk_submit_ignored_empty_selection");
            return Ok(None);
        }

        let request = BatchRequest::new(instance_id, self.selection.clone());
        let result = orchestrator.run(request).await;

        match &result {
            Ok(_) | Err(BatchError::Print { .. }) => self.clear(),
            Err(_) => {}
        }
        result.map(Some)
    }
}
