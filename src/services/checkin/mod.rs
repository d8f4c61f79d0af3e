//! Batch check-in orchestrator
//!
//! Turns a family selection into:
//! 1. one shared family code (seeded by the smallest person id)
//! 2. concurrent per-member check-in calls to the attendance service
//! 3. a single print job for the whole label set
//!
//! Per-member failures are recorded and never block printing. A batch in
//! which no call reached the service is aborted before printing. A print
//! failure leaves the recorded check-ins in place.

use crate::domain::code;
use crate::domain::types::{
    CheckinRequest, CheckinResult, FamilyMember, InstanceId, Label, LabelText, PersonId,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Failure talking to the attendance service
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The request never got a response (connect, DNS, timeout)
    #[error("attendance service unreachable: {0}")]
    Transport(String),
    /// The service answered with a non-success status
    #[error("attendance service returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// The service answered with a body we could not understand
    #[error("unexpected attendance service response: {0}")]
    Decode(String),
}

impl ServiceError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ServiceError::Transport(_))
    }
}

/// Failure submitting a print job
#[derive(Debug, Clone, Error)]
pub enum PrintError {
    #[error("no labels to print")]
    Empty,
    #[error("print spooler unavailable: {0}")]
    Spooler(String),
    #[error("print job rejected: {0}")]
    Rejected(String),
    #[error("print job timed out after {0} ms")]
    Timeout(u64),
}

/// Batch-level failure; exactly one is surfaced per attempt
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("no family members selected")]
    EmptySelection,
    #[error("batch size {size} exceeds max of {max}")]
    TooLarge { size: usize, max: usize },
    #[error("check-in failed: {0}")]
    Transport(ServiceError),
    #[error("{checked_in} checked in, but printing failed: {source}")]
    Print { checked_in: usize, results: Vec<CheckinResult>, source: PrintError },
}

impl BatchError {
    /// Rejected locally before any network or print call
    pub fn is_admission(&self) -> bool {
        matches!(self, BatchError::EmptySelection | BatchError::TooLarge { .. })
    }
}

/// Attendance capability of the membership service
#[async_trait]
pub trait AttendanceService: Send + Sync {
    /// Check one member in to an instance
    async fn check_in(
        &self,
        instance_id: InstanceId,
        request: &CheckinRequest,
    ) -> Result<CheckinResult, ServiceError>;

    /// Family members of a person (including the person)
    async fn family(&self, person_id: PersonId) -> Result<Vec<FamilyMember>, ServiceError>;
}

/// Print collaborator; one call per batch
#[async_trait]
pub trait LabelPrinter: Send + Sync {
    /// Print the labels in order as one job, returning how many were printed
    async fn print_batch(&self, labels: &[Label]) -> Result<usize, PrintError>;
}

/// One family check-in submitted from the kiosk
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub instance_id: InstanceId,
    pub members: Vec<FamilyMember>,
    pub print_labels: bool,
    /// Printed after the configured aggregate labels, stamped with the family code
    pub extra_labels: Vec<LabelText>,
}

impl BatchRequest {
    pub fn new(instance_id: InstanceId, members: Vec<FamilyMember>) -> Self {
        Self { instance_id, members, print_labels: true, extra_labels: Vec::new() }
    }
}

/// Result of a batch that reached the attendance service and printer
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub code: String,
    pub results: Vec<CheckinResult>,
    pub checked_in: usize,
    pub labels_printed: usize,
}

impl BatchOutcome {
    /// Single line shown to the kiosk operator
    pub fn summary(&self) -> String {
        let labels = if self.labels_printed == 1 { "label" } else { "labels" };
        format!("{} checked in, {} {} printed", self.checked_in, self.labels_printed, labels)
    }
}

/// Shared family code: generated from the smallest selected person id
///
/// Returns `None` for an empty selection.
pub fn family_code<'a, I>(person_ids: I, instance_id: InstanceId) -> Option<String>
where
    I: IntoIterator<Item = &'a PersonId>,
{
    let anchor = person_ids.into_iter().min()?;
    Some(code::generate_for(*anchor, instance_id))
}

/// Member labels in selection order, then one aggregate label per extra,
/// then the caller's extra labels carrying the same code
pub fn build_labels(
    members: &[FamilyMember],
    code: &str,
    aggregate_extras: &[String],
    extra_labels: &[LabelText],
) -> Vec<Label> {
    let mut labels: Vec<Label> = members
        .iter()
        .map(|m| Label::Member {
            person_id: m.person_id,
            display_name: m.display_name.clone(),
            code: code.to_string(),
        })
        .collect();

    labels.extend(
        aggregate_extras
            .iter()
            .map(|extra| Label::Aggregate { code: code.to_string(), extra: extra.clone() }),
    );
    labels.extend(extra_labels.iter().map(|text| Label::Custom {
        name: text.name.clone(),
        code: code.to_string(),
        extra: text.extra.clone(),
    }));
    labels
}

/// Keep the first occurrence of each person id
fn dedup_members(members: Vec<FamilyMember>) -> Vec<FamilyMember> {
    let mut seen = HashSet::with_capacity(members.len());
    members.into_iter().filter(|m| seen.insert(m.person_id)).collect()
}

/// Orchestrates family check-ins against injected collaborators
pub struct BatchCheckin<A: ?Sized, P: ?Sized> {
    attendance: Arc<A>,
    printer: Arc<P>,
    metrics: Arc<Metrics>,
    max_batch_size: usize,
    aggregate_extras: Vec<String>,
}

impl<A, P> BatchCheckin<A, P>
where
    A: AttendanceService + ?Sized + 'static,
    P: LabelPrinter + ?Sized,
{
    pub fn new(attendance: Arc<A>, printer: Arc<P>, metrics: Arc<Metrics>, config: &Config) -> Self {
        Self {
            attendance,
            printer,
            metrics,
            max_batch_size: config.max_batch_size(),
            aggregate_extras: config.aggregate_labels().to_vec(),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Look up the family of a person through the attendance service
    pub async fn lookup_family(&self, person_id: PersonId) -> Result<Vec<FamilyMember>, ServiceError> {
        self.attendance.family(person_id).await
    }

    /// Check in a family and print its labels
    pub async fn run(&self, request: BatchRequest) -> Result<BatchOutcome, BatchError> {
        let start = Instant::now();
        let instance_id = request.instance_id;
        let members = dedup_members(request.members);

        // Admission control: nothing leaves the kiosk for a rejected batch
        if members.is_empty() {
            self.metrics.record_batch_rejected();
            return Err(BatchError::EmptySelection);
        }
        if members.len() > self.max_batch_size {
            self.metrics.record_batch_rejected();
            warn!(
                instance_id = %instance_id,
                size = members.len(),
                max = self.max_batch_size,
                "batch_rejected_too_large"
            );
            return Err(BatchError::TooLarge { size: members.len(), max: self.max_batch_size });
        }

        let batch_id = Uuid::now_v7().to_string();
        let code = match family_code(members.iter().map(|m| &m.person_id), instance_id) {
            Some(code) => code,
            None => return Err(BatchError::EmptySelection),
        };
        if let Some(anchor) = members.iter().map(|m| m.person_id).min() {
            if !code::is_representable(anchor.0, instance_id.0) {
                warn!(
                    batch_id = %batch_id,
                    anchor = %anchor,
                    instance_id = %instance_id,
                    code = %code,
                    "family_code_outside_window"
                );
            }
        }

        info!(
            batch_id = %batch_id,
            instance_id = %instance_id,
            members = members.len(),
            code = %code,
            "batch_checkin_started"
        );

        let results = match self.check_in_all(instance_id, &members, &code).await {
            Ok(results) => results,
            Err(e) => {
                self.metrics.record_transport_failure();
                self.metrics.record_batch_latency(start.elapsed().as_millis() as u64);
                error!(batch_id = %batch_id, error = %e, "batch_checkin_unreachable");
                return Err(BatchError::Transport(e));
            }
        };

        let checked_in = results.iter().filter(|r| r.success).count();
        self.metrics.record_batch(checked_in as u64, (results.len() - checked_in) as u64);
        for failed in results.iter().filter(|r| !r.success) {
            warn!(
                batch_id = %batch_id,
                person_id = %failed.person_id,
                error = failed.error.as_deref().unwrap_or("unknown"),
                "member_checkin_failed"
            );
        }

        let labels_printed = if request.print_labels {
            let labels = build_labels(&members, &code, &self.aggregate_extras, &request.extra_labels);
            match self.printer.print_batch(&labels).await {
                Ok(printed) => {
                    self.metrics.record_labels_printed(printed as u64);
                    printed
                }
                Err(e) => {
                    self.metrics.record_print_failure();
                    self.metrics.record_batch_latency(start.elapsed().as_millis() as u64);
                    error!(
                        batch_id = %batch_id,
                        checked_in = checked_in,
                        labels = labels.len(),
                        error = %e,
                        "batch_print_failed"
                    );
                    return Err(BatchError::Print { checked_in, results, source: e });
                }
            }
        } else {
            0
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_batch_latency(latency_ms);

        let outcome = BatchOutcome { batch_id, code, results, checked_in, labels_printed };
        info!(
            batch_id = %outcome.batch_id,
            checked_in = outcome.checked_in,
            members = outcome.results.len(),
            labels_printed = outcome.labels_printed,
            latency_ms = latency_ms,
            "batch_checkin_completed"
        );
        Ok(outcome)
    }

    /// Fan out one check-in per member and wait for every call to settle
    ///
    /// Calls run on their own tasks so they complete even if this future is
    /// dropped. Results come back in selection order. Returns the first
    /// transport error only when no call reached the service.
    async fn check_in_all(
        &self,
        instance_id: InstanceId,
        members: &[FamilyMember],
        code: &str,
    ) -> Result<Vec<CheckinResult>, ServiceError> {
        let handles: Vec<_> = members
            .iter()
            .map(|member| {
                let attendance = Arc::clone(&self.attendance);
                let request = CheckinRequest {
                    person_id: member.person_id,
                    display_name: member.display_name.clone(),
                    code: code.to_string(),
                };
                let handle =
                    tokio::spawn(async move { attendance.check_in(instance_id, &request).await });
                (member.person_id, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut first_transport_error = None;
        let mut transport_failures = 0usize;

        for (person_id, handle) in handles {
            let result = match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    if e.is_transport() {
                        transport_failures += 1;
                        first_transport_error.get_or_insert_with(|| e.clone());
                    }
                    CheckinResult::failed(person_id, e.to_string())
                }
                Err(join_error) => CheckinResult::failed(person_id, join_error.to_string()),
            };
            results.push(result);
        }

        match first_transport_error {
            Some(e) if transport_failures == results.len() => Err(e),
            _ => Ok(results),
        }
    }
}
