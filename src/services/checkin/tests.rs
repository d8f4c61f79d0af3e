//! Tests for the batch check-in orchestrator

use super::*;
use crate::domain::types::{
    CheckinRequest, CheckinResult, FamilyMember, InstanceId, Label, LabelText, PersonId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted outcome for one person
#[derive(Clone)]
enum Script {
    Reject(&'static str),
    Status(u16),
    Unreachable,
}

/// Attendance fake: succeeds unless a person has a script entry
#[derive(Default)]
struct FakeAttendance {
    scripts: HashMap<PersonId, Script>,
    delay: Option<Duration>,
    calls: Mutex<Vec<CheckinRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    settled: AtomicUsize,
    family: Vec<FamilyMember>,
}

impl FakeAttendance {
    fn with_script(mut self, person: u64, script: Script) -> Self {
        self.scripts.insert(PersonId(person), script);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl AttendanceService for FakeAttendance {
    async fn check_in(
        &self,
        _instance_id: InstanceId,
        request: &CheckinRequest,
    ) -> Result<CheckinResult, ServiceError> {
        self.calls.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.settled.fetch_add(1, Ordering::SeqCst);

        match self.scripts.get(&request.person_id) {
            None => Ok(CheckinResult::ok(request.person_id)),
            Some(Script::Reject(msg)) => Ok(CheckinResult::failed(request.person_id, *msg)),
            Some(Script::Status(status)) => {
                Err(ServiceError::Status { status: *status, body: "boom".to_string() })
            }
            Some(Script::Unreachable) => {
                Err(ServiceError::Transport("connection refused".to_string()))
            }
        }
    }

    async fn family(&self, _person_id: PersonId) -> Result<Vec<FamilyMember>, ServiceError> {
        Ok(self.family.clone())
    }
}

/// Printer fake: records every job and how many check-ins had settled when it ran
#[derive(Default)]
struct FakePrinter {
    jobs: Mutex<Vec<Vec<Label>>>,
    settled_at_print: Mutex<Vec<usize>>,
    attendance: Option<Arc<FakeAttendance>>,
    fail: bool,
}

#[async_trait]
impl LabelPrinter for FakePrinter {
    async fn print_batch(&self, labels: &[Label]) -> Result<usize, PrintError> {
        if let Some(attendance) = &self.attendance {
            self.settled_at_print.lock().push(attendance.settled.load(Ordering::SeqCst));
        }
        self.jobs.lock().push(labels.to_vec());
        if self.fail {
            return Err(PrintError::Rejected("out of labels".to_string()));
        }
        Ok(labels.len())
    }
}

fn family(ids: &[u64]) -> Vec<FamilyMember> {
    ids.iter().map(|&id| FamilyMember::new(PersonId(id), format!("Person {id}"))).collect()
}

fn orchestrator(
    attendance: Arc<FakeAttendance>,
    printer: Arc<FakePrinter>,
) -> BatchCheckin<FakeAttendance, FakePrinter> {
    BatchCheckin::new(attendance, printer, Arc::new(Metrics::new()), &Config::default())
}

#[test]
fn test_family_code_uses_smallest_id() {
    let expected = crate::domain::code::generate(7, 3);
    assert_eq!(expected, "225-BBCJ");

    for order in [[41, 7, 19], [7, 19, 41], [19, 41, 7]] {
        let ids: Vec<PersonId> = order.iter().map(|&id| PersonId(id)).collect();
        assert_eq!(family_code(&ids, InstanceId(3)), Some(expected.clone()));
    }
    assert_eq!(family_code(&Vec::<PersonId>::new(), InstanceId(3)), None);
}

#[test]
fn test_build_labels_members_then_aggregate() {
    let members = family(&[41, 7]);
    let labels = build_labels(&members, "225-BBCJ", &["parent".to_string()], &[]);

    assert_eq!(labels.len(), 3);
    assert_eq!(
        labels[0],
        Label::Member {
            person_id: PersonId(41),
            display_name: "Person 41".to_string(),
            code: "225-BBCJ".to_string()
        }
    );
    assert!(!labels[1].is_aggregate());
    assert_eq!(
        labels[2],
        Label::Aggregate { code: "225-BBCJ".to_string(), extra: "parent".to_string() }
    );
}

#[tokio::test]
async fn test_extra_labels_follow_aggregate_with_family_code() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance, printer.clone());

    let mut request = BatchRequest::new(InstanceId(3), family(&[7, 9]));
    request.extra_labels = vec![LabelText {
        name: "Parent pickup".to_string(),
        code: "IGNORED".to_string(),
        extra: "Person 7, Person 9".to_string(),
    }];
    let outcome = batch.run(request).await.unwrap();

    assert_eq!(outcome.labels_printed, 4);
    let jobs = printer.jobs.lock();
    let job = &jobs[0];
    assert!(job[2].is_aggregate());
    assert_eq!(
        job[3],
        Label::Custom {
            name: "Parent pickup".to_string(),
            code: "225-BBCJ".to_string(),
            extra: "Person 7, Person 9".to_string(),
        }
    );
}

#[tokio::test]
async fn test_sixteen_members_rejected_without_calls() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance.clone(), printer.clone());

    let ids: Vec<u64> = (1..=16).collect();
    let err = batch.run(BatchRequest::new(InstanceId(3), family(&ids))).await.unwrap_err();

    assert!(matches!(err, BatchError::TooLarge { size: 16, max: 15 }));
    assert!(err.is_admission());
    assert_eq!(attendance.call_count(), 0);
    assert!(printer.jobs.lock().is_empty());
}

#[tokio::test]
async fn test_fifteen_members_accepted() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance.clone(), printer.clone());

    let ids: Vec<u64> = (1..=15).collect();
    let outcome = batch.run(BatchRequest::new(InstanceId(3), family(&ids))).await.unwrap();

    assert_eq!(attendance.call_count(), 15);
    assert_eq!(outcome.checked_in, 15);
    assert_eq!(outcome.labels_printed, 16);
    assert_eq!(printer.jobs.lock().len(), 1);
}

#[tokio::test]
async fn test_empty_selection_rejected() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance.clone(), printer.clone());

    let err = batch.run(BatchRequest::new(InstanceId(3), Vec::new())).await.unwrap_err();

    assert!(matches!(err, BatchError::EmptySelection));
    assert_eq!(attendance.call_count(), 0);
    assert!(printer.jobs.lock().is_empty());
}

#[tokio::test]
async fn test_partial_failure_still_prints_full_label_set() {
    let attendance = Arc::new(FakeAttendance::default().with_script(2, Script::Reject("Failed")));
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance.clone(), printer.clone());

    let outcome = batch.run(BatchRequest::new(InstanceId(3), family(&[1, 2, 3]))).await.unwrap();

    assert_eq!(outcome.checked_in, 2);
    assert_eq!(outcome.labels_printed, 4);
    assert_eq!(outcome.summary(), "2 checked in, 4 labels printed");
    assert_eq!(outcome.results[1], CheckinResult::failed(PersonId(2), "Failed"));

    let jobs = printer.jobs.lock();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].len(), 4);
    assert_eq!(jobs[0].iter().filter(|l| l.is_aggregate()).count(), 1);
}

#[tokio::test]
async fn test_every_request_carries_family_code() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance.clone(), printer.clone());

    let outcome =
        batch.run(BatchRequest::new(InstanceId(3), family(&[41, 7, 19]))).await.unwrap();

    assert_eq!(outcome.code, "225-BBCJ");
    assert!(attendance.calls.lock().iter().all(|c| c.code == "225-BBCJ"));
    assert!(printer.jobs.lock()[0].iter().all(|l| l.code() == "225-BBCJ"));
}

#[tokio::test]
async fn test_calls_are_concurrent_and_print_waits_for_all() {
    let attendance = Arc::new(FakeAttendance::default().with_delay(Duration::from_millis(50)));
    let printer =
        Arc::new(FakePrinter { attendance: Some(attendance.clone()), ..Default::default() });
    let batch = orchestrator(attendance.clone(), printer.clone());

    let outcome =
        batch.run(BatchRequest::new(InstanceId(9), family(&[1, 2, 3, 4, 5]))).await.unwrap();

    assert_eq!(outcome.checked_in, 5);
    assert_eq!(attendance.max_in_flight.load(Ordering::SeqCst), 5);
    assert_eq!(*printer.settled_at_print.lock(), vec![5]);
}

#[tokio::test]
async fn test_results_keep_selection_order() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance, printer);

    let outcome =
        batch.run(BatchRequest::new(InstanceId(3), family(&[30, 10, 20]))).await.unwrap();

    let ids: Vec<u64> = outcome.results.iter().map(|r| r.person_id.0).collect();
    assert_eq!(ids, vec![30, 10, 20]);
}

#[tokio::test]
async fn test_unreachable_service_aborts_before_print() {
    let attendance = Arc::new(
        FakeAttendance::default()
            .with_script(1, Script::Unreachable)
            .with_script(2, Script::Unreachable),
    );
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance.clone(), printer.clone());

    let err = batch.run(BatchRequest::new(InstanceId(3), family(&[1, 2]))).await.unwrap_err();

    assert!(matches!(err, BatchError::Transport(ServiceError::Transport(_))));
    assert!(!err.is_admission());
    assert_eq!(attendance.call_count(), 2);
    assert!(printer.jobs.lock().is_empty());
}

#[tokio::test]
async fn test_unreachable_batch_counts_latency() {
    let attendance = Arc::new(
        FakeAttendance::default()
            .with_script(1, Script::Unreachable)
            .with_script(2, Script::Unreachable),
    );
    let metrics = Arc::new(Metrics::new());
    let batch =
        BatchCheckin::new(attendance, Arc::new(FakePrinter::default()), metrics.clone(), &Config::default());

    let _ = batch.run(BatchRequest::new(InstanceId(3), family(&[1, 2]))).await;

    let summary = metrics.snapshot();
    assert_eq!(summary.batches_transport_failed, 1);
    assert_eq!(summary.batch_latency_buckets.iter().sum::<u64>(), 1);
}

#[tokio::test]
async fn test_single_unreachable_member_is_recorded() {
    let attendance = Arc::new(
        FakeAttendance::default()
            .with_script(2, Script::Unreachable)
            .with_script(3, Script::Status(500)),
    );
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance, printer.clone());

    let outcome = batch.run(BatchRequest::new(InstanceId(3), family(&[1, 2, 3]))).await.unwrap();

    assert_eq!(outcome.checked_in, 1);
    assert!(!outcome.results[1].success);
    assert!(outcome.results[1].error.as_deref().unwrap().contains("unreachable"));
    assert!(outcome.results[2].error.as_deref().unwrap().contains("500"));
    assert_eq!(printer.jobs.lock().len(), 1);
}

#[tokio::test]
async fn test_print_failure_keeps_checkins() {
    let attendance = Arc::new(FakeAttendance::default().with_script(3, Script::Reject("Failed")));
    let printer = Arc::new(FakePrinter { fail: true, ..Default::default() });
    let batch = orchestrator(attendance.clone(), printer.clone());

    let err = batch.run(BatchRequest::new(InstanceId(3), family(&[1, 2, 3]))).await.unwrap_err();

    match err {
        BatchError::Print { checked_in, results, .. } => {
            assert_eq!(checked_in, 2);
            assert_eq!(results.len(), 3);
        }
        other => panic!("expected print failure, got {other:?}"),
    }
    assert_eq!(attendance.call_count(), 3);
    assert_eq!(printer.jobs.lock().len(), 1);
}

#[tokio::test]
async fn test_printing_disabled() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance, printer.clone());

    let mut request = BatchRequest::new(InstanceId(3), family(&[1, 2]));
    request.print_labels = false;
    let outcome = batch.run(request).await.unwrap();

    assert_eq!(outcome.checked_in, 2);
    assert_eq!(outcome.labels_printed, 0);
    assert!(printer.jobs.lock().is_empty());
}

#[tokio::test]
async fn test_duplicate_members_collapse() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let batch = orchestrator(attendance.clone(), printer.clone());

    let outcome =
        batch.run(BatchRequest::new(InstanceId(3), family(&[5, 5, 6]))).await.unwrap();

    assert_eq!(attendance.call_count(), 2);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.labels_printed, 3);
}

#[tokio::test]
async fn test_configured_batch_limit() {
    let attendance = Arc::new(FakeAttendance::default());
    let printer = Arc::new(FakePrinter::default());
    let config = Config::default().with_max_batch_size(2);
    let batch = BatchCheckin::new(attendance.clone(), printer, Arc::new(Metrics::new()), &config);

    let err = batch.run(BatchRequest::new(InstanceId(3), family(&[1, 2, 3]))).await.unwrap_err();
    assert!(matches!(err, BatchError::TooLarge { size: 3, max: 2 }));
    assert_eq!(batch.max_batch_size(), 2);
}

#[tokio::test]
async fn test_metrics_recorded() {
    let attendance = Arc::new(FakeAttendance::default().with_script(2, Script::Reject("Failed")));
    let printer = Arc::new(FakePrinter::default());
    let metrics = Arc::new(Metrics::new());
    let batch = BatchCheckin::new(attendance, printer, metrics.clone(), &Config::default());

    batch.run(BatchRequest::new(InstanceId(3), family(&[1, 2, 3]))).await.unwrap();
    let _ = batch.run(BatchRequest::new(InstanceId(3), Vec::new())).await;

    let summary = metrics.snapshot();
    assert_eq!(summary.batches_total, 1);
    assert_eq!(summary.members_checked_in, 2);
    assert_eq!(summary.members_failed, 1);
    assert_eq!(summary.labels_printed, 4);
    assert_eq!(summary.batches_rejected, 1);
}

#[tokio::test]
async fn test_lookup_family_delegates() {
    let attendance =
        Arc::new(FakeAttendance { family: family(&[1, 2]), ..Default::default() });
    let batch = orchestrator(attendance, Arc::new(FakePrinter::default()));

    let members = batch.lookup_family(PersonId(1)).await.unwrap();
    assert_eq!(members, family(&[1, 2]));
}
