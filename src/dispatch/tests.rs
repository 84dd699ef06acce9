use std::{collections::HashSet, sync::Arc, time::Duration};

use proptest::prelude::*;
use test_strategy::proptest;

use super::*;
use crate::{
    reminder::ReminderStatus,
    test_utils::{FlakyStore, RecordingTransport, job, reminder, utc},
};

const NOW: &str = "2024-01-01T00:05:00Z";

#[tokio::test]
async fn due_reminder_is_emailed_and_marked_sent() {
    let store = Arc::new(FlakyStore::with(vec![reminder("r1", "a@x.com", "2024-01-01T00:00:00Z")]).await);
    let transport = Arc::new(RecordingTransport::default());
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    let report = job.run(utc(NOW)).await.unwrap();

    let sent = transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@x.com");
    assert!(sent[0].subject.contains('S'));

    let stored = store.reminder("r1").await;
    assert_eq!(stored.status, ReminderStatus::Sent);
    assert!(stored.email_sent);
    assert_eq!(stored.sent_at, Some(utc(NOW)));

    assert_eq!(report.processed, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(report.errors, 0);
}

#[tokio::test]
async fn future_reminder_is_left_alone() {
    let original = reminder("r1", "a@x.com", "2024-01-01T00:10:00Z");
    let store = Arc::new(FlakyStore::with(vec![original.clone()]).await);
    let transport = Arc::new(RecordingTransport::default());
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    let report = job.run(utc(NOW)).await.unwrap();

    assert_eq!(report.processed, 0);
    assert!(transport.sent_to().is_empty());
    assert!(store.updated_ids().is_empty());
    assert_eq!(store.reminder("r1").await, original);
}

#[tokio::test]
async fn ineligible_reminders_are_never_selected_or_mutated() {
    let mut sent = reminder("sent", "a@x.com", "2024-01-01T00:00:00Z");
    sent.status = ReminderStatus::Sent;
    sent.email_sent = true;
    let mut cancelled = reminder("cancelled", "b@x.com", "2024-01-01T00:00:00Z");
    cancelled.status = ReminderStatus::Cancelled;
    let mut failed = reminder("failed", "c@x.com", "2024-01-01T00:00:00Z");
    failed.status = ReminderStatus::Failed;
    failed.last_error = Some("550".to_owned());
    let mut flagged = reminder("flagged", "d@x.com", "2024-01-01T00:00:00Z");
    flagged.email_sent = true;

    let store = Arc::new(FlakyStore::with(vec![sent, cancelled, failed, flagged]).await);
    let transport = Arc::new(RecordingTransport::default());
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    let report = job.run(utc(NOW)).await.unwrap();

    assert_eq!(report.processed, 0);
    assert!(transport.sent_to().is_empty());
    assert!(store.updated_ids().is_empty());
    assert_eq!(store.reminder("failed").await.status, ReminderStatus::Failed);
}

#[tokio::test]
async fn second_run_does_not_resend() {
    let store = Arc::new(FlakyStore::with(vec![reminder("r1", "a@x.com", "2024-01-01T00:00:00Z")]).await);
    let transport = Arc::new(RecordingTransport::default());
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    job.run(utc(NOW)).await.unwrap();
    let second = job.run(utc(NOW)).await.unwrap();

    assert_eq!(second.processed, 0);
    assert_eq!(transport.sent_to(), vec!["a@x.com".to_owned()]);
}

#[tokio::test]
async fn one_rejected_send_does_not_stop_the_batch() {
    let store = Arc::new(
        FlakyStore::with(vec![
            reminder("r1", "first@x.com", "2024-01-01T00:00:00Z"),
            reminder("r2", "bad@x.com", "2024-01-01T00:01:00Z"),
            reminder("r3", "third@x.com", "2024-01-01T00:02:00Z"),
        ])
        .await,
    );
    let transport = Arc::new(RecordingTransport::rejecting(&["bad@x.com"]));
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    let report = job.run(utc(NOW)).await.unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.sent, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.write_back_failures, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].reminder_id, "r2");
    assert!(!report.failures[0].delivered);

    assert_eq!(store.reminder("r1").await.status, ReminderStatus::Sent);
    assert_eq!(store.reminder("r3").await.status, ReminderStatus::Sent);

    let failed = store.reminder("r2").await;
    assert_eq!(failed.status, ReminderStatus::Failed);
    assert!(!failed.email_sent);
    assert!(failed.last_error.unwrap().contains("550 mailbox unavailable"));
    assert_eq!(failed.sent_at, None);
}

#[tokio::test]
async fn selection_failure_fails_the_run_without_mutations() {
    let mut store = FlakyStore::with(vec![reminder("r1", "a@x.com", "2024-01-01T00:00:00Z")]).await;
    store.fail_query = true;
    let store = Arc::new(store);
    let transport = Arc::new(RecordingTransport::default());
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    let result = job.run(utc(NOW)).await;

    assert!(matches!(
        result,
        Err(DispatchError::Selection(StoreError::Unavailable(_)))
    ));
    assert!(transport.sent_to().is_empty());
    assert!(store.updated_ids().is_empty());
}

#[tokio::test]
async fn unrecorded_delivery_counts_as_error_and_run_continues() {
    let mut store = FlakyStore::with(vec![
        reminder("r1", "a@x.com", "2024-01-01T00:00:00Z"),
        reminder("r2", "b@x.com", "2024-01-01T00:01:00Z"),
    ])
    .await;
    store.fail_updates_for = HashSet::from(["r1".to_owned()]);
    let store = Arc::new(store);
    let transport = Arc::new(RecordingTransport::default());
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    let report = job.run(utc(NOW)).await.unwrap();

    assert_eq!(transport.sent_to(), vec!["a@x.com".to_owned(), "b@x.com".to_owned()]);
    assert_eq!(report.sent, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.write_back_failures, 1);
    assert!(report.failures[0].delivered);

    // Still pending, so the next run sends it again.
    let stale = store.reminder("r1").await;
    assert_eq!(stale.status, ReminderStatus::Pending);
    assert!(!stale.email_sent);
    assert_eq!(store.reminder("r2").await.status, ReminderStatus::Sent);
}

#[tokio::test]
async fn failed_send_with_failed_write_back_counts_once() {
    let mut store = FlakyStore::with(vec![reminder("r1", "bad@x.com", "2024-01-01T00:00:00Z")]).await;
    store.fail_updates_for = HashSet::from(["r1".to_owned()]);
    let store = Arc::new(store);
    let transport = Arc::new(RecordingTransport::rejecting(&["bad@x.com"]));
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    let report = job.run(utc(NOW)).await.unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.write_back_failures, 1);
    assert_eq!(store.updated_ids(), vec!["r1".to_owned()]);
    assert_eq!(store.reminder("r1").await.status, ReminderStatus::Pending);
}

/// Captures the stored state of each reminder at the moment it is sent.
struct ObservingTransport {
    store: Arc<FlakyStore>,
    seen: std::sync::Mutex<Vec<(ReminderStatus, bool)>>,
}

#[async_trait::async_trait]
impl MailTransport for ObservingTransport {
    async fn send(&self, _mail: &OutgoingMail) -> Result<(), DeliveryError> {
        let current = self.store.reminder("r1").await;
        self.seen
            .lock()
            .unwrap()
            .push((current.status, current.email_sent));
        Ok(())
    }
}

#[tokio::test]
async fn reminder_is_marked_sent_only_after_send_returns() {
    let store = Arc::new(FlakyStore::with(vec![reminder("r1", "a@x.com", "2024-01-01T00:00:00Z")]).await);
    let transport = Arc::new(ObservingTransport {
        store: store.clone(),
        seen: Default::default(),
    });
    let job = DispatchJob::new(
        store.clone(),
        transport.clone(),
        ReferenceZone::default(),
        DispatchSettings::default(),
    );

    let report = job.run(utc(NOW)).await.unwrap();

    assert_eq!(
        *transport.seen.lock().unwrap(),
        vec![(ReminderStatus::Pending, false)]
    );
    assert_eq!(report.sent, 1);
    let stored = store.reminder("r1").await;
    assert_eq!(stored.status, ReminderStatus::Sent);
    assert!(stored.email_sent);
}

#[tokio::test]
async fn failed_send_leaves_email_sent_untouched() {
    let store = Arc::new(FlakyStore::with(vec![reminder("r1", "bad@x.com", "2024-01-01T00:00:00Z")]).await);
    let transport = Arc::new(RecordingTransport::rejecting(&["bad@x.com"]));
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    job.run(utc(NOW)).await.unwrap();

    let updates = store.updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1.status, Some(ReminderStatus::Failed));
    assert_eq!(updates[0].1.email_sent, None);
}

#[tokio::test(start_paused = true)]
async fn slow_transport_times_out_as_failure() {
    let store = Arc::new(FlakyStore::with(vec![reminder("r1", "a@x.com", "2024-01-01T00:00:00Z")]).await);
    let transport = Arc::new(RecordingTransport::slow(Duration::from_secs(120)));
    let settings = DispatchSettings {
        send_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let job = job(store.clone(), transport.clone(), settings);

    let report = job.run(utc(NOW)).await.unwrap();

    assert_eq!(report.errors, 1);
    let failed = store.reminder("r1").await;
    assert_eq!(failed.status, ReminderStatus::Failed);
    assert!(failed.last_error.unwrap().contains("timed out"));
    assert!(transport.sent_to().is_empty());
}

#[tokio::test]
async fn failed_reminder_is_retried_only_after_reset() {
    let store = Arc::new(FlakyStore::with(vec![reminder("r1", "bad@x.com", "2024-01-01T00:00:00Z")]).await);
    let transport = Arc::new(RecordingTransport::rejecting(&["bad@x.com"]));
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    job.run(utc(NOW)).await.unwrap();
    let untouched = job.run(utc("2024-01-01T00:06:00Z")).await.unwrap();
    assert_eq!(untouched.processed, 0);

    store
        .inner
        .update(&"r1".to_owned(), ReminderPatch::reset_to_pending())
        .await
        .unwrap();
    let retried = job.run(utc("2024-01-01T00:07:00Z")).await.unwrap();

    assert_eq!(retried.processed, 1);
}

#[tokio::test]
async fn concurrent_sends_process_every_reminder_once() {
    let reminders = (0..10)
        .map(|i| reminder(&format!("r{i}"), &format!("user{i}@x.com"), "2024-01-01T00:00:00Z"))
        .collect();
    let store = Arc::new(FlakyStore::with(reminders).await);
    let transport = Arc::new(RecordingTransport::rejecting(&["user3@x.com"]));
    let settings = DispatchSettings {
        max_concurrent_sends: 4,
        ..Default::default()
    };
    let job = job(store.clone(), transport.clone(), settings);

    let report = job.run(utc(NOW)).await.unwrap();

    assert_eq!(report.processed, 10);
    assert_eq!(report.sent, 9);
    assert_eq!(report.errors, 1);
    let mut sent_to = transport.sent_to();
    sent_to.sort();
    sent_to.dedup();
    assert_eq!(sent_to.len(), 9);
}

#[test]
fn response_reports_counts_on_success() {
    let mut report = DispatchReport::new(utc(NOW), 3);
    report.record(ItemOutcome::Sent {
        reminder_id: "r1".to_owned(),
    });
    report.record(ItemOutcome::Failed {
        reminder_id: "r2".to_owned(),
        reason: "550".to_owned(),
        recorded: true,
    });
    report.record(ItemOutcome::Sent {
        reminder_id: "r3".to_owned(),
    });

    let json = serde_json::to_value(DispatchResponse::new(Ok(report), utc(NOW))).unwrap();

    assert_eq!(json["success"], true);
    assert_eq!(json["processedCount"], 3);
    assert_eq!(json["sentCount"], 2);
    assert_eq!(json["errorCount"], 1);
    assert_eq!(json["timestamp"], "2024-01-01T00:05:00Z");
    assert_eq!(json["failures"][0]["reminderId"], "r2");
}

#[test]
fn response_reports_selection_failure() {
    let error = DispatchError::Selection(StoreError::Unavailable("connection refused".to_owned()));

    let response = DispatchResponse::new(Err(error), utc(NOW));
    let json = serde_json::to_value(&response).unwrap();

    assert!(!response.is_success());
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("connection refused"));
    assert!(json.get("sentCount").is_none());
}

fn tokio_ct(
    future: impl std::future::Future<Output = Result<(), TestCaseError>>,
) -> Result<(), TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn status_strategy() -> impl Strategy<Value = ReminderStatus> {
    prop_oneof![
        3 => Just(ReminderStatus::Pending),
        1 => Just(ReminderStatus::Sent),
        1 => Just(ReminderStatus::Cancelled),
        1 => Just(ReminderStatus::Failed),
    ]
}

fn reminders_strategy() -> impl Strategy<Value = Vec<Reminder>> {
    prop::collection::vec(
        (status_strategy(), any::<bool>(), -30i64..30, any::<bool>()),
        0..12,
    )
    .prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (status, email_sent, offset_minutes, rejected))| {
                let host = if rejected { "bounce" } else { "x" };
                let mut r = reminder(&format!("r{i}"), &format!("u{i}@{host}.com"), NOW);
                r.status = status;
                r.email_sent = email_sent;
                r.fire_at = utc(NOW) + chrono::Duration::minutes(offset_minutes);
                r
            })
            .collect()
    })
}

#[proptest(async = tokio_ct)]
async fn run_settles_every_due_reminder_and_nothing_else(
    #[strategy(reminders_strategy())] reminders: Vec<Reminder>,
) {
    let now = utc(NOW);
    let bounced: Vec<String> = reminders
        .iter()
        .filter(|r| r.email.ends_with("@bounce.com"))
        .map(|r| r.email.clone())
        .collect();
    let bounced: Vec<&str> = bounced.iter().map(String::as_str).collect();
    let store = Arc::new(FlakyStore::with(reminders.clone()).await);
    let transport = Arc::new(RecordingTransport::rejecting(&bounced));
    let job = job(store.clone(), transport.clone(), DispatchSettings::default());

    let report = job.run(now).await.unwrap();

    let due: Vec<&Reminder> = reminders.iter().filter(|r| r.is_due(now)).collect();
    prop_assert_eq!(report.processed, due.len());
    prop_assert_eq!(report.sent + report.errors, due.len());

    for original in &reminders {
        let after = store.reminder(&original.id).await;
        if original.is_due(now) {
            prop_assert!(matches!(
                after.status,
                ReminderStatus::Sent | ReminderStatus::Failed
            ));
            prop_assert_eq!(after.email_sent, after.status == ReminderStatus::Sent);
        } else {
            prop_assert_eq!(&after, original);
        }
    }

    let again = job.run(now).await.unwrap();
    prop_assert_eq!(again.processed, 0);
}
