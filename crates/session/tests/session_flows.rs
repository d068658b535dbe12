use std::sync::{Arc, Mutex};
use std::time::Duration;

use mirador_api::{ConsoleApi, ConsoleError, MockApi, SseEvent, StreamEvent};
use mirador_core::{ConsoleConfig, ListId, Snapshot, ViewId};
use mirador_session::{
    AlertTone, CreateQueueForm, Presenter, SendMessageForm, Session, StreamStatus, Surface, UiUpdate,
};
use mirador_store::{BannerSlot, BeginEdit, EditPhase, RenderOp};

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn plans(&self, list: ListId) -> Vec<String> {
        let prefix = format!("plan {list} ");
        self.lines().into_iter().filter_map(|l| l.strip_prefix(&prefix).map(str::to_string)).collect()
    }
}

fn op_str(op: &RenderOp) -> String {
    match op {
        RenderOp::Insert { key, .. } => format!("insert:{key}"),
        RenderOp::Update { key, changed } => {
            let names: Vec<&str> = changed.iter().map(|(k, _)| k.as_str()).collect();
            format!("update:{key}:{}", names.join("+"))
        }
        RenderOp::Remove { key } => format!("remove:{key}"),
        RenderOp::Mode { key, mode } => format!("mode:{key}:{}{}", mode.expanded as u8, mode.editing as u8),
    }
}

impl Presenter for Recorder {
    fn present(&mut self, surface: Surface<'_>) {
        let line = match surface {
            Surface::View(v) => format!("view {v}"),
            Surface::Plan { list, plan } => {
                format!("plan {list} {}", plan.ops.iter().map(op_str).collect::<Vec<_>>().join(","))
            }
            Surface::Alert(a) => format!("alert {}", a.map(|a| a.message.as_str()).unwrap_or("")),
            Surface::Stream { view, status } => format!("stream {}", status.label(view)),
            Surface::Banner { key, slot, banner, .. } => {
                format!("banner {key} {slot:?} {}", banner.map(|b| b.message.as_str()).unwrap_or("-"))
            }
            Surface::Attributes { key, edit, .. } => format!("attributes {key} editing={}", edit.is_some()),
            Surface::Peek { key, messages } => format!("peek {key} {}", messages.len()),
        };
        self.0.lock().unwrap().push(line);
    }
}

const QUIET: Duration = Duration::from_millis(50);

async fn mounted(mock: &Arc<MockApi>, view: ViewId) -> (Session, Recorder) {
    let rec = Recorder::default();
    let api: Arc<dyn ConsoleApi> = mock.clone();
    let mut s = Session::new(api, ConsoleConfig::default(), Box::new(rec.clone()));
    s.switch_view(view);
    s.settle(QUIET).await;
    (s, rec)
}

fn state_frame(data: String) -> StreamEvent {
    StreamEvent::Message(SseEvent { event: "state".into(), data, id: None })
}

#[tokio::test]
async fn fifo_queue_send_without_group_never_reaches_backend() {
    let mock = Arc::new(MockApi::new());
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;

    let mut form = CreateQueueForm::named("orders.fifo");
    form.fifo = true;
    s.create_queue(&form).unwrap();
    s.settle(QUIET).await;

    let alert = s.alert().unwrap();
    assert_eq!((alert.tone, alert.message.as_str()), (AlertTone::Info, "Queue created: orders.fifo"));
    let key = s.rendered(ListId::Queues).unwrap().rows()[0].key.clone();
    match s.latest(ViewId::Queues) {
        Some(Snapshot::Queues(q)) => assert!(q.queues.iter().any(|q| q.queue_url == key && q.is_fifo)),
        other => panic!("unexpected snapshot {other:?}"),
    }

    mock.clear_calls();
    let err = s.send_message(&key, &SendMessageForm::body("hello")).unwrap_err();
    assert_eq!(err, ConsoleError::Validation("Message Group ID is required for FIFO queues".into()));
    assert_eq!(s.alert().unwrap().message, "Message Group ID is required for FIFO queues");
    s.settle(QUIET).await;
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn out_of_range_attribute_is_rejected_locally() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;

    assert!(s.toggle(ListId::Queues, &url).unwrap());
    s.settle(QUIET).await;
    assert_eq!(s.begin_edit(&url).unwrap(), BeginEdit::Started);
    s.set_draft(&url, "VisibilityTimeout", "50000").unwrap();

    mock.clear_calls();
    let err = s.submit_edit(&url).unwrap_err();
    assert_eq!(err.to_string(), "VisibilityTimeout must be between 0 and 43200");
    s.settle(QUIET).await;
    assert!(mock.calls().is_empty());

    let session = s.overlay(ListId::Queues).unwrap().edit_session(&url).unwrap();
    assert_eq!(session.phase(), EditPhase::Editing);
    assert_eq!(session.draft()["VisibilityTimeout"], "50000");
    let banner = s.banner(ListId::Queues, &url, BannerSlot::Attributes).unwrap();
    assert_eq!(banner.message, "VisibilityTimeout must be between 0 and 43200");
}

#[tokio::test]
async fn frame_for_previous_view_is_dropped() {
    let mock = Arc::new(MockApi::new());
    mock.add_queue("a", false);
    let (mut s, rec) = mounted(&mock, ViewId::Queues).await;
    let old = s.token();

    s.switch_view(ViewId::Dashboard);
    s.settle(QUIET).await;
    let before = rec.lines().len();

    let frame = serde_json::to_string(&mock.queue_snapshot()).unwrap();
    s.handle(UiUpdate::Stream { token: old, event: state_frame(frame) });
    s.handle(UiUpdate::SnapshotFailed { token: old, message: "late failure".into() });

    assert!(s.rendered(ListId::Queues).unwrap().is_empty());
    assert!(s.alert().is_none());
    assert_eq!(rec.lines().len(), before);
}

#[tokio::test]
async fn remount_of_same_view_rejects_earlier_generation() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("a", false);
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;
    let old = s.token();
    s.switch_view(ViewId::Queues);
    s.settle(QUIET).await;

    mock.set_counts(&url, 9, 0, 0);
    let frame = serde_json::to_string(&mock.queue_snapshot()).unwrap();
    s.handle(UiUpdate::Stream { token: old, event: state_frame(frame) });
    assert_eq!(s.rendered(ListId::Queues).unwrap().get(&url).unwrap().field("visible"), Some("0"));
}

#[tokio::test]
async fn one_subscription_survives_many_switches() {
    let mock = Arc::new(MockApi::new());
    let (mut s, rec) = mounted(&mock, ViewId::Queues).await;
    s.switch_view(ViewId::PubSub);
    s.switch_view(ViewId::Dashboard);
    s.switch_view(ViewId::Queues);
    s.settle(QUIET).await;

    assert_eq!(mock.active_streams(), vec![ViewId::Queues]);
    assert_eq!(s.stream_status(), StreamStatus::Connected);
    assert!(rec.lines().contains(&"stream connected (ess-queue-ess)".to_string()));
}

#[tokio::test]
async fn malformed_frame_alerts_and_stream_keeps_going() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("a", false);
    let (mut s, rec) = mounted(&mock, ViewId::Queues).await;

    assert_eq!(mock.push_raw(ViewId::Queues, "{not json"), 1);
    s.settle(QUIET).await;
    let alert = s.alert().unwrap();
    assert_eq!(alert.tone, AlertTone::Error);
    assert!(alert.message.starts_with("Failed to parse stream data:"));

    mock.set_counts(&url, 3, 0, 0);
    assert_eq!(mock.push_state(ViewId::Queues), 1);
    s.settle(QUIET).await;
    mock.set_counts(&url, 5, 0, 0);
    assert_eq!(mock.push_state(ViewId::Queues), 1);
    s.settle(QUIET).await;

    assert_eq!(s.rendered(ListId::Queues).unwrap().get(&url).unwrap().field("visible"), Some("5"));
    let plans = rec.plans(ListId::Queues);
    assert_eq!(plans[plans.len() - 2..], [format!("update:{url}:visible"), format!("update:{url}:visible")]);
}

#[tokio::test(start_paused = true)]
async fn save_is_optimistic_then_confirmed_by_refetch() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    mock.set_attribute_adjuster(|m| {
        m.insert("VisibilityTimeout", "61");
    });
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;
    s.toggle(ListId::Queues, &url).unwrap();
    s.settle(QUIET).await;

    mock.set_latency("/attributes", Duration::from_millis(500));
    s.toggle_edit(&url).unwrap();
    s.set_draft(&url, "VisibilityTimeout", "60").unwrap();
    s.toggle_edit(&url).unwrap();

    let in_flight = ConsoleError::Validation("attribute update already in flight".into());
    assert_eq!(s.submit_edit(&url).unwrap_err(), in_flight);
    assert_eq!(s.cancel_edit(&url).unwrap_err(), in_flight);
    assert_eq!(s.set_draft(&url, "DelaySeconds", "5").unwrap_err(), in_flight);

    s.settle(QUIET).await;
    let ov = s.overlay(ListId::Queues).unwrap();
    assert!(!ov.is_editing(&url));
    assert_eq!(ov.attributes(&url).unwrap().get("VisibilityTimeout"), Some("60"));
    assert_eq!(s.banner(ListId::Queues, &url, BannerSlot::Attributes).unwrap().message, "Queue attributes saved.");
    assert_eq!(mock.calls_to("update-attributes").len(), 1);

    s.settle(Duration::from_millis(1000)).await;
    let ov = s.overlay(ListId::Queues).unwrap();
    assert_eq!(ov.attributes(&url).unwrap().get("VisibilityTimeout"), Some("61"));
    assert_eq!(s.banner(ListId::Queues, &url, BannerSlot::Attributes).unwrap().message, "Queue attributes saved.");
}

#[tokio::test]
async fn refresh_during_edit_waits_for_cancel() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;

    // no cache yet: editing starts once the fetch lands
    assert_eq!(s.begin_edit(&url).unwrap(), BeginEdit::NeedsFetch);
    s.settle(QUIET).await;
    assert!(s.overlay(ListId::Queues).unwrap().is_editing(&url));

    mock.set_attribute("jobs", "DelaySeconds", "7");
    s.refresh_attributes(&url).unwrap();
    s.settle(QUIET).await;
    let ov = s.overlay(ListId::Queues).unwrap();
    assert_eq!(ov.edit_session(&url).unwrap().draft()["DelaySeconds"], "0");
    assert_eq!(ov.attributes(&url).unwrap().get("DelaySeconds"), Some("0"));

    s.cancel_edit(&url).unwrap();
    assert_eq!(s.overlay(ListId::Queues).unwrap().attributes(&url).unwrap().get("DelaySeconds"), Some("7"));
}

#[tokio::test(start_paused = true)]
async fn banners_hide_after_delay_and_die_with_the_view() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;

    s.toggle(ListId::Queues, &url).unwrap();
    s.settle(QUIET).await;
    assert_eq!(s.banner(ListId::Queues, &url, BannerSlot::Attributes).unwrap().message, "Attributes updated.");
    s.settle(Duration::from_millis(4000)).await;
    assert!(s.banner(ListId::Queues, &url, BannerSlot::Attributes).is_none());
    assert!(s.banner(ListId::Queues, &url, BannerSlot::Peek).is_none());

    s.refresh_peek(&url).unwrap();
    s.settle(QUIET).await;
    assert_eq!(s.overlay(ListId::Queues).unwrap().pending_hides(), 1);
    s.switch_view(ViewId::Dashboard);
    assert_eq!(s.overlay(ListId::Queues).unwrap().pending_hides(), 0);
}

#[tokio::test]
async fn expansion_survives_switching_away_and_back() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    let (mut s, rec) = mounted(&mock, ViewId::Queues).await;
    s.toggle(ListId::Queues, &url).unwrap();
    s.settle(QUIET).await;

    s.switch_view(ViewId::Dashboard);
    s.settle(QUIET).await;
    assert!(s.rendered(ListId::Queues).unwrap().is_empty());
    s.switch_view(ViewId::Queues);
    s.settle(QUIET).await;

    let row = s.rendered(ListId::Queues).unwrap().get(&url).unwrap();
    assert!(row.mode.expanded);
    let last = rec.plans(ListId::Queues).pop().unwrap();
    assert_eq!(last, format!("insert:{url},mode:{url}:10"));
}

#[tokio::test]
async fn backend_errors_are_shown_verbatim() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    mock.fail("purge-queue", 502, "purge already in progress");
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;

    s.purge_queue(&url).unwrap();
    s.settle(QUIET).await;
    let alert = s.alert().unwrap();
    assert_eq!((alert.tone, alert.message.as_str()), (AlertTone::Error, "purge already in progress"));
}

#[tokio::test]
async fn redrive_reports_on_the_queue_banner() {
    let mock = Arc::new(MockApi::new());
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;
    let mut form = CreateQueueForm::named("orders");
    form.with_dlq = true;
    s.create_queue(&form).unwrap();
    s.settle(QUIET).await;
    assert_eq!(s.alert().unwrap().message, "Queue created: orders (with DLQ)");

    let keys: Vec<String> = s.rendered(ListId::Queues).unwrap().keys().map(str::to_string).collect();
    let (src, dlq) = (keys[0].clone(), keys[1].clone());
    assert!(dlq.ends_with("orders-dlq"));

    let err = s.start_redrive(&src).unwrap_err();
    assert!(matches!(err, ConsoleError::Validation(_)));

    s.toggle(ListId::Queues, &dlq).unwrap();
    s.settle(QUIET).await;
    mock.clear_calls();
    s.start_redrive(&dlq).unwrap();
    s.settle(QUIET).await;
    assert_eq!(s.banner(ListId::Queues, &dlq, BannerSlot::Attributes).unwrap().message, "Redrive task started.");
    assert_eq!(mock.calls_to("start-redrive").len(), 1);
    assert_eq!(mock.calls_to("orders-dlq/attributes").len(), 1);
}

fn stream_lines(rec: &Recorder) -> Vec<String> {
    rec.lines().into_iter().filter(|l| l.starts_with("stream ")).collect()
}

#[tokio::test(start_paused = true)]
async fn failed_subscribe_recovers_without_switching_views() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    mock.fail("events?view=ess-queue-ess", 503, "stream unavailable");
    let (mut s, rec) = mounted(&mock, ViewId::Queues).await;

    assert_eq!(s.stream_status(), StreamStatus::Retrying);
    assert!(mock.active_streams().is_empty());
    assert!(s.rendered(ListId::Queues).unwrap().contains(&url));

    mock.clear_failures();
    s.settle(Duration::from_millis(4000)).await;
    assert_eq!(s.stream_status(), StreamStatus::Connected);
    assert_eq!(mock.active_streams(), vec![ViewId::Queues]);
    assert_eq!(mock.calls_to("events?view=ess-queue-ess").len(), 2);
    assert_eq!(
        stream_lines(&rec),
        [
            "stream connecting (ess-queue-ess)",
            "stream retrying (ess-queue-ess)",
            "stream connecting (ess-queue-ess)",
            "stream connected (ess-queue-ess)",
        ]
    );

    mock.set_counts(&url, 4, 0, 0);
    assert_eq!(mock.push_state(ViewId::Queues), 1);
    s.settle(QUIET).await;
    assert_eq!(s.rendered(ListId::Queues).unwrap().get(&url).unwrap().field("visible"), Some("4"));
}

#[tokio::test]
async fn stream_error_shows_retrying_until_the_transport_reopens() {
    let mock = Arc::new(MockApi::new());
    let (mut s, rec) = mounted(&mock, ViewId::Queues).await;
    assert_eq!(s.stream_status(), StreamStatus::Connected);

    assert_eq!(mock.push_stream_error(ViewId::Queues, "connection reset"), 1);
    s.settle(QUIET).await;
    assert_eq!(s.stream_status(), StreamStatus::Retrying);

    assert_eq!(mock.push_stream_event(ViewId::Queues, StreamEvent::Connecting), 1);
    s.settle(QUIET).await;
    assert_eq!(s.stream_status(), StreamStatus::Connecting);

    assert_eq!(mock.push_stream_event(ViewId::Queues, StreamEvent::Open), 1);
    s.settle(QUIET).await;
    assert_eq!(s.stream_status(), StreamStatus::Connected);

    let lines = stream_lines(&rec);
    assert_eq!(
        lines[lines.len() - 4..],
        [
            "stream connected (ess-queue-ess)",
            "stream retrying (ess-queue-ess)",
            "stream connecting (ess-queue-ess)",
            "stream connected (ess-queue-ess)",
        ]
    );
    // transport trouble is a status, not an alert
    assert!(s.alert().is_none());
}

#[tokio::test(start_paused = true)]
async fn detail_result_for_vanished_row_is_dropped() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    let other = mock.add_queue("other", false);
    let (mut s, rec) = mounted(&mock, ViewId::Queues).await;

    mock.set_latency("/attributes", Duration::from_millis(500));
    mock.set_latency("limit=10", Duration::from_millis(500));
    assert!(s.toggle(ListId::Queues, &url).unwrap());

    let mut snap = mock.queue_snapshot();
    snap.queues.retain(|q| q.queue_url != url);
    assert_eq!(mock.push_raw(ViewId::Queues, &serde_json::to_string(&snap).unwrap()), 1);
    s.settle(QUIET).await;
    assert!(s.overlay(ListId::Queues).unwrap().get(&url).is_none());
    let removed_at = rec.lines().iter().position(|l| l.contains(&format!("remove:{url}"))).unwrap();

    s.settle(Duration::from_millis(1000)).await;
    assert_eq!(mock.calls_to("jobs/attributes").len(), 1);
    let ov = s.overlay(ListId::Queues).unwrap();
    assert!(ov.get(&url).is_none());
    assert!(ov.attributes(&url).is_none());
    assert!(s.banner(ListId::Queues, &url, BannerSlot::Attributes).is_none());
    let rendered = s.rendered(ListId::Queues).unwrap();
    assert!(!rendered.contains(&url));
    assert!(rendered.contains(&other));
    let after = &rec.lines()[removed_at + 1..];
    assert!(after.iter().all(|l| !l.contains(&url)), "late detail surfaced: {after:?}");
}

#[tokio::test]
async fn duplicate_keys_in_a_frame_keep_the_last_occurrence() {
    let mock = Arc::new(MockApi::new());
    let (mut s, rec) = mounted(&mock, ViewId::Queues).await;
    let a = mock.add_queue("a", false);
    let b = mock.add_queue("b", false);

    let mut snap = mock.queue_snapshot();
    let mut first = snap.queues[0].clone();
    first.visible_count = 1;
    let mut last = snap.queues[0].clone();
    last.visible_count = 7;
    snap.queues = vec![first, snap.queues[1].clone(), last];
    assert_eq!(mock.push_raw(ViewId::Queues, &serde_json::to_string(&snap).unwrap()), 1);
    s.settle(QUIET).await;

    let rendered = s.rendered(ListId::Queues).unwrap();
    let keys: Vec<&str> = rendered.keys().collect();
    assert_eq!(keys, [b.as_str(), a.as_str()]);
    assert_eq!(rendered.get(&a).unwrap().field("visible"), Some("7"));
    assert_eq!(rec.plans(ListId::Queues).pop().unwrap(), format!("insert:{b},insert:{a}"));
}

#[tokio::test]
async fn queue_actions_need_the_row_on_screen() {
    let mock = Arc::new(MockApi::new());
    let url = mock.add_queue("jobs", false);
    let (mut s, _rec) = mounted(&mock, ViewId::Queues).await;
    s.switch_view(ViewId::Dashboard);
    s.settle(QUIET).await;
    mock.clear_calls();

    assert!(matches!(s.purge_queue(&url), Err(ConsoleError::Validation(_))));
    assert_eq!(s.alert().unwrap().tone, AlertTone::Error);
    assert!(matches!(s.send_message(&url, &SendMessageForm::body("hi")), Err(ConsoleError::Validation(_))));
    assert!(matches!(s.delete_queue(&url), Err(ConsoleError::Validation(_))));
    assert!(matches!(s.start_redrive(&url), Err(ConsoleError::Validation(_))));
    s.settle(QUIET).await;
    assert!(mock.calls_to("purge-queue").is_empty());
    assert!(mock.calls_to("send-message").is_empty());
    assert!(mock.calls_to("delete-queue").is_empty());
    assert!(mock.calls_to("start-redrive").is_empty());

    // a queue that was never listed is rejected the same way
    s.switch_view(ViewId::Queues);
    s.settle(QUIET).await;
    assert!(matches!(s.purge_queue("http://localhost/unknown"), Err(ConsoleError::Validation(_))));
    s.purge_queue(&url).unwrap();
    s.settle(QUIET).await;
    assert_eq!(mock.calls_to("purge-queue").len(), 1);
}
