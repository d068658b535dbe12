#![forbid(unsafe_code)]

use mirador_core::{AttributeMap, QueueSummary, SubscriptionSummary, TopicSummary};
use mirador_store::{reconcile, ListState, OverlayStore, RenderOp, RowMode};

fn queue(name: &str, visible: u64) -> QueueSummary {
    QueueSummary {
        queue_name: name.to_string(),
        queue_url: format!("http://localhost:9324/000000000000/{name}"),
        visible_count: visible,
        queue_id: name.to_string(),
        ..Default::default()
    }
}

fn url(name: &str) -> String { format!("http://localhost:9324/000000000000/{name}") }

fn list() -> ListState { ListState::new(OverlayStore::detached()) }

#[test]
fn second_pass_is_empty() {
    let mut st = list();
    let snap = vec![queue("a", 1), queue("b", 2), queue("c", 3)];
    let first = st.sync(&snap);
    assert_eq!(first.counts().inserts, 3);
    let second = st.sync(&snap);
    assert!(second.is_empty(), "unexpected ops: {:?}", second.ops);
}

#[test]
fn same_inputs_same_plan() {
    let mut st = list();
    st.sync(&[queue("a", 1), queue("b", 2)]);
    st.overlay.toggle(&url("b"));
    let next = vec![queue("c", 0), queue("b", 9), queue("a", 1), queue("c", 4)];
    let p1 = reconcile(&st.rendered, &next, &st.overlay);
    let p2 = reconcile(&st.rendered, &next, &st.overlay);
    assert_eq!(p1, p2);
}

#[test]
fn counters_change_yields_single_update_per_frame() {
    let mut st = list();
    st.sync(&[queue("orders", 3)]);
    let plan = st.sync(&[queue("orders", 5)]);
    assert_eq!(plan.len(), 1);
    match &plan.ops[0] {
        RenderOp::Update { key, changed } => {
            assert_eq!(key, &url("orders"));
            assert_eq!(changed.len(), 1);
            assert_eq!(changed[0], ("visible".to_string(), "5".to_string()));
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[test]
fn expanded_survives_refresh_and_is_reaped_on_vanish() {
    let mut st = list();
    st.sync(&[queue("a", 0), queue("b", 0)]);
    assert!(st.overlay.toggle(&url("a")));
    let op = st.refresh_mode(&url("a"));
    assert_eq!(op, Some(RenderOp::Mode { key: url("a"), mode: RowMode { expanded: true, editing: false } }));

    st.sync(&[queue("a", 4), queue("b", 1)]);
    assert!(st.overlay.is_expanded(&url("a")));
    assert!(st.rendered.get(&url("a")).unwrap().mode.expanded);

    st.sync(&[queue("b", 1)]);
    assert!(st.overlay.get(&url("a")).is_none());
    assert!(!st.rendered.contains(&url("a")));
}

#[test]
fn reinserted_key_gets_overlay_mode_reapplied() {
    let mut st = list();
    // Expanded before its row exists (e.g. restored from a previous visit).
    st.overlay.toggle(&url("a"));
    let plan = st.sync(&[queue("a", 0)]);
    assert!(matches!(plan.ops[0], RenderOp::Insert { .. }));
    assert!(matches!(plan.ops[1], RenderOp::Mode { mode: RowMode { expanded: true, .. }, .. }));
    assert!(st.rendered.get(&url("a")).unwrap().mode.expanded);
}

#[test]
fn snapshot_never_touches_edit_draft() {
    let mut st = list();
    st.sync(&[queue("a", 0)]);
    let mut attrs = AttributeMap::new();
    for r in mirador_core::ATTRIBUTE_RANGES.iter() {
        attrs.insert(r.name, r.default.to_string());
    }
    let seq = st.overlay.issue_attributes_fetch(&url("a"));
    st.overlay.store_attributes(&url("a"), seq, attrs.clone());
    st.overlay.begin_edit(&url("a"));
    st.overlay.set_draft(&url("a"), "DelaySeconds", "12").unwrap();

    st.sync(&[queue("a", 8)]);
    let mut fresh = attrs;
    fresh.insert("DelaySeconds", "0");
    st.overlay.store_attributes(&url("a"), 0, fresh);

    let draft = st.overlay.edit_session(&url("a")).unwrap().draft().clone();
    assert_eq!(draft["DelaySeconds"], "12");
    assert!(st.rendered.get(&url("a")).unwrap().mode.editing);
}

#[test]
fn topics_and_subscriptions_reconcile_independently() {
    let mut topics = list();
    let mut subs = list();
    let t = TopicSummary { topic_arn: "arn:t1".into(), display_name: "t1".into(), subscription_count: 1, ..Default::default() };
    let s = SubscriptionSummary { subscription_arn: "arn:t1:s1".into(), topic_arn: "arn:t1".into(), protocol: "http".into(), ..Default::default() };
    topics.sync(&[t.clone()]);
    subs.sync(&[s]);
    let bumped = TopicSummary { subscription_count: 0, ..t };
    assert_eq!(topics.sync(&[bumped]).counts().updates, 1);
    assert_eq!(subs.sync::<SubscriptionSummary>(&[]).counts().removes, 1);
}
