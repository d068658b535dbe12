use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use mirador_api::{ConsoleApi, ConsoleResult, HttpApi};
use mirador_core::{ConsoleConfig, FieldSet, ListId, ViewId};
use mirador_session::{
    AlertTone, CreateQueueForm, NullPresenter, Presenter, PublishForm, SendMessageForm, Session, SubscriptionForm, Surface,
};
use mirador_store::{BannerSlot, BannerState, BeginEdit, RenderOp};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "miradorctl", version, about = "Mirador console CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Console backend base URL (default: MIRADOR_URL or http://localhost:9340)
    #[arg(long = "url", env = "MIRADOR_URL", global = true)]
    url: Option<String>,

    /// How long one-shot commands wait for the backend, in milliseconds
    #[arg(long = "wait-ms", global = true, default_value_t = 10_000)]
    wait_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow a view live and print render operations (+ insert, ~ update, - remove)
    Watch {
        /// View name: dashboard, ess-queue-ess (queues) or ess-enn-ess (pubsub)
        view: ViewId,
    },
    /// Queue actions
    Queues {
        #[command(subcommand)]
        cmd: QueueCmd,
    },
    /// Topic actions
    Topics {
        #[command(subcommand)]
        cmd: TopicCmd,
    },
    /// Subscription actions
    Subscriptions {
        #[command(subcommand)]
        cmd: SubscriptionCmd,
    },
    /// Print the download URL of a service's configuration export
    Export {
        service: String,
    },
}

#[derive(Subcommand, Debug)]
enum QueueCmd {
    /// Create a queue, optionally FIFO and with a dead-letter queue
    Create {
        name: String,
        #[arg(long = "fifo", action = ArgAction::SetTrue)]
        fifo: bool,
        #[arg(long = "dlq", action = ArgAction::SetTrue)]
        dlq: bool,
        #[arg(long = "dlq-max-receive-count")]
        dlq_max_receive_count: Option<String>,
        #[arg(long = "visibility-timeout")]
        visibility_timeout: Option<String>,
        #[arg(long = "retention-period")]
        retention_period: Option<String>,
        #[arg(long = "max-message-size")]
        max_message_size: Option<String>,
        #[arg(long = "delay-seconds")]
        delay_seconds: Option<String>,
        #[arg(long = "wait-time-seconds")]
        wait_time_seconds: Option<String>,
    },
    /// Send one message
    Send {
        queue_url: String,
        body: String,
        /// Required for FIFO queues
        #[arg(long = "group-id", default_value = "")]
        group_id: String,
        #[arg(long = "dedup-id", default_value = "")]
        dedup_id: String,
    },
    Purge { queue_url: String },
    Delete { queue_url: String },
    /// Move messages from a dead-letter queue back to its source
    Redrive { queue_url: String },
    /// Edit attributes, e.g. --set VisibilityTimeout=60
    SetAttributes {
        queue_url: String,
        #[arg(long = "set", value_parser = parse_pair, required = true)]
        set: Vec<(String, String)>,
    },
    /// Show attributes and the first messages without consuming them
    Peek { queue_url: String },
}

#[derive(Subcommand, Debug)]
enum TopicCmd {
    Create { name: String },
    Delete { topic_arn: String },
    Publish {
        topic_arn: String,
        message: String,
        #[arg(long = "subject", default_value = "")]
        subject: String,
    },
}

#[derive(Subcommand, Debug)]
enum SubscriptionCmd {
    Create {
        topic_arn: String,
        /// http or ess-queue-ess
        protocol: String,
        endpoint: String,
        #[arg(long = "auto-confirm", action = ArgAction::SetTrue)]
        auto_confirm: bool,
    },
    Delete { subscription_arn: String },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected Name=Value, got {s}")),
    }
}

fn init_tracing() {
    let env = std::env::var("MIRADOR_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MIRADOR_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid MIRADOR_METRICS_ADDR; expected host:port");
        }
    }
}

/// Prints what `watch` sees: one line per render op, alert and stream change.
struct PrintPresenter {
    output: Output,
}

fn render_fields(fields: &FieldSet) -> String {
    fields.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(" ")
}

impl Presenter for PrintPresenter {
    fn present(&mut self, surface: Surface<'_>) {
        match (self.output, surface) {
            (Output::Json, Surface::Plan { list, plan }) => {
                for op in &plan.ops {
                    println!("{}", serde_json::json!({ "list": list, "render": op }));
                }
            }
            (Output::Json, Surface::Alert(Some(a))) => println!("{}", serde_json::json!({ "alert": a })),
            (Output::Json, Surface::Stream { view, status }) => {
                println!("{}", serde_json::json!({ "view": view, "stream": status }))
            }
            (Output::Human, Surface::View(view)) => println!("== {view}"),
            (Output::Human, Surface::Plan { list, plan }) => {
                for op in &plan.ops {
                    match op {
                        RenderOp::Insert { key, fields } => println!("+ {list} {key} {}", render_fields(fields)),
                        RenderOp::Update { key, changed } => println!("~ {list} {key} {}", render_fields(changed)),
                        RenderOp::Remove { key } => println!("- {list} {key}"),
                        RenderOp::Mode { key, mode } => {
                            println!("* {list} {key} expanded={} editing={}", mode.expanded, mode.editing)
                        }
                    }
                }
            }
            (Output::Human, Surface::Alert(Some(a))) => match a.tone {
                AlertTone::Info => println!("! {}", a.message),
                AlertTone::Error => println!("! error: {}", a.message),
            },
            (Output::Human, Surface::Stream { view, status }) => println!("# stream {}", status.label(view)),
            _ => {}
        }
    }
}

/// Apply session messages until `done` holds or `limit` passes. Returns
/// whether `done` held.
async fn wait_until(session: &mut Session, limit: Duration, done: impl Fn(&Session) -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while !done(session) {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        match tokio::time::timeout(deadline - now, session.step()).await {
            Ok(true) => {}
            _ => return done(session),
        }
    }
    true
}

fn failed_alert(session: &Session) -> Option<String> {
    session.alert().filter(|a| a.tone == AlertTone::Error).map(|a| a.message.clone())
}

/// Mount `view` and wait for its first snapshot.
async fn mount(session: &mut Session, view: ViewId, limit: Duration) -> Result<(), String> {
    session.switch_view(view);
    let t0 = Instant::now();
    let loaded = wait_until(session, limit, |s| s.latest(view).is_some() || failed_alert(s).is_some()).await;
    if let Some(message) = failed_alert(session) {
        return Err(message);
    }
    if !loaded {
        return Err(format!("timed out loading {view}"));
    }
    info!(view = %view, took_ms = %t0.elapsed().as_millis(), "snapshot loaded");
    Ok(())
}

/// Run one action whose outcome lands on the global alert.
async fn alert_action<F>(session: &mut Session, view: ViewId, limit: Duration, act: F) -> Result<String, String>
where
    F: FnOnce(&mut Session) -> ConsoleResult<()>,
{
    mount(session, view, limit).await?;
    act(session).map_err(|e| e.to_string())?;
    if !wait_until(session, limit, |s| s.alert().is_some()).await {
        return Err("timed out waiting for the backend".into());
    }
    match session.alert() {
        Some(a) if a.tone == AlertTone::Info => Ok(a.message.clone()),
        Some(a) => Err(a.message.clone()),
        None => Err("no result".into()),
    }
}

fn attributes_banner(session: &Session, key: &str) -> Option<(BannerState, String)> {
    session
        .banner(ListId::Queues, key, BannerSlot::Attributes)
        .map(|b| (b.state, b.message.clone()))
}

fn settled(banner: Option<(BannerState, String)>) -> bool {
    matches!(banner, Some((BannerState::Success | BannerState::Error, _)))
}

/// Redrive reports on the queue's attribute banner rather than the alert.
async fn redrive(session: &mut Session, key: &str, limit: Duration) -> Result<String, String> {
    mount(session, ViewId::Queues, limit).await?;
    session.start_redrive(key).map_err(|e| e.to_string())?;
    wait_until(session, limit, |s| settled(attributes_banner(s, key)) || s.alert().is_some()).await;
    match (attributes_banner(session, key), session.alert()) {
        (Some((BannerState::Success, m)), _) => Ok(m),
        (Some((BannerState::Error, m)), _) => Err(m),
        (_, Some(a)) if a.tone == AlertTone::Info => Ok(a.message.clone()),
        (_, Some(a)) => Err(a.message.clone()),
        _ => Err("timed out waiting for the backend".into()),
    }
}

/// Drive the edit session the way the attribute panel does: begin, fill the
/// draft, save, and wait for the backend's verdict.
async fn set_attributes(session: &mut Session, key: &str, set: &[(String, String)], limit: Duration) -> Result<String, String> {
    mount(session, ViewId::Queues, limit).await?;
    match session.begin_edit(key).map_err(|e| e.to_string())? {
        BeginEdit::Started | BeginEdit::AlreadyEditing => {}
        BeginEdit::NeedsFetch | BeginEdit::Waiting => {
            let editing = |s: &Session| s.overlay(ListId::Queues).map(|o| o.is_editing(key)).unwrap_or(false);
            wait_until(session, limit, |s| {
                editing(s) || matches!(attributes_banner(s, key), Some((BannerState::Error, _)))
            })
            .await;
            if !editing(session) {
                return Err(attributes_banner(session, key).map(|(_, m)| m).unwrap_or_else(|| "timed out loading attributes".into()));
            }
        }
    }
    for (name, value) in set {
        session.set_draft(key, name, value.clone()).map_err(|e| e.to_string())?;
    }
    session.submit_edit(key).map_err(|e| e.to_string())?;
    let in_flight = |s: &Session| {
        s.overlay(ListId::Queues).and_then(|o| o.edit_session(key)).map(|e| e.in_flight()).unwrap_or(false)
    };
    if !wait_until(session, limit, |s| !in_flight(s)).await {
        return Err("timed out waiting for the backend".into());
    }
    match attributes_banner(session, key) {
        Some((BannerState::Error, m)) => Err(m),
        Some((_, m)) => Ok(m),
        None => Ok("Queue attributes saved.".into()),
    }
}

async fn peek(session: &mut Session, key: &str, output: Output, limit: Duration) -> Result<String, String> {
    mount(session, ViewId::Queues, limit).await?;
    session.toggle(ListId::Queues, key).map_err(|e| e.to_string())?;
    let peek_banner = |s: &Session| s.banner(ListId::Queues, key, BannerSlot::Peek).map(|b| (b.state, b.message.clone()));
    wait_until(session, limit, |s| settled(peek_banner(s)) && settled(attributes_banner(s, key))).await;
    if let Some((BannerState::Error, m)) = peek_banner(session) {
        return Err(m);
    }
    let entry = session.overlay(ListId::Queues).and_then(|o| o.get(key));
    let attributes = entry.and_then(|e| e.attributes.clone()).unwrap_or_default();
    let messages = entry.and_then(|e| e.peek.clone()).unwrap_or_default();
    match output {
        Output::Human => {
            for (name, value) in attributes.display_rows() {
                println!("{name:<36} {value}");
            }
            for (name, value) in attributes.unknown() {
                println!("{name:<36} {value}");
            }
            println!("MESSAGE ID                             RECEIVES  BODY");
            for m in &messages {
                println!("{:<38} {:<9} {}", m.message_id, m.receive_count, m.body);
            }
        }
        Output::Json => {
            let doc = serde_json::json!({ "attributes": attributes, "messages": messages });
            println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_default());
        }
    }
    Ok(format!("{} messages", messages.len()))
}

fn report(what: &str, output: Output, outcome: &Result<String, String>) {
    match (output, outcome) {
        (Output::Human, Ok(m)) => println!("{m}"),
        (Output::Human, Err(e)) => eprintln!("{what} error: {e}"),
        (Output::Json, Ok(m)) => println!("{}", serde_json::json!({ "ok": true, "message": m })),
        (Output::Json, Err(e)) => println!("{}", serde_json::json!({ "ok": false, "message": e })),
    }
}

fn optional(raw: Option<String>, default: String) -> String {
    raw.unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut cfg = ConsoleConfig::from_env();
    if let Some(url) = cli.url.as_deref() {
        cfg = cfg.with_base_url(url);
    }
    let api = Arc::new(HttpApi::new(cfg.clone())?);
    let limit = Duration::from_millis(cli.wait_ms);

    let (what, outcome) = match cli.command {
        Commands::Watch { view } => {
            info!(view = %view, url = %cfg.base_url, "watch invoked");
            let mut session = Session::new(api, cfg, Box::new(PrintPresenter { output: cli.output }));
            session.switch_view(view);
            loop {
                tokio::select! {
                    more = session.step() => {
                        if !more {
                            warn!("session channels closed; exiting watch loop");
                            break;
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down watch loop");
                        break;
                    }
                }
            }
            session.shutdown();
            return Ok(());
        }
        Commands::Export { service } => {
            info!(service = %service, "export invoked");
            let url = api.export_url(&service);
            match cli.output {
                Output::Human => println!("{url}"),
                Output::Json => println!("{}", serde_json::json!({ "service": service, "url": url })),
            }
            return Ok(());
        }
        Commands::Queues { cmd } => {
            let mut session = Session::new(api, cfg, Box::new(NullPresenter));
            let res = match cmd {
                QueueCmd::Create {
                    name,
                    fifo,
                    dlq,
                    dlq_max_receive_count,
                    visibility_timeout,
                    retention_period,
                    max_message_size,
                    delay_seconds,
                    wait_time_seconds,
                } => {
                    info!(name = %name, fifo, dlq, "queues create invoked");
                    let d = CreateQueueForm::named(name);
                    let form = CreateQueueForm {
                        fifo,
                        with_dlq: dlq,
                        dlq_max_receive_count: optional(dlq_max_receive_count, d.dlq_max_receive_count.clone()),
                        visibility_timeout: optional(visibility_timeout, d.visibility_timeout.clone()),
                        message_retention_period: optional(retention_period, d.message_retention_period.clone()),
                        maximum_message_size: optional(max_message_size, d.maximum_message_size.clone()),
                        delay_seconds: optional(delay_seconds, d.delay_seconds.clone()),
                        receive_message_wait_time_seconds: optional(wait_time_seconds, d.receive_message_wait_time_seconds.clone()),
                        ..d
                    };
                    alert_action(&mut session, ViewId::Queues, limit, |s| s.create_queue(&form)).await
                }
                QueueCmd::Send { queue_url, body, group_id, dedup_id } => {
                    info!(queue = %queue_url, "queues send invoked");
                    let form = SendMessageForm { body, group_id, dedup_id };
                    alert_action(&mut session, ViewId::Queues, limit, |s| s.send_message(&queue_url, &form)).await
                }
                QueueCmd::Purge { queue_url } => {
                    info!(queue = %queue_url, "queues purge invoked");
                    alert_action(&mut session, ViewId::Queues, limit, |s| s.purge_queue(&queue_url)).await
                }
                QueueCmd::Delete { queue_url } => {
                    info!(queue = %queue_url, "queues delete invoked");
                    alert_action(&mut session, ViewId::Queues, limit, |s| s.delete_queue(&queue_url)).await
                }
                QueueCmd::Redrive { queue_url } => {
                    info!(queue = %queue_url, "queues redrive invoked");
                    redrive(&mut session, &queue_url, limit).await
                }
                QueueCmd::SetAttributes { queue_url, set } => {
                    info!(queue = %queue_url, fields = set.len(), "queues set-attributes invoked");
                    set_attributes(&mut session, &queue_url, &set, limit).await
                }
                QueueCmd::Peek { queue_url } => {
                    info!(queue = %queue_url, "queues peek invoked");
                    peek(&mut session, &queue_url, cli.output, limit).await
                }
            };
            session.shutdown();
            ("queues", res)
        }
        Commands::Topics { cmd } => {
            let mut session = Session::new(api, cfg, Box::new(NullPresenter));
            let res = match cmd {
                TopicCmd::Create { name } => {
                    info!(name = %name, "topics create invoked");
                    alert_action(&mut session, ViewId::PubSub, limit, |s| s.create_topic(&name)).await
                }
                TopicCmd::Delete { topic_arn } => {
                    info!(topic = %topic_arn, "topics delete invoked");
                    alert_action(&mut session, ViewId::PubSub, limit, |s| s.delete_topic(&topic_arn)).await
                }
                TopicCmd::Publish { topic_arn, message, subject } => {
                    info!(topic = %topic_arn, "topics publish invoked");
                    let form = PublishForm { topic_arn, subject, message };
                    alert_action(&mut session, ViewId::PubSub, limit, |s| s.publish(&form)).await
                }
            };
            session.shutdown();
            ("topics", res)
        }
        Commands::Subscriptions { cmd } => {
            let mut session = Session::new(api, cfg, Box::new(NullPresenter));
            let res = match cmd {
                SubscriptionCmd::Create { topic_arn, protocol, endpoint, auto_confirm } => {
                    info!(topic = %topic_arn, protocol = %protocol, "subscriptions create invoked");
                    let form = SubscriptionForm { topic_arn, protocol, endpoint, auto_confirm };
                    alert_action(&mut session, ViewId::PubSub, limit, |s| s.create_subscription(&form)).await
                }
                SubscriptionCmd::Delete { subscription_arn } => {
                    info!(subscription = %subscription_arn, "subscriptions delete invoked");
                    alert_action(&mut session, ViewId::PubSub, limit, |s| s.delete_subscription(&subscription_arn)).await
                }
            };
            session.shutdown();
            ("subscriptions", res)
        }
    };

    report(what, cli.output, &outcome);
    if let Err(e) = &outcome {
        error!(command = what, error = %e, "command failed");
        std::process::exit(1);
    }
    Ok(())
}
