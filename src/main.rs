use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use callbridge::classifier::{HttpAnalyticsClient, OutcomeClassifier};
use callbridge::config::Config;
use callbridge::crm::HttpCrmClient;
use callbridge::dedupe::DedupeCache;
use callbridge::event::EventType;
use callbridge::handlers::Pipeline;
use callbridge::outbound::{HttpAutomationClient, SheetsSink};
use callbridge::queue::{QueueConfig, SyncQueue, run_dispatcher};
use callbridge::tracker::AttemptTracker;
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct AppState {
    pipeline: Pipeline,
    queue: Arc<SyncQueue>,
    bind_addr: String,
    dispatcher_alive: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let config = Config::from_env().context("load callbridge config")?;

    let analytics =
        Arc::new(HttpAnalyticsClient::from_config(&config).context("initialize analytics client")?);
    let crm = Arc::new(HttpCrmClient::from_config(&config).context("initialize crm client")?);
    let automation = Arc::new(
        HttpAutomationClient::from_config(&config).context("initialize automation client")?,
    );
    let sheets = Arc::new(SheetsSink::from_config(&config).context("initialize sheets sink")?);

    let queue = SyncQueue::new(QueueConfig::from_config(&config));
    let dispatcher_alive = Arc::new(AtomicBool::new(true));
    let dispatcher_alive_for_task = dispatcher_alive.clone();
    let dispatcher_queue = queue.clone();
    let dispatcher_handle = tokio::spawn(async move {
        run_dispatcher(dispatcher_queue, sheets).await;
        dispatcher_alive_for_task.store(false, Ordering::SeqCst);
    });

    let state = Arc::new(AppState {
        pipeline: Pipeline {
            dedupe: DedupeCache::new(config.dedup_ttl_seconds),
            classifier: OutcomeClassifier::new(analytics),
            tracker: AttemptTracker::new(crm),
            automation,
            queue: queue.clone(),
        },
        queue,
        bind_addr: config.bind_addr.clone(),
        dispatcher_alive,
    });

    let app = Router::new()
        .route("/webhook/call-started", post(call_started_handler))
        .route("/webhook/call-ended", post(call_ended_handler))
        .route("/webhook/{event_type}", post(auxiliary_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/queue/stats", get(queue_stats))
        .layer(DefaultBodyLimit::max(config.max_payload_bytes))
        .with_state(state.clone());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;

    info!(bind = %config.bind_addr, "callbridge listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    server.await.context("serve callbridge")?;

    drop(state);
    dispatcher_handle.abort();
    let _ = dispatcher_handle.await;

    Ok(())
}

async fn call_started_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let response = state
        .pipeline
        .handle_call_started(payload, epoch_seconds())
        .await;
    (response.status, Json(response.body))
}

async fn call_ended_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let response = state
        .pipeline
        .handle_call_ended(payload, epoch_seconds())
        .await;
    (response.status, Json(response.body))
}

async fn auxiliary_handler(
    State(state): State<Arc<AppState>>,
    Path(event_type_path): Path<String>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let event_type = match EventType::from_str(&event_type_path) {
        Ok(EventType::CallStarted) | Ok(EventType::CallEnded) | Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"success": false, "error": "unknown event type"})),
            );
        }
        Ok(event_type) => event_type,
    };

    let response = state
        .pipeline
        .handle_auxiliary(event_type, payload, epoch_seconds())
        .await;
    (response.status, Json(response.body))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.dispatcher_alive.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status":"not_ready","reason":"sync dispatcher not running"})),
        );
    }

    let stats = state.queue.stats();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "bind": state.bind_addr,
            "version": env!("CARGO_PKG_VERSION"),
            "queueHealthy": stats.healthy,
            "queueDepth": stats.depth,
        })),
    )
}

async fn queue_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.queue.stats();
    (StatusCode::OK, Json(json!({"success": true, "queue": stats})))
}

fn epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
