use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::error_handling::HandleErrorLayer;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use tokio::sync::watch;
use tower::{limit::ConcurrencyLimitLayer, load_shed::LoadShedLayer, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{miner_api_key, session_token};
use crate::state::AppState;
use crate::{chain_api, job_api, metrics, miner_api, ws};

/// Body size cap applied to every route (spec §5 "bounded request bodies").
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Wraps the fallible tower layers (`LoadShedLayer`, `ConcurrencyLimitLayer`,
/// `TimeoutLayer`) so the resulting service is infallible — `HandleErrorLayer`
/// must sit outermost of whatever it's converting errors for.
async fn map_overloaded(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({"error": {"code": "TIMEOUT", "message": "request timed out"}})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": {"code": "OVERLOADED", "message": err.to_string()}})),
        )
    }
}

/// Resolves the caller's rate-limit bucket key for a request and records
/// per-route metrics around the inner handler (spec §5 token-bucket
/// limiter, per §4.7 default/`sendTx`/`match` buckets).
async fn rate_limit_and_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let route = req.uri().path().to_string();
    let key = bucket_key(&req);

    let limiter = if route == "/rpc/sendTx" || route == "/rpc/submitReceipt" {
        &state.limiters.send_tx
    } else if route == "/match" {
        &state.limiters.match_
    } else {
        &state.limiters.default
    };

    if !limiter.check(&key) {
        metrics::record_rate_limited(&route);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": {"code": "RATE_LIMIT", "message": "token bucket exhausted"}})),
        )
            .into_response();
    }

    let started = Instant::now();
    let response = next.run(req).await;
    metrics::record_request(&route, response.status().as_str(), started.elapsed().as_secs_f64());
    response
}

fn bucket_key(req: &Request) -> String {
    if let Ok(key) = miner_api_key(req.headers()) {
        return format!("key:{key}");
    }
    if let Ok(token) = session_token(req.headers()) {
        return format!("session:{token}");
    }
    if let Some(auth) = req.headers().get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = auth.to_str() {
            return format!("bearer:{s}");
        }
    }
    "anonymous".to_string()
}

async fn metrics_handler() -> impl IntoResponse {
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::render())
}

/// Builds the CORS layer from a configured allow-list. An empty list
/// disables cross-origin access entirely rather than falling back to a
/// permissive default — `CORS_ALLOWED_ORIGINS` is an exact origin list,
/// never a wildcard, in every deployment role.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(tower_http::cors::Any)
}

/// Assembles the full `/rpc/*`, `/jobs/*`, `/miner/*`, `/match`, and
/// `/stream/*` surface (spec §4.7) over one `AppState`. Which routes
/// actually do useful work depends on which fields of `state` the calling
/// binary populated — an unpopulated `job_engine`/`mempool` turns its
/// routes into a uniform `AppError::Dependency`, it does not change the
/// router's shape.
///
/// `allowed_origins` feeds `CORS_ALLOWED_ORIGINS`; pass an empty slice to
/// run with no cross-origin access.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    metrics::install_rpc_metrics();

    Router::new()
        .route("/rpc/sendTx", post(chain_api::send_tx))
        .route("/rpc/submitReceipt", post(chain_api::submit_receipt))
        .route("/rpc/getHead", get(chain_api::get_head))
        .route("/rpc/getBlock/:id", get(chain_api::get_block))
        .route("/rpc/getBalance/:addr", get(chain_api::get_balance))
        .route("/rpc/getTx/:hash", get(chain_api::get_tx))
        .route("/jobs", post(job_api::submit_job))
        .route("/jobs/:id", get(job_api::get_job))
        .route("/jobs/:id/receipt", get(job_api::get_job_receipt))
        .route("/jobs/:id/cancel", post(job_api::cancel_job))
        .route("/miner/register", post(miner_api::register))
        .route("/miner/heartbeat", post(miner_api::heartbeat))
        .route("/miner/poll", post(miner_api::poll))
        .route("/miner/result", post(miner_api::submit_result))
        .route("/miner/failure", post(miner_api::report_failure))
        .route("/match", post(miner_api::find_match))
        .route("/stream/:topic", get(ws::stream))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_and_metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(map_overloaded))
                .layer(LoadShedLayer::new())
                .layer(ConcurrencyLimitLayer::new(512))
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors_layer(allowed_origins))
}

/// Serves `router` on `addr` until `shutdown_rx` fires (spec §5
/// "independent processes").
pub async fn serve(router: Router, addr: SocketAddr, mut shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "RPC server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
            tracing::info!("RPC server shutting down gracefully");
        })
        .await?;

    Ok(())
}
