//! Router construction and server startup.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{AgentRef, WalletReportAgent};
use crate::config::Config;
use crate::jobs::{create_job_store, JobStoreRef};
use crate::kupo::KupoClient;
use crate::monitor::PaymentMonitor;
use crate::payment::{MasumiPaymentClient, PaymentServiceRef, RetryPolicy};
use crate::pricing::Pricing;
use crate::runner::JobRunner;

use super::jobs;
use super::types::HealthResponse;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Job persistence
    pub store: JobStoreRef,
    /// Masumi payment service
    pub payments: PaymentServiceRef,
    pub pricing: Pricing,
    /// The agent executing paid jobs
    pub agent: AgentRef,
}

/// Build the HTTP router over the given state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start_job", post(jobs::start_job))
        .route("/status", get(jobs::job_status))
        .route("/availability", get(jobs::availability))
        .route("/input_schema", get(jobs::input_schema))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and the payment monitor.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = create_job_store(
        config.job_store,
        config.data_dir.clone(),
        &config.payment.agent_identifier,
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to open job store: {}", e))?;

    let payments: PaymentServiceRef = Arc::new(MasumiPaymentClient::new(&config.payment)?);
    // The monitor polls again on its next tick, so its lookups never retry.
    let monitor_payments: PaymentServiceRef = Arc::new(MasumiPaymentClient::with_retry_policy(
        &config.payment,
        RetryPolicy::none(),
    )?);
    let agent: AgentRef = Arc::new(WalletReportAgent::new(KupoClient::new(
        config.kupo_url.clone(),
        config.kupo_timeout,
    )?));

    let runner = Arc::new(JobRunner::new(
        Arc::clone(&store),
        Arc::clone(&payments),
        Arc::clone(&agent),
        config.max_concurrent_jobs,
        config.agent_timeout,
    ));

    // Jobs that were executing when the previous process died never finish.
    match runner.recover_interrupted().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Marked {} interrupted jobs as failed", n),
        Err(e) => tracing::warn!("Failed to recover interrupted jobs: {}", e),
    }

    let cancel = CancellationToken::new();
    let monitor = Arc::new(PaymentMonitor::new(
        Arc::clone(&store),
        monitor_payments,
        runner,
        config.payment.poll_interval,
    ));
    let monitor_handle = monitor.spawn(cancel.clone());

    let state = Arc::new(AppState {
        pricing: Pricing::fixed(config.job_price_lovelace),
        config: config.clone(),
        store,
        payments,
        agent,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        "Agent {} listening on {} ({} network)",
        config.payment.agent_identifier,
        addr,
        config.payment.network.as_str()
    );

    let shutdown = cancel.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), monitor_handle)
        .await
        .is_err()
    {
        tracing::warn!("Payment monitor did not stop in time");
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping payment monitor...");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        agent: state.agent.name().to_string(),
        store_persistent: state.store.is_persistent(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobStore, JobStatus, JobStore};
    use crate::test_support::{test_address, test_config, FakeAgent, FakePayments};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Harness {
        store: Arc<InMemoryJobStore>,
        payments: Arc<FakePayments>,
        app: Router,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryJobStore::new());
        let payments = Arc::new(FakePayments::new());
        let config = test_config();
        let state = Arc::new(AppState {
            pricing: Pricing::fixed(config.job_price_lovelace),
            config,
            store: store.clone(),
            payments: payments.clone(),
            agent: Arc::new(FakeAgent::succeeding("report")),
        });
        Harness {
            store,
            payments,
            app: router(state),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn start_job(addresses: &[String]) -> Request<Body> {
        post_json("/start_job", json!({ "input": { "addresses": addresses } }))
    }

    #[tokio::test]
    async fn start_job_creates_payment_and_job() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            start_job(&[format!(" {} ", test_address(0)), test_address(1)]),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "success");
        assert_eq!(body["blockchainIdentifier"], "bc-1");
        assert_eq!(body["agentIdentifier"], "agent-test");
        assert_eq!(body["sellerVkey"], "vkey-test");
        assert_eq!(body["Amounts"][0]["unit"], "lovelace");
        assert_eq!(body["Amounts"][0]["amount"], "10000000");
        assert_eq!(body["identifierFromPurchaser"].as_str().unwrap().len(), 25);

        let requests = h.payments.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(body["inputHash"], requests[0].input_hash.as_str());

        let job_id: uuid::Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
        let job = h.store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::AwaitingPayment);
        assert_eq!(job.input.addresses, vec![test_address(0), test_address(1)]);
        assert_eq!(job.blockchain_identifier, "bc-1");
    }

    #[tokio::test]
    async fn start_job_keeps_purchaser_identifier() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            post_json(
                "/start_job",
                json!({ "input": { "addresses": [test_address(0)] }, "identifier_from_purchaser": "order-42" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["identifierFromPurchaser"], "order-42");
        assert_eq!(h.payments.requests()[0].identifier_from_purchaser, "order-42");
    }

    #[tokio::test]
    async fn start_job_rejects_bad_input() {
        let h = harness();

        let (status, body) = send(&h.app, post_json("/start_job", json!({ "input": {} }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "At least one address must be provided");

        let (status, body) = send(&h.app, start_job(&["  ".to_string(), String::new()])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "At least one address must be provided");

        let (status, _) = send(
            &h.app,
            post_json(
                "/start_job",
                json!({ "input": { "addresses": [test_address(0)] }, "identifier_from_purchaser": "x".repeat(26) }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let malformed = Request::builder()
            .method("POST")
            .uri("/start_job")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&h.app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(h.payments.requests().is_empty());
    }

    #[tokio::test]
    async fn start_job_accepts_exactly_the_address_limit() {
        let h = harness();
        let limit: Vec<String> = (0..3).map(test_address).collect();
        let (status, _) = send(&h.app, start_job(&limit)).await;
        assert_eq!(status, StatusCode::CREATED);

        let over: Vec<String> = (0..4).map(test_address).collect();
        let (status, body) = send(&h.app, start_job(&over)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "At most 3 addresses may be provided");
        assert_eq!(h.payments.requests().len(), 1);
    }

    #[tokio::test]
    async fn start_job_rejects_strings_that_are_not_addresses() {
        let h = harness();
        for bad in ["*", "x/../../health", "addr1", "stake1uxyz"] {
            let (status, body) = send(&h.app, start_job(&[test_address(0), bad.to_string()])).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", bad);
            assert_eq!(body["error"], format!("Not a Cardano address: {}", bad));
        }
        assert!(h.payments.requests().is_empty());
    }

    #[tokio::test]
    async fn purchaser_identifier_length_counts_characters() {
        let h = harness();
        let umlauts = "ü".repeat(13);
        let (status, body) = send(
            &h.app,
            post_json(
                "/start_job",
                json!({ "input": { "addresses": [test_address(0)] }, "identifier_from_purchaser": umlauts }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["identifierFromPurchaser"], umlauts);

        let (status, _) = send(
            &h.app,
            post_json(
                "/start_job",
                json!({ "input": { "addresses": [test_address(0)] }, "identifier_from_purchaser": "ü".repeat(26) }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_job_reports_payment_service_failure() {
        let h = harness();
        h.payments.fail_requests();

        let (status, body) = send(&h.app, start_job(&[test_address(0)])).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("Payment service error"));
        assert!(h
            .store
            .jobs_with_status(JobStatus::AwaitingPayment)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn status_reports_job_progress() {
        let h = harness();
        let job = h
            .store
            .create_job(crate::jobs::tests::new_job(&["addr1"]))
            .await
            .unwrap();

        let (status, body) = send(&h.app, get_request(&format!("/status?job_id={}", job.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "awaiting_payment");
        assert_eq!(body["payment_status"], "pending");
        assert!(body["result"].is_null());

        h.store.mark_running(job.id).await.unwrap();
        h.store
            .complete_job(job.id, "done", "hash", crate::jobs::PaymentStatus::Completed)
            .await
            .unwrap();

        let (_, body) = send(&h.app, get_request(&format!("/status?job_id={}", job.id))).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["payment_status"], "completed");
        assert_eq!(body["result"], "done");
    }

    #[tokio::test]
    async fn status_rejects_unknown_or_invalid_ids() {
        let h = harness();

        let (status, body) = send(&h.app, get_request("/status")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid job_id");

        let (status, _) = send(&h.app, get_request("/status?job_id=not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            send(&h.app, get_request(&format!("/status?job_id={}", uuid::Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Job not found");
    }

    #[tokio::test]
    async fn availability_schema_and_health() {
        let h = harness();

        let (status, body) = send(&h.app, get_request("/availability")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "available");
        assert_eq!(body["type"], "masumi-agent");

        let (status, body) = send(&h.app, get_request("/input_schema")).await;
        assert_eq!(status, StatusCode::OK);
        let field = &body["input_data"][0];
        assert_eq!(field["id"], "addresses");
        assert_eq!(field["validations"][1]["validation"], "max");
        assert_eq!(field["validations"][1]["value"], "3");

        let (status, body) = send(&h.app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["agent"], "fake");
        assert_eq!(body["store_persistent"], false);
    }

    #[tokio::test]
    async fn started_job_is_visible_to_monitor_queries() {
        let h = harness();
        let (_, body) = send(&h.app, start_job(&[test_address(0)])).await;

        let waiting = h
            .store
            .jobs_with_status(JobStatus::AwaitingPayment)
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id.to_string(), body["job_id"].as_str().unwrap());
    }
}
