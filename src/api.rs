use std::sync::Arc;

use axum::{
    extract::State,
    response::{Json, Redirect},
    routing::{get, post},
    Form, Router,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::handlers::{AnalyticsCounter, IntakeHandler, ReconciliationJob};
use crate::models::OrderForm;

pub const INTAKE_SUCCESS_MESSAGE: &str = "Your order has been received! A confirmation email will be \
    sent to you as soon as we verify your payment.";
pub const INTAKE_ERROR_MESSAGE: &str = "Something went wrong… We couldn't process your order. Please \
    try again later or contact the event staff. Thank you for your understanding!";

#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakeHandler>,
    pub reconciliation: Arc<ReconciliationJob>,
    pub analytics: Arc<AnalyticsCounter>,
    /// Serializes mutating invocations; overlapping reconciliation or
    /// analytics triggers would otherwise race on read-then-write rows.
    pub write_lock: Arc<Mutex<()>>,
    /// Absolute base for browser-facing redirects off the QR landing path.
    pub public_base_url: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub success: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(submit_order))
        .route("/api/check-payments", get(check_payments))
        .route("/api/qrcode", post(record_qr_view))
        .route("/qrcode", get(qr_view_redirect))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub fn encode_redirect(path: &str, kind: &str, message: &str) -> String {
    format!("{path}?{kind}={}", utf8_percent_encode(message, NON_ALPHANUMERIC))
}

/// Intake never surfaces an error status: either outcome becomes an
/// encoded message on the landing-page redirect.
pub async fn submit_order(State(state): State<AppState>, Form(form): Form<OrderForm>) -> Redirect {
    match state.intake.submit(form).await {
        Ok(_) => Redirect::to(&encode_redirect("/", "success", INTAKE_SUCCESS_MESSAGE)),
        Err(e) => {
            tracing::error!("Failed to record order: {}", e);
            Redirect::to(&encode_redirect("/", "error", INTAKE_ERROR_MESSAGE))
        }
    }
}

pub async fn check_payments(State(state): State<AppState>) -> Result<Json<CheckResponse>, AppError> {
    let _guard = state.write_lock.lock().await;
    let report = state.reconciliation.run().await.map_err(|e| {
        tracing::error!("Reconciliation run failed: {}", e);
        e
    })?;
    Ok(Json(CheckResponse {
        success: true,
        message: format!("Check completed, {} orders notified", report.notified),
    }))
}

pub async fn record_qr_view(State(state): State<AppState>) -> Result<Json<AnalyticsResponse>, AppError> {
    let _guard = state.write_lock.lock().await;
    state.analytics.record_view().await.map_err(|e| {
        tracing::error!("Failed to record QR view: {}", e);
        e
    })?;
    Ok(Json(AnalyticsResponse { success: true }))
}

pub fn landing_url(public_base_url: &str) -> String {
    format!("{}/", public_base_url.trim_end_matches('/'))
}

/// Browser-facing QR landing path: bump the counter, then send the
/// visitor to the order form either way.
pub async fn qr_view_redirect(State(state): State<AppState>) -> Redirect {
    let _guard = state.write_lock.lock().await;
    if let Err(e) = state.analytics.record_view().await {
        tracing::error!("Failed to record QR view: {}", e);
    }
    Redirect::to(&landing_url(&state.public_base_url))
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::testing::RecordingMailer;
    use crate::models::{OrderRecord, PaymentStatus};
    use crate::sheets::testing::{MemoryAnalyticsStore, MemoryOrderStore};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        orders: Arc<MemoryOrderStore>,
        mailer: Arc<RecordingMailer>,
    }

    fn test_app(orders: Vec<OrderRecord>, mailer: RecordingMailer) -> TestApp {
        let store = Arc::new(MemoryOrderStore::with_orders(orders));
        let analytics = Arc::new(MemoryAnalyticsStore::default());
        let mailer = Arc::new(mailer);
        let state = AppState {
            intake: Arc::new(IntakeHandler::new(store.clone())),
            reconciliation: Arc::new(ReconciliationJob::new(store.clone(), mailer.clone())),
            analytics: Arc::new(AnalyticsCounter::new(analytics, chrono_tz::America::Los_Angeles)),
            write_lock: Arc::new(Mutex::new(())),
            public_base_url: "http://localhost:3001".to_string(),
        };
        TestApp {
            router: create_router(state),
            orders: store,
            mailer,
        }
    }

    fn paid_order(order_id: &str, email: &str) -> OrderRecord {
        OrderRecord {
            name: "Ada".to_string(),
            email: email.to_string(),
            phone: "310-555-0100".to_string(),
            quantities: [2, 0, 1, 0],
            total: 12.0,
            notified: false,
            payment_status: PaymentStatus::Paid,
            order_id: order_id.to_string(),
        }
    }

    fn order_form_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/orders")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn order_submission_redirects_with_encoded_success_message() {
        let app = test_app(Vec::new(), RecordingMailer::default());

        let response = app
            .router
            .oneshot(order_form_request(
                "name=Ada&email=ada%40example.com&phone=310-555-0100&cheeseRoll=2&guavaStrudel=1",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/?success="), "location {location:?}");
        assert!(!location.contains(' '));

        let rows = app.orders.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantities, [2, 0, 1, 0]);
        assert_eq!(rows[0].total, 12.0);
    }

    #[tokio::test]
    async fn order_submission_redirects_with_error_when_store_is_down() {
        let app = test_app(Vec::new(), RecordingMailer::default());
        app.orders.fail.store(true, Ordering::SeqCst);

        let response = app
            .router
            .oneshot(order_form_request("name=Ada&email=ada%40example.com&phone=310-555-0100"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/?error="), "location {location:?}");
    }

    #[tokio::test]
    async fn check_payments_reports_notified_count() {
        let app = test_app(
            vec![paid_order("BBB222", "due@example.com")],
            RecordingMailer::default(),
        );

        let response = app
            .router
            .oneshot(Request::builder().uri("/api/check-payments").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
        assert!(body["message"].as_str().unwrap().contains("1 orders notified"));
        assert_eq!(app.mailer.sent_mail().len(), 1);
    }

    #[tokio::test]
    async fn check_payments_surfaces_transport_verification_failure() {
        let app = test_app(
            vec![paid_order("BBB222", "due@example.com")],
            RecordingMailer::failing_verify(),
        );

        let response = app
            .router
            .oneshot(Request::builder().uri("/api/check-payments").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("verify"));
        assert!(app.mailer.sent_mail().is_empty());
    }

    #[tokio::test]
    async fn qr_view_records_and_redirects_to_public_landing_page() {
        let app = test_app(Vec::new(), RecordingMailer::default());

        let response = app
            .router
            .oneshot(Request::builder().uri("/qrcode").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "http://localhost:3001/");
    }

    #[test]
    fn landing_url_normalizes_trailing_slash() {
        assert_eq!(landing_url("https://orders.example.com"), "https://orders.example.com/");
        assert_eq!(landing_url("https://orders.example.com/"), "https://orders.example.com/");
    }

    #[tokio::test]
    async fn analytics_endpoint_returns_success_json() {
        let app = test_app(Vec::new(), RecordingMailer::default());

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/qrcode")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn health_check_responds_ok() {
        let app = test_app(Vec::new(), RecordingMailer::default());

        let response = app
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn redirect_messages_are_percent_encoded() {
        let encoded = encode_redirect("/", "success", "All good / done!");
        assert_eq!(encoded, "/?success=All%20good%20%2F%20done%21");
    }
}
