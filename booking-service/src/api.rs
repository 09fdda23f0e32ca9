use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use shared::{CancellationResult, EventStatus};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::error::BookingError;
use crate::manager::InventoryManager;
use crate::rate_limit::RateLimiter;
use crate::validation::{
    validate_booking, validate_cancellation, validate_event_initialization, BookTicketRequest,
    CancelTicketRequest, InitializeEventRequest,
};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<InventoryManager>,
    pub max_tickets: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeEventResponse {
    pub message: String,
    pub event_id: Uuid,
    pub total_tickets: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicketResponse {
    pub message: String,
    pub booking_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CancelTicketResponse {
    pub message: String,
    pub details: CancellationResult,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(summary: &str, err: &BookingError) -> Self {
        let status = match err {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::Authorization { .. } => StatusCode::FORBIDDEN,
            BookingError::Conflict { .. } => StatusCode::CONFLICT,
            BookingError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorResponse {
                error: summary.to_string(),
                details: err.to_string(),
            },
        }
    }

    fn internal(summary: &str, details: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorResponse {
                error: summary.to_string(),
                details,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Headers attached to every response.
const SECURITY_HEADERS: [(HeaderName, &str); 6] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
    (header::REFERRER_POLICY, "no-referrer"),
    (header::STRICT_TRANSPORT_SECURITY, "max-age=15552000; includeSubDomains"),
    (header::CONTENT_SECURITY_POLICY, "default-src 'self'; frame-ancestors 'self'"),
    (header::X_DNS_PREFETCH_CONTROL, "off"),
];

pub fn create_router(state: AppState, rate_limit: RateLimitConfig) -> Router {
    let mut router = Router::new()
        .route("/api/events/initialize", post(initialize_event))
        .route("/api/events/book", post(book_ticket))
        .route("/api/events/cancel", post(cancel_ticket))
        .route("/api/events/status/:event_id", get(event_status))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            RateLimiter::new(rate_limit),
            enforce_rate_limit,
        ))
        .layer(CompressionLayer::new());

    for (name, value) in SECURITY_HEADERS {
        router = router.layer(SetResponseHeaderLayer::if_not_present(
            name,
            HeaderValue::from_static(value),
        ));
    }

    router.layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Client identity for rate limiting: the peer address when the server was
/// started with connect info, else the first forwarded address.
fn client_key(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn enforce_rate_limit(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    let client = client_key(&request);
    match limiter.check_and_record(&client) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(client = %client, "Rate limit exceeded");
            let body = ErrorResponse {
                error: "Too many requests".to_string(),
                details: "Too many requests from this client, please try again later".to_string(),
            };
            let retry_after = HeaderValue::from(retry_after.as_secs().max(1));
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after)],
                Json(body),
            )
                .into_response()
        }
    }
}

/// Unwraps a JSON body, reporting malformed payloads as validation errors.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>, summary: &str) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::new(summary, &BookingError::Validation(rejection.body_text())))
}

/// Runs an operation on its own task so a dropped connection cannot abort
/// it between the store transaction and the cache refresh.
async fn detached<T, F>(summary: &'static str, operation: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, BookingError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result.map_err(|e| ApiError::new(summary, &e)),
        Err(e) => {
            tracing::error!("Operation task failed: {}", e);
            Err(ApiError::internal(summary, e.to_string()))
        }
    }
}

pub async fn initialize_event(
    State(state): State<AppState>,
    payload: Result<Json<InitializeEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InitializeEventResponse>), ApiError> {
    const SUMMARY: &str = "Invalid event initialization";
    let request = json_body(payload, SUMMARY)?;
    let valid = validate_event_initialization(&request, state.max_tickets)
        .map_err(|e| ApiError::new(SUMMARY, &e))?;

    let manager = Arc::clone(&state.manager);
    let event = detached("Failed to initialize event", async move {
        manager.create_event(&valid.name, valid.total_tickets).await
    })
    .await?;

    tracing::info!("Event initialized: {}, Tickets: {}", event.name, event.total_tickets);
    Ok((
        StatusCode::CREATED,
        Json(InitializeEventResponse {
            message: "Event successfully initialized".to_string(),
            event_id: event.id,
            total_tickets: event.total_tickets,
        }),
    ))
}

pub async fn book_ticket(
    State(state): State<AppState>,
    payload: Result<Json<BookTicketRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BookTicketResponse>), ApiError> {
    const SUMMARY: &str = "Invalid booking request";
    let request = json_body(payload, SUMMARY)?;
    let valid = validate_booking(&request).map_err(|e| ApiError::new(SUMMARY, &e))?;

    let manager = Arc::clone(&state.manager);
    let booking = detached("Failed to book ticket", async move {
        manager.book_ticket(valid.event_id, &valid.user_id).await
    })
    .await?;

    let (code, message, status) = if booking.confirmed {
        (StatusCode::OK, "Ticket successfully booked", "Confirmed")
    } else {
        (StatusCode::CREATED, "Added to waiting list", "Waiting List")
    };
    Ok((
        code,
        Json(BookTicketResponse {
            message: message.to_string(),
            booking_id: booking.booking_id,
            status: status.to_string(),
        }),
    ))
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    payload: Result<Json<CancelTicketRequest>, JsonRejection>,
) -> Result<Json<CancelTicketResponse>, ApiError> {
    const SUMMARY: &str = "Invalid cancellation request";
    let request = json_body(payload, SUMMARY)?;
    let valid = validate_cancellation(&request).map_err(|e| ApiError::new(SUMMARY, &e))?;

    let manager = Arc::clone(&state.manager);
    let details = detached("Failed to cancel ticket", async move {
        manager.cancel_ticket(valid.booking_id, &valid.user_id).await
    })
    .await?;

    let message = if details.promoted {
        "Ticket cancelled and assigned to waiting list"
    } else {
        "Ticket successfully cancelled"
    };
    Ok(Json(CancelTicketResponse {
        message: message.to_string(),
        details,
    }))
}

pub async fn event_status(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<EventStatus>, ApiError> {
    const SUMMARY: &str = "Failed to retrieve event status";
    let event_id = Uuid::parse_str(&event_id).map_err(|_| {
        ApiError::new(SUMMARY, &BookingError::Validation("Invalid event ID format".into()))
    })?;
    let status = state
        .manager
        .get_status(event_id)
        .await
        .map_err(|e| ApiError::new(SUMMARY, &e))?;
    Ok(Json(status))
}

pub async fn health_check() -> &'static str {
    "OK"
}
