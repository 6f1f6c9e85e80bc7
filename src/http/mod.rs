mod dto;
mod error;
mod handlers;

pub use dto::Data;
pub use error::{ApiError, ApiResult};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequest, FromRequestParts, MatchedPath, Query, Request};
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, put};
use axum::{Json, Router};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::observability::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub api_token: Arc<str>,
    /// Used for staff created without an explicit timezone.
    pub default_timezone: Tz,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, api_token: &str, default_timezone: Tz) -> Self {
        Self {
            engine,
            api_token: Arc::from(api_token),
            default_timezone,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/appointments/available-slots", get(handlers::available_slots))
        .route(
            "/appointments",
            get(handlers::list_appointments).post(handlers::create_appointment),
        )
        .route("/appointments/{id}", get(handlers::get_appointment))
        .route(
            "/appointments/{id}/status",
            patch(handlers::update_appointment_status),
        )
        .route("/staff", get(handlers::list_staff).post(handlers::create_staff))
        .route(
            "/staff/{id}",
            get(handlers::get_staff).put(handlers::update_staff),
        )
        .route("/staff/{id}/schedules", get(handlers::list_schedules))
        .route(
            "/staff/{id}/schedules/{day_of_week}",
            put(handlers::put_schedule),
        )
        .route("/staff/{id}/events", get(handlers::staff_events))
        .route(
            "/services",
            get(handlers::list_services).post(handlers::create_service),
        )
        .route("/services/{id}", put(handlers::update_service));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// RED metrics per matched route.
async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = request.method().to_string();

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(elapsed);
    response
}

/// `Json` whose rejection uses the API error envelope.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(JsonBody(value))
    }
}

/// `Query` whose rejection uses the API error envelope.
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(QueryParams(value))
    }
}
