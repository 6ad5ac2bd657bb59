use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use vitals_core::models::{
    ActionResult, DailyHealthRecord, Goals, HealthObservation, Platform, WidgetSnapshot,
    parse_record_date, validate_goals,
};
use vitals_core::service::HealthService;
use vitals_core::source::select_source;

use crate::bridge::{PayloadBridge, sniff_platform};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB
const DEFAULT_HISTORY_DAYS: i64 = 7;

#[derive(Clone)]
struct AppState {
    svc: Arc<Mutex<HealthService>>,
    api_key: Option<String>,
}

impl AppState {
    fn svc(&self) -> MutexGuard<'_, HealthService> {
        self.svc.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct ObservationRequest {
    date: Option<String>,
    #[serde(flatten)]
    observation: HealthObservation,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum AdjustAction {
    Add,
    Remove,
}

fn one() -> i64 {
    1
}

#[derive(Deserialize)]
struct WaterRequest {
    action: AdjustAction,
    #[serde(default = "one")]
    glasses: i64,
}

#[derive(Deserialize)]
struct MindfulnessRequest {
    action: AdjustAction,
    #[serde(default = "one")]
    minutes: i64,
}

/// `samples` is the raw HealthKit / Health Connect export array. Without it
/// the sync writes a heartbeat.
#[derive(Deserialize)]
struct SyncRequest {
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    samples: Option<serde_json::Value>,
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct HistoryQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Serialize)]
struct StreakResponse {
    streak: i64,
}

#[derive(Serialize)]
struct PingResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn bad_date(raw: &str) -> impl FnOnce(anyhow::Error) -> ApiError + '_ {
    move |_| ApiError::BadRequest(format!("Invalid date '{raw}'. Use YYYY-MM-DD"))
}

/// `success: false` maps to 422 with the envelope as the body.
fn envelope<T: Serialize>(result: &ActionResult<T>) -> Response {
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(result)).into_response()
}

fn positive(n: i64, what: &str) -> Result<i64, ApiError> {
    if n <= 0 {
        return Err(ApiError::BadRequest(format!(
            "{what} must be greater than 0"
        )));
    }
    Ok(n)
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_today(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<DailyHealthRecord>, ApiError> {
    let record = state.svc().get_today(&user).context("database error")?;
    record
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No record for today".to_string()))
}

async fn get_day(
    State(state): State<AppState>,
    Path((user, date_str)): Path<(String, String)>,
) -> Result<Json<DailyHealthRecord>, ApiError> {
    let date = parse_record_date(&date_str).map_err(bad_date(&date_str))?;
    let record = state
        .svc()
        .get_record(&user, date)
        .context("database error")?;
    record
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No record for {date_str}")))
}

async fn delete_day(
    State(state): State<AppState>,
    Path((user, date_str)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let date = parse_record_date(&date_str).map_err(bad_date(&date_str))?;
    let deleted = state
        .svc()
        .delete_record(&user, date)
        .context("database error")?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("No record for {date_str}")))
    }
}

async fn get_history(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<DailyHealthRecord>>, ApiError> {
    let end = match params.end.as_deref() {
        Some(s) => parse_record_date(s).map_err(bad_date(s))?,
        None => Local::now().date_naive(),
    };
    let start = match params.start.as_deref() {
        Some(s) => parse_record_date(s).map_err(bad_date(s))?,
        None => end - chrono::Duration::days(DEFAULT_HISTORY_DAYS - 1),
    };
    if start > end {
        return Err(ApiError::BadRequest(format!(
            "start ({start}) must not be after end ({end})"
        )));
    }

    let records = state
        .svc()
        .get_history(&user, start, end)
        .context("database error")?;
    Ok(Json(records))
}

async fn get_latest(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<DailyHealthRecord>, ApiError> {
    let record = state.svc().get_latest(&user).context("database error")?;
    record
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No records for user '{user}'")))
}

async fn post_observation(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<ObservationRequest>,
) -> Result<Response, ApiError> {
    let date: Option<NaiveDate> = req
        .date
        .as_deref()
        .map(|d| parse_record_date(d).map_err(bad_date(d)))
        .transpose()?;
    if req.observation.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one metric must be provided".to_string(),
        ));
    }

    let result = state
        .svc()
        .record_observation(&user, date, &req.observation);
    Ok(envelope(&result))
}

async fn adjust_water(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<WaterRequest>,
) -> Result<Response, ApiError> {
    let glasses = positive(req.glasses, "glasses")?;
    let svc = state.svc();
    let result = match req.action {
        AdjustAction::Add => svc.add_water_glasses(&user, glasses),
        AdjustAction::Remove => svc.remove_water_glasses(&user, glasses),
    };
    Ok(envelope(&result))
}

async fn adjust_mindfulness(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<MindfulnessRequest>,
) -> Result<Response, ApiError> {
    let minutes = positive(req.minutes, "minutes")?;
    let svc = state.svc();
    let result = match req.action {
        AdjustAction::Add => svc.add_mindfulness_minutes(&user, minutes),
        AdjustAction::Remove => svc.remove_mindfulness_minutes(&user, minutes),
    };
    Ok(envelope(&result))
}

async fn sync(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Json(req): Json<SyncRequest>,
) -> Result<Response, ApiError> {
    let source = match req.samples {
        Some(samples) => {
            let payload = samples.to_string();
            let platform = match req.platform.as_deref() {
                Some(p) => p
                    .parse::<Platform>()
                    .map_err(|e| ApiError::BadRequest(format!("{e}")))?,
                None => sniff_platform(&payload).ok_or_else(|| {
                    ApiError::BadRequest(
                        "Could not tell which platform the samples came from. Set \"platform\""
                            .to_string(),
                    )
                })?,
            };
            Some(select_source(
                platform,
                Box::new(PayloadBridge::new(payload)),
            ))
        }
        None => None,
    };

    let result = state
        .svc()
        .sync_health_data(&user, source.as_deref(), req.force);
    Ok(envelope(&result))
}

async fn get_streak(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<StreakResponse>, ApiError> {
    let streak = state
        .svc()
        .get_sync_streak(&user, Local::now().date_naive())
        .context("database error")?;
    Ok(Json(StreakResponse { streak }))
}

async fn get_widget(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<WidgetSnapshot>, ApiError> {
    let snapshot = state
        .svc()
        .get_widget_snapshot(&user)
        .context("database error")?;
    Ok(Json(snapshot))
}

async fn get_goals(State(state): State<AppState>) -> Result<Json<Goals>, ApiError> {
    let goals = state.svc().get_goals().context("database error")?;
    Ok(Json(goals))
}

async fn set_goals(
    State(state): State<AppState>,
    Json(goals): Json<Goals>,
) -> Result<Json<Goals>, ApiError> {
    validate_goals(&goals).map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    let saved = state.svc().set_goals(&goals).context("database error")?;
    Ok(Json(saved))
}

async fn reset_goals(State(state): State<AppState>) -> Result<Json<Goals>, ApiError> {
    let goals = state.svc().reset_goals().context("database error")?;
    Ok(Json(goals))
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/health/{user}/today", get(get_today))
        .route(
            "/api/health/{user}/days/{date}",
            get(get_day).delete(delete_day),
        )
        .route("/api/health/{user}/history", get(get_history))
        .route("/api/health/{user}/latest", get(get_latest))
        .route("/api/health/{user}/observations", post(post_observation))
        .route("/api/health/{user}/water", post(adjust_water))
        .route("/api/health/{user}/mindfulness", post(adjust_mindfulness))
        .route("/api/health/{user}/sync", post(sync))
        .route("/api/health/{user}/streak", get(get_streak))
        .route("/api/health/{user}/widget", get(get_widget))
        .route(
            "/api/goals",
            get(get_goals).put(set_goals).delete(reset_goals),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/api/ping", get(ping))
        .merge(api)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    svc: HealthService,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    new_api_key: bool,
) -> anyhow::Result<()> {
    let state = AppState {
        svc: Arc::new(Mutex::new(svc)),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    match api_key.as_deref() {
        Some(key) if new_api_key => {
            eprintln!("Generated new API key: {key}");
            eprintln!("Include in requests: Authorization: Bearer {key}");
        }
        Some(key) if key.len() > 8 => {
            eprintln!(
                "API key: {}...{} (see api_key file in data directory)",
                &key[..4],
                &key[key.len() - 4..],
            );
        }
        Some(_) => eprintln!("API key: see api_key file in data directory"),
        None => {
            eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
        }
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        eprintln!(
            "Warning: Listening on {bind} with no authentication. Any device on your network can access this API."
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
