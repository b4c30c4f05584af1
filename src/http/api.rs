use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use bigdecimal::BigDecimal;
use serde::Deserialize;

use crate::http::AppState;
use crate::traits::{ClearanceStorage, LedgerReader};
use crate::types::{ClearanceError, FeeSchedule, IdentityChange, NewUser};

pub fn router<S, L>() -> Router<AppState<S, L>>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    Router::new()
        .route("/accounts/register", post(register::<S, L>))
        .route("/profile/check-receipts", post(check_receipts::<S, L>))
        .route("/profile/get-profile", post(get_profile::<S, L>))
        .route("/admin/identity", put(update_identity::<S, L>))
        .route("/admin/fees", put(update_fees::<S, L>))
        .route("/admin/grant", post(grant_clearance::<S, L>))
        .route("/admin/users", get(list_users::<S, L>))
        .route("/admin/profiles", get(list_profiles::<S, L>))
        .route("/admin/clearances", get(list_clearances::<S, L>))
        .route("/admin/used-receipts", get(list_used_receipts::<S, L>))
}

#[derive(Debug)]
enum ApiError {
    Clearance(ClearanceError),
    Invalid(String),
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::Invalid(msg.into())
    }
}

impl From<ClearanceError> for ApiError {
    fn from(err: ClearanceError) -> Self {
        ApiError::Clearance(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::bad_request(err.body_text())
    }
}

fn status_for(err: &ClearanceError) -> StatusCode {
    match err {
        ClearanceError::Validation(_) => StatusCode::BAD_REQUEST,
        ClearanceError::ProfileNotFound(_) | ClearanceError::UserNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ClearanceError::Conflict(_) => StatusCode::CONFLICT,
        ClearanceError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ClearanceError::CommitFailed(_)
        | ClearanceError::Storage(_)
        | ClearanceError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Clearance(err) => {
                let status = status_for(&err);
                let message = match &err {
                    // Receipts were valid; a retry could report them as already used
                    ClearanceError::CommitFailed(_) => {
                        "Payment was verified but could not be recorded. Please contact an administrator instead of resubmitting.".to_string()
                    }
                    other => other.to_string(),
                };
                if status.is_server_error() {
                    tracing::error!(code = err.code(), error = %err, "request failed");
                }
                (status, err.code(), message)
            }
            ApiError::Invalid(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
        };
        let body = serde_json::json!({
            "success": false,
            "code": code,
            "message": message,
            "details": [],
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckReceiptsRequest {
    #[serde(default)]
    receipt_ids: Vec<String>,
    #[serde(default)]
    user_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: String,
    username: String,
    password: String,
    #[serde(default)]
    matricule: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsernameRequest {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRequest {
    #[serde(default)]
    old_email: String,
    #[serde(default)]
    old_username: String,
    #[serde(default)]
    new_email: String,
    #[serde(default)]
    new_username: String,
}

#[derive(Debug, Deserialize)]
struct FeesRequest {
    username: String,
    school_fee_due: BigDecimal,
    penalty_fee: BigDecimal,
    excess_fee: BigDecimal,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

fn data(value: impl serde::Serialize) -> Result<Json<serde_json::Value>, ApiError> {
    let value = serde_json::to_value(value)
        .map_err(|e| ClearanceError::Storage(format!("encode response: {e}")))?;
    Ok(Json(serde_json::json!({ "success": true, "data": value })))
}

async fn register<S, L>(
    State(state): State<AppState<S, L>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    let Json(request) = payload?;
    let mut new_user = NewUser::new(&request.email, &request.username, &request.password);
    if let Some(matricule) = request.matricule.as_deref().filter(|m| !m.trim().is_empty()) {
        new_user = new_user.with_matricule(matricule);
    }
    let (_, profile) = state.registrar.register(new_user).await?;
    Ok((StatusCode::CREATED, data(profile)?))
}

async fn check_receipts<S, L>(
    State(state): State<AppState<S, L>>,
    payload: Result<Json<CheckReceiptsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    let Json(request) = payload?;
    let report = state
        .engine
        .reconcile(&request.user_name, &request.receipt_ids)
        .await?;
    Ok(Json(report))
}

async fn get_profile<S, L>(
    State(state): State<AppState<S, L>>,
    payload: Result<Json<UsernameRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    let Json(request) = payload?;
    if request.username.trim().is_empty() {
        return Err(ApiError::bad_request("username is required"));
    }
    let profile = state
        .engine
        .storage()
        .get_profile(&request.username)
        .await?
        .ok_or_else(|| ClearanceError::ProfileNotFound(request.username.clone()))?;
    data(profile)
}

async fn update_identity<S, L>(
    State(state): State<AppState<S, L>>,
    payload: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    let Json(request) = payload?;
    let change = IdentityChange {
        old_email: request.old_email,
        old_username: request.old_username,
        new_email: request.new_email,
        new_username: request.new_username,
    };
    state.admin.update_identity(&change).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn update_fees<S, L>(
    State(state): State<AppState<S, L>>,
    payload: Result<Json<FeesRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    let Json(request) = payload?;
    let fees = FeeSchedule {
        school_fee_due: request.school_fee_due,
        penalty_fee: request.penalty_fee,
        excess_fee: request.excess_fee,
    };
    let profile = state.admin.update_fees(&request.username, &fees).await?;
    data(profile)
}

async fn grant_clearance<S, L>(
    State(state): State<AppState<S, L>>,
    payload: Result<Json<UsernameRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    let Json(request) = payload?;
    if request.username.trim().is_empty() {
        return Err(ApiError::bad_request("username is required"));
    }
    let clearance = state.admin.grant_clearance(&request.username).await?;
    data(clearance)
}

async fn list_users<S, L>(
    State(state): State<AppState<S, L>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    data(state.admin.users(query.q.as_deref()).await?)
}

async fn list_profiles<S, L>(
    State(state): State<AppState<S, L>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    data(state.admin.profiles(query.q.as_deref()).await?)
}

async fn list_clearances<S, L>(
    State(state): State<AppState<S, L>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    data(state.admin.clearances(query.q.as_deref()).await?)
}

async fn list_used_receipts<S, L>(
    State(state): State<AppState<S, L>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    S: ClearanceStorage + 'static,
    L: LedgerReader + 'static,
{
    data(state.admin.used_receipts(query.q.as_deref()).await?)
}
