//! HTTP surface
//!
//! Thin axum layer over [`ExchangeService`]. Every response uses the
//! `{code, msg, data}` envelope; errors carry the HTTP status from
//! [`ExchangeError::http_status`].
//!
//! - Swagger UI: `/docs`
//! - OpenAPI JSON: `/api-docs/openapi.json`

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::exchange::{
    CreateExchangeRequest, ExchangeError, ExchangeService, ExchangeView, TransactionUpdate,
};
use crate::exchange::service::{CurrencyView, HealthView, SettingsView};

// ============================================================================
// Envelope
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, absent on error
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    pub const VALIDATION: i32 = 1001;
    pub const STALE_DATA: i32 = 1002;
    pub const NOT_FOUND: i32 = 4004;
    pub const CONCURRENT_MODIFICATION: i32 = 4009;

    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5003;
}

pub struct ApiError(pub ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        Self(e)
    }
}

/// Map an exchange error to (StatusCode, error_code)
fn map_error(e: &ExchangeError) -> (StatusCode, i32) {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let code = match e {
        ExchangeError::Validation(_) => error_codes::VALIDATION,
        ExchangeError::StaleData(_) => error_codes::STALE_DATA,
        ExchangeError::NotFound(_) => error_codes::NOT_FOUND,
        ExchangeError::ConcurrentModification(_) => error_codes::CONCURRENT_MODIFICATION,
        ExchangeError::Gateway(_) => error_codes::SERVICE_UNAVAILABLE,
        ExchangeError::Incomplete { source, .. } => return map_error(source),
        ExchangeError::IllegalTransition { .. }
        | ExchangeError::Pricing(_)
        | ExchangeError::Database(_)
        | ExchangeError::Internal(_) => error_codes::INTERNAL_ERROR,
    };
    (status, code)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = map_error(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, kind = self.0.code(), "Request failed");
        }
        // A stored but unstarted exchange still hands its uuid back
        let body = ApiResponse {
            code,
            msg: self.0.to_string(),
            data: match &self.0 {
                ExchangeError::Incomplete { uuid, .. } => Some(CreatedData { uuid: *uuid }),
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedData {
    pub uuid: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitHashRequest {
    #[schema(example = "0x9f2c...")]
    pub trx_hash: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTransactionsRequest {
    pub transactions: Vec<TransactionUpdate>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdatedData {
    /// Records confirmed by this call
    pub updated: usize,
}

// ============================================================================
// Handlers
// ============================================================================

type AppState = State<Arc<ExchangeService>>;

#[utoipa::path(
    post,
    path = "/api/exchange",
    request_body = CreateExchangeRequest,
    responses(
        (status = 200, description = "Exchange created", body = CreatedData),
        (status = 400, description = "Invalid parameters"),
        (status = 503, description = "Remote service unavailable; `data.uuid` is set when the exchange was already stored")
    ),
    tag = "Exchange"
)]
pub async fn create_exchange(
    State(service): AppState,
    Json(req): Json<CreateExchangeRequest>,
) -> ApiResult<CreatedData> {
    let uuid = service.create_exchange(req).await?;
    ok(CreatedData { uuid })
}

#[utoipa::path(
    get,
    path = "/api/exchange/{uuid}",
    params(("uuid" = Uuid, Path, description = "Exchange uuid")),
    responses(
        (status = 200, description = "Exchange state", content_type = "application/json"),
        (status = 404, description = "Unknown exchange")
    ),
    tag = "Exchange"
)]
pub async fn get_exchange(State(service): AppState, Path(uuid): Path<Uuid>) -> ApiResult<ExchangeView> {
    ok(service.view(uuid).await?)
}

#[utoipa::path(
    post,
    path = "/api/exchange/{uuid}/update_transaction",
    params(("uuid" = Uuid, Path, description = "Exchange uuid")),
    request_body = SubmitHashRequest,
    responses(
        (status = 200, description = "Deposit hash accepted", content_type = "application/json"),
        (status = 400, description = "Hash rejected or exchange not waiting for one"),
        (status = 404, description = "Unknown exchange")
    ),
    tag = "Exchange"
)]
pub async fn submit_transaction_hash(
    State(service): AppState,
    Path(uuid): Path<Uuid>,
    Json(req): Json<SubmitHashRequest>,
) -> ApiResult<ExchangeView> {
    ok(service.submit_transaction_hash(uuid, &req.trx_hash).await?)
}

#[utoipa::path(
    get,
    path = "/api/exchange/{uuid}/refresh",
    params(("uuid" = Uuid, Path, description = "Exchange uuid")),
    responses(
        (status = 200, description = "Exchange advanced as far as possible", content_type = "application/json"),
        (status = 409, description = "Exchange modified concurrently"),
        (status = 503, description = "Remote service unavailable")
    ),
    tag = "Exchange"
)]
pub async fn refresh_exchange(
    State(service): AppState,
    Path(uuid): Path<Uuid>,
) -> ApiResult<ExchangeView> {
    ok(service.refresh(uuid).await?)
}

#[utoipa::path(
    get,
    path = "/api/settings",
    responses((status = 200, description = "Fee schedule and limits", content_type = "application/json")),
    tag = "Public"
)]
pub async fn get_settings(State(service): AppState) -> ApiResult<SettingsView> {
    ok(service.settings())
}

#[utoipa::path(
    get,
    path = "/api/currencies",
    responses(
        (status = 200, description = "Active currencies with live USD rates", content_type = "application/json"),
        (status = 503, description = "Currency service unavailable")
    ),
    tag = "Public"
)]
pub async fn get_currencies(State(service): AppState) -> ApiResult<Vec<CurrencyView>> {
    ok(service.currencies().await?)
}

#[utoipa::path(
    post,
    path = "/rpc/UpdateInputTransaction",
    request_body = UpdateTransactionsRequest,
    responses((status = 200, description = "Confirmations applied", body = UpdatedData)),
    tag = "Callbacks"
)]
pub async fn update_input_transactions(
    State(service): AppState,
    Json(req): Json<UpdateTransactionsRequest>,
) -> ApiResult<UpdatedData> {
    let updated = service.update_input_transactions(&req.transactions).await;
    ok(UpdatedData { updated })
}

#[utoipa::path(
    post,
    path = "/rpc/UpdateOutputTransaction",
    request_body = UpdateTransactionsRequest,
    responses((status = 200, description = "Confirmations applied", body = UpdatedData)),
    tag = "Callbacks"
)]
pub async fn update_output_transactions(
    State(service): AppState,
    Json(req): Json<UpdateTransactionsRequest>,
) -> ApiResult<UpdatedData> {
    let updated = service.update_output_transactions(&req.transactions).await;
    ok(UpdatedData { updated })
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service alive", content_type = "application/json")),
    tag = "System"
)]
pub async fn healthz(State(service): AppState) -> ApiResult<HealthView> {
    ok(service.healthz())
}

// ============================================================================
// Router
// ============================================================================

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Coinswap Exchange API",
        version = "1.0.0",
        description = "Cross-currency exchange: deposit one currency, receive another.",
        license(name = "MIT")
    ),
    paths(
        create_exchange,
        get_exchange,
        submit_transaction_hash,
        refresh_exchange,
        get_settings,
        get_currencies,
        update_input_transactions,
        update_output_transactions,
        healthz,
    ),
    components(schemas(
        CreateExchangeRequest,
        CreatedData,
        SubmitHashRequest,
        TransactionUpdate,
        UpdateTransactionsRequest,
        UpdatedData,
    )),
    tags(
        (name = "Exchange", description = "Exchange lifecycle"),
        (name = "Public", description = "Reference data"),
        (name = "Callbacks", description = "Confirmations from the wallet monitor"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

pub fn router(service: Arc<ExchangeService>) -> Router {
    let exchange_routes = Router::new()
        .route("/exchange", post(create_exchange))
        .route("/exchange/{uuid}", get(get_exchange))
        .route("/exchange/{uuid}/update_transaction", post(submit_transaction_hash))
        .route("/exchange/{uuid}/refresh", get(refresh_exchange))
        .route("/settings", get(get_settings))
        .route("/currencies", get(get_currencies));

    let rpc_routes = Router::new()
        .route("/UpdateInputTransaction", post(update_input_transactions))
        .route("/UpdateOutputTransaction", post(update_output_transactions));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", exchange_routes)
        .nest("/rpc", rpc_routes)
        .with_state(service)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::gateway::RpcStatus;
    use crate::gateway::ServiceName;

    #[test]
    fn test_map_error() {
        let cases = [
            (ExchangeError::Validation("x".into()), 400, error_codes::VALIDATION),
            (ExchangeError::StaleData("x".into()), 400, error_codes::STALE_DATA),
            (ExchangeError::NotFound("x".into()), 404, error_codes::NOT_FOUND),
            (
                ExchangeError::ConcurrentModification("x".into()),
                409,
                error_codes::CONCURRENT_MODIFICATION,
            ),
            (
                ExchangeError::Gateway(GatewayError::Rejected {
                    service: ServiceName::Transactions,
                    method: "CreateTransfer",
                    status: RpcStatus::Error,
                    description: "boom".into(),
                }),
                503,
                error_codes::SERVICE_UNAVAILABLE,
            ),
            (ExchangeError::Internal("x".into()), 500, error_codes::INTERNAL_ERROR),
            (
                ExchangeError::Pricing(crate::fee::RateError::UnknownCurrency("tron".into())),
                500,
                error_codes::INTERNAL_ERROR,
            ),
            (
                ExchangeError::Incomplete {
                    uuid: Uuid::nil(),
                    source: Box::new(ExchangeError::Database("x".into())),
                },
                500,
                error_codes::INTERNAL_ERROR,
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(map_error(&err), (StatusCode::from_u16(status).unwrap(), code));
        }
    }

    #[test]
    fn test_envelope_shape() {
        let ok = serde_json::to_value(ApiResponse::success(UpdatedData { updated: 2 })).unwrap();
        assert_eq!(ok, serde_json::json!({"code": 0, "msg": "ok", "data": {"updated": 2}}));

        let err = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert_eq!(err, serde_json::json!({"code": 1001, "msg": "bad"}));
    }

    #[tokio::test]
    async fn test_incomplete_exchange_returns_uuid() {
        let uuid = Uuid::new_v4();
        let response = ApiError(ExchangeError::Incomplete {
            uuid,
            source: Box::new(ExchangeError::Gateway(GatewayError::Rejected {
                service: ServiceName::Wallets,
                method: "PutOnMonitoring",
                status: RpcStatus::Error,
                description: "down".into(),
            })),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], error_codes::SERVICE_UNAVAILABLE);
        assert_eq!(body["data"]["uuid"], uuid.to_string());
    }

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/exchange",
            "/api/exchange/{uuid}",
            "/api/exchange/{uuid}/update_transaction",
            "/rpc/UpdateInputTransaction",
            "/healthz",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
