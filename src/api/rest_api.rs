//! `warp` wiring for the strategy REST surface: a struct holding
//! shared state, `build_routes()` composing filters with
//! `.and().and_then(...)`, and a `.recover()` tail mapping rejections
//! to status codes.

use super::{AppState, StrategyAction};
use crate::config::{StrategyKind, StrategyKnobs};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// A uniform response envelope for every endpoint, success or failure.
#[derive(Debug, Serialize)]
struct APIResponse<T: Serialize> {
    success: bool,
    data: Option<T>,
    error: Option<APIErrorBody>,
}

#[derive(Debug, Serialize)]
struct APIErrorBody {
    code: String,
    message: String,
}

impl<T: Serialize> APIResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ActionRequest {
    action: String,
    stage_id: Option<usize>,
}

/// Wraps a crate `Error` so it can travel through warp's rejection
/// machinery to `handle_rejection`.
#[derive(Debug)]
struct AppError(Error);

impl warp::reject::Reject for AppError {}

fn reject(e: Error) -> Rejection {
    warp::reject::custom(AppError(e))
}

/// Rejected when a `<kind>` path segment doesn't name a known strategy
/// kind.
#[derive(Debug)]
struct UnknownKind(String);

impl warp::reject::Reject for UnknownKind {}

fn kind_param() -> impl Filter<Extract = (StrategyKind,), Error = Rejection> + Copy {
    warp::path::param::<String>().and_then(|s: String| async move {
        StrategyKind::parse(&s).ok_or_else(|| warp::reject::custom(UnknownKind(s)))
    })
}

/// Strategy REST server: owns the shared `AppState` and assembles the
/// per-kind routes into one `warp` service.
pub struct RestApi {
    state: Arc<AppState>,
}

impl RestApi {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start serving on `Config::bind_address`. Runs until the process
    /// is killed; there is no graceful-shutdown surface in scope.
    pub async fn serve(self) -> crate::error::Result<()> {
        let addr: std::net::SocketAddr = self
            .state
            .config
            .bind_address
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind_address: {e}")))?;
        tracing::info!(%addr, "starting orchestration REST server");
        let routes = self.build_routes();
        warp::serve(routes).run(addr).await;
        Ok(())
    }

    fn build_routes(&self) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        let base = warp::path("orchestration");
        let state = self.state.clone();
        let with_state = warp::any().map(move || state.clone());

        let describe = base
            .and(kind_param())
            .and(warp::path::end())
            .and(warp::get())
            .and(with_state.clone())
            .and_then(Self::handle_describe);

        let show = base
            .and(kind_param())
            .and(warp::path("strategy"))
            .and(warp::path::end())
            .and(warp::get())
            .and(with_state.clone())
            .and_then(Self::handle_show);

        let create = base
            .and(kind_param())
            .and(warp::path("strategy"))
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state.clone())
            .and_then(Self::handle_create);

        let delete = base
            .and(kind_param())
            .and(warp::path("strategy"))
            .and(warp::path::end())
            .and(warp::delete())
            .and(warp::query::<DeleteQuery>())
            .and(with_state.clone())
            .and_then(Self::handle_delete);

        let actions = base
            .and(kind_param())
            .and(warp::path("strategy"))
            .and(warp::path("actions"))
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .and(with_state.clone())
            .and_then(Self::handle_actions);

        describe
            .or(show)
            .or(create)
            .or(delete)
            .or(actions)
            .with(warp::log("orchestration::api"))
            .recover(Self::handle_rejection)
    }

    async fn handle_describe(kind: StrategyKind, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
        Ok(warp::reply::json(&APIResponse::ok(state.describe(kind))))
    }

    async fn handle_show(kind: StrategyKind, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
        let value = state.show(kind).await.map_err(reject)?;
        Ok(warp::reply::json(&APIResponse::ok(value)))
    }

    async fn handle_create(
        kind: StrategyKind,
        knobs: StrategyKnobs,
        state: Arc<AppState>,
    ) -> Result<impl Reply, Rejection> {
        let value = state.create(kind, knobs).await.map_err(reject)?;
        Ok(warp::reply::with_status(
            warp::reply::json(&APIResponse::ok(value)),
            StatusCode::CREATED,
        ))
    }

    async fn handle_delete(
        kind: StrategyKind,
        query: DeleteQuery,
        state: Arc<AppState>,
    ) -> Result<impl Reply, Rejection> {
        state.delete(kind, query.force).await.map_err(reject)?;
        Ok(warp::reply::with_status(
            warp::reply::json(&APIResponse::ok(serde_json::json!({"deleted": true}))),
            StatusCode::OK,
        ))
    }

    async fn handle_actions(
        kind: StrategyKind,
        req: ActionRequest,
        state: Arc<AppState>,
    ) -> Result<impl Reply, Rejection> {
        let action = match req.action.as_str() {
            "apply-all" => StrategyAction::ApplyAll,
            "apply-stage" => StrategyAction::ApplyStage(
                req.stage_id
                    .ok_or_else(|| reject(Error::Planning("apply-stage requires stage_id".to_string())))?,
            ),
            "abort" => StrategyAction::Abort,
            "abort-stage" => StrategyAction::AbortStage(
                req.stage_id
                    .ok_or_else(|| reject(Error::Planning("abort-stage requires stage_id".to_string())))?,
            ),
            other => return Err(reject(Error::Planning(format!("unknown action {other}")))),
        };
        let value = state.act(kind, action).await.map_err(reject)?;
        Ok(warp::reply::json(&APIResponse::ok(value)))
    }

    async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
        let (status, code, message) = if err.is_not_found() {
            (StatusCode::NOT_FOUND, "NOT_FOUND", "no matching route".to_string())
        } else if let Some(UnknownKind(s)) = err.find() {
            (
                StatusCode::NOT_FOUND,
                "UNKNOWN_STRATEGY_KIND",
                format!("unknown strategy kind {s}"),
            )
        } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
            (StatusCode::BAD_REQUEST, "INVALID_JSON", "invalid request body".to_string())
        } else if err.find::<warp::reject::InvalidQuery>().is_some() {
            (StatusCode::BAD_REQUEST, "INVALID_QUERY", "invalid query parameters".to_string())
        } else if let Some(AppError(e)) = err.find() {
            let status = match e {
                Error::Planning(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
                Error::Conflict(_) => StatusCode::CONFLICT,
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::Driver(_) | Error::Inventory(_) | Error::Persistence(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, "ORCHESTRATION_ERROR", e.to_string())
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "internal server error".to_string())
        };

        let body = APIResponse::<()> {
            success: false,
            data: None,
            error: Some(APIErrorBody {
                code: code.to_string(),
                message,
            }),
        };
        Ok(warp::reply::with_status(warp::reply::json(&body), status))
    }
}
