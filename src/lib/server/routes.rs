use std::sync::Arc;

use alloy::primitives::Address;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::scheduler::{AuctionDirectory, AuctionStatus, ResolverScheduler, ScheduleError};

/// Shared application state for axum route handlers.
pub struct AppState<D> {
    pub scheduler: Arc<ResolverScheduler<D>>,
}

impl<D> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
        }
    }
}

// ── Request / response types ──

/// Body of POST /register-auction.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterAuction {
    pub address: Address,
    /// Unix seconds
    pub end_timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub address: Address,
    pub scheduled: bool,
}

// ── Route handlers ──

/// POST /register-auction: schedule resolution of an auction.
pub async fn register_handler<D: AuctionDirectory>(
    State(state): State<AppState<D>>,
    Json(body): Json<RegisterAuction>,
) -> Result<Json<RegisterResponse>, AppError> {
    state
        .scheduler
        .register(body.address, body.end_timestamp)
        .await?;
    Ok(Json(RegisterResponse {
        address: body.address,
        scheduled: true,
    }))
}

/// GET /status/{address}: current resolution status of a registered auction.
pub async fn status_handler<D: AuctionDirectory>(
    State(state): State<AppState<D>>,
    Path(address): Path<String>,
) -> Result<Json<AuctionStatus>, AppError> {
    let auction = parse_address(&address)?;
    state
        .scheduler
        .status(auction)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("auction {auction} is not registered")))
}

// ── Error handling ──

/// Application error type that maps to HTTP status codes.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<ScheduleError> for AppError {
    fn from(e: ScheduleError) -> Self {
        match &e {
            ScheduleError::AlreadyScheduled(_) => AppError::Conflict(e.to_string()),
            ScheduleError::Directory { .. } => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m),
            AppError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

// ── Helpers ──

fn parse_address(s: &str) -> Result<Address, AppError> {
    s.parse::<Address>()
        .map_err(|e| AppError::BadRequest(format!("invalid address {s}: {e}")))
}
