// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::FixedOffset;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;

use super::AppState;
use crate::config::parse_offset;
use crate::error::{AppError, AppResult};
use crate::models::{PageRequest, RideStatus};

/// Header carrying the caller's UTC offset, e.g. `-05:00`.
pub const UTC_OFFSET_HEADER: &str = "x-utc-offset";

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// Runs a service call under the configured request deadline. Elapsing drops
/// the call, which releases any pooled connection it holds.
pub async fn with_deadline<T>(
    state: &AppState,
    call: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    tokio::time::timeout(state.request_timeout, call)
        .await
        .map_err(|_| AppError::Timeout)?
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

impl PeriodQuery {
    pub fn period_or(&self, default: &str) -> String {
        period_or(self.period.as_deref(), default)
    }
}

fn period_or(period: Option<&str>, default: &str) -> String {
    period
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(default)
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

/// `?period=&page=&page_size=` for ledger listings.
#[derive(Debug, Default, Deserialize)]
pub struct PeriodPageQuery {
    pub period: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PeriodPageQuery {
    pub fn period_or(&self, default: &str) -> String {
        period_or(self.period.as_deref(), default)
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

/// Ride history listing; adds the ride status filter.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub period: Option<String>,
    pub status: Option<RideStatus>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl HistoryQuery {
    pub fn period_or(&self, default: &str) -> String {
        period_or(self.period.as_deref(), default)
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.page_size)
    }
}

/// JSON body whose rejection uses the error envelope.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        Ok(Self(value))
    }
}

pub struct ApiQuery<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        Ok(Self(value))
    }
}

pub struct ApiPath<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::bad_request("invalid id"))?;
        Ok(Self(value))
    }
}

/// The caller's zone, from [`UTC_OFFSET_HEADER`] or the configured default.
#[derive(Debug, Clone, Copy)]
pub struct CallerZone(pub FixedOffset);

#[axum::async_trait]
impl FromRequestParts<AppState> for CallerZone {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match parts.headers.get(UTC_OFFSET_HEADER) {
            None => Ok(Self(state.default_zone)),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|raw| parse_offset(raw).ok())
                .map(Self)
                .ok_or_else(|| AppError::bad_request(format!("{UTC_OFFSET_HEADER} must look like +HH:MM"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_defaults_when_blank() {
        let query = PeriodQuery {
            period: Some("  ".into()),
        };
        assert_eq!(query.period_or("today"), "today");
        let query = PeriodQuery {
            period: Some("last_week".into()),
        };
        assert_eq!(query.period_or("today"), "last_week");
    }

    #[test]
    fn envelope_shape() {
        let body = serde_json::to_value(ApiResponse::success(3)).unwrap();
        assert_eq!(body, serde_json::json!({"success": true, "data": 3}));
    }
}
