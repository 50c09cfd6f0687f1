use super::error::*;
use crate::application_port::*;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reject;

/// Fields are taken as sent; only absent or falsy values count as missing.
#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub email: Option<Value>,
}

fn field_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) => Some(s),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

pub async fn list_users(
    user_service: Arc<dyn UserService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let users = user_service
        .list_users()
        .await
        .map_err(|e| ApiErrorCode::from_user_error(e, ApiErrorCode::FetchUsersFailed))
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&users))
}

pub async fn create_user(
    body: CreateUserRequest,
    user_service: Arc<dyn UserService>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let input = CreateUserInput {
        name: field_text(body.name),
        email: field_text(body.email),
    };
    let record = user_service
        .create_user(input)
        .await
        .map_err(|e| ApiErrorCode::from_user_error(e, ApiErrorCode::CreateUserFailed))
        .map_err(reject::custom)?;

    Ok(warp::reply::with_status(
        warp::reply::json(&record),
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub database: &'static str,
}

pub async fn health(database: &'static str) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&HealthResponse {
        status: "OK",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        database,
    }))
}
