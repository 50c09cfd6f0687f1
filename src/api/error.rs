use crate::application_port::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::{debug, error, warn};
use warp::http::StatusCode;
use warp::{Rejection, reject};

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ApiErrorCode {
    #[error("Name and email are required")]
    MissingFields,
    #[error("Invalid request body")]
    InvalidBody,
    #[error("Failed to fetch users")]
    FetchUsersFailed,
    #[error("Failed to create user")]
    CreateUserFailed,
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Internal server error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::MissingFields | ApiErrorCode::InvalidBody => StatusCode::BAD_REQUEST,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiErrorCode::FetchUsersFailed
            | ApiErrorCode::CreateUserFailed
            | ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a service error; backend failures become `fallback` and are only
    /// logged, never echoed.
    pub fn from_user_error(error: UserServiceError, fallback: ApiErrorCode) -> ApiErrorCode {
        match error {
            UserServiceError::MissingFields => {
                debug!("rejected request: {}", error);
                ApiErrorCode::MissingFields
            }
            UserServiceError::Backend(e) => {
                error!(kind = ?e.kind(), "{}: {}", fallback, e);
                fallback
            }
        }
    }
}

impl reject::Reject for ApiErrorCode {}

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let code = if let Some(code) = err.find::<ApiErrorCode>() {
        *code
    } else if err.is_not_found() {
        ApiErrorCode::NotFound
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        debug!("invalid request body: {}", e);
        ApiErrorCode::InvalidBody
    } else if err.find::<reject::UnsupportedMediaType>().is_some()
        || err.find::<reject::PayloadTooLarge>().is_some()
        || err.find::<reject::LengthRequired>().is_some()
    {
        ApiErrorCode::InvalidBody
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        ApiErrorCode::MethodNotAllowed
    } else {
        warn!("Unhandled rejection: {:?}", err);
        ApiErrorCode::InternalError
    };

    let json = warp::reply::json(&ApiError {
        error: code.to_string(),
    });
    Ok(warp::reply::with_status(json, code.status()))
}
