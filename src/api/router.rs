use super::error::recover_error;
use super::handler;
use crate::server::Server;
use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;
use warp::http::header::{self, HeaderMap, HeaderValue};

const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Routes under `/api`, without error recovery.
pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    // path before method, so unknown paths reject as not found
    let list_users = warp::path("users")
        .and(warp::path::end())
        .and(warp::get())
        .and(with(server.user_service.clone()))
        .and_then(handler::list_users);

    let create_user = warp::path("users")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with(server.user_service.clone()))
        .and_then(handler::create_user);

    let database = server.database_label();
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || handler::health(database));

    list_users.or(create_user).or(health)
}

/// The whole HTTP surface: `/api` routes, JSON errors, CORS and security
/// headers.
pub fn service(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path("api")
        .and(routes(server))
        .recover(recover_error)
        .with(warp::reply::with::headers(security_headers()))
        .with(cors())
}

fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"])
}

fn security_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(
        header::X_DNS_PREFETCH_CONTROL,
        HeaderValue::from_static("off"),
    );
    headers
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}
