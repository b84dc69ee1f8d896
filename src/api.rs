//! The proxy's single HTTP route: decode, resolve, forward, re-encode.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, MethodRouter};
use axum::Router;

use crate::codec;
use crate::forward;
use crate::http::HttpError;
use crate::resolver::MetaResolver;

const MAX_BODY_SIZE: u64 = 128 * 1024;

pub struct AppState {
    pub resolver: MetaResolver,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", proxy_route()).with_state(state)
}

fn proxy_route() -> MethodRouter<Arc<AppState>> {
    any(kdc_proxy)
}

async fn kdc_proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    if method != Method::POST {
        return Err(HttpError::method_not_allowed()
            .with_allow("POST")
            .msg(format!("Method not allowed ({method}).")));
    }

    let content_length = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .ok_or_else(|| HttpError::length_required().msg("Content-Length header is required."))?;
    let content_length: u64 = content_length
        .to_str()
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| HttpError::length_required().msg("Content-Length header is required."))?;
    if content_length > MAX_BODY_SIZE {
        return Err(HttpError::payload_too_large().msg("Request body exceeds the maximum KDC proxy message size."));
    }

    let request = codec::decode_request(&body).map_err(HttpError::bad_request().err())?;

    let kpasswd = request.variant.wants_kpasswd_server();
    let candidates = state.resolver.lookup(&request.realm, kpasswd).await;
    if candidates.is_empty() {
        return Err(HttpError::service_unavailable().msg(format!("Can't find remote ({}).", request.variant.pretty_name())));
    }

    let reply = forward::forward(&request.request, &candidates, state.resolver.working_servers(), &request.realm)
        .await
        .map_err(|_| HttpError::service_unavailable().msg(format!("Remote unavailable ({}).", request.variant.pretty_name())))?;

    let envelope = codec::encode(&reply).map_err(HttpError::internal().err())?;

    let mut response = (StatusCode::OK, envelope).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/kerberos"));
    Ok(response)
}
