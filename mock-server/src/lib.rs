use std::time::Duration;

use axum::{
    body::Bytes,
    extract::Path,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;

/// What `/inspect` saw of the incoming request.
#[derive(Debug, Serialize)]
pub struct Inspection {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body_len: usize,
}

pub fn app() -> Router {
    Router::new()
        .route("/status/{code}", get(status))
        .route("/echo", axum::routing::post(echo).put(echo))
        .route("/inspect", get(inspect).post(inspect))
        .route("/cookies", get(cookies))
        .route("/missing", get(missing))
        .route("/delay/{ms}", get(delay))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type.clone());
    }
    response
}

async fn inspect(method: Method, headers: HeaderMap, body: Bytes) -> Json<Inspection> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            (name.as_str().to_string(), value)
        })
        .collect();
    Json(Inspection {
        method: method.to_string(),
        headers,
        body_len: body.len(),
    })
}

async fn cookies() -> (HeaderMap, &'static str) {
    let mut headers = HeaderMap::new();
    headers.append(header::SET_COOKIE, HeaderValue::from_static("session=abc"));
    headers.append(header::SET_COOKIE, HeaderValue::from_static("theme=dark"));
    headers.append("x-multi", HeaderValue::from_static("1"));
    headers.append("x-multi", HeaderValue::from_static("2"));
    (headers, "ok")
}

async fn missing() -> (StatusCode, [(header::HeaderName, &'static str); 1], &'static str) {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/plain")],
        "no such resource",
    )
}

async fn delay(Path(ms): Path<u64>) -> String {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    format!("waited {ms}ms")
}
