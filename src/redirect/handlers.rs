use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::engine::{RedirectEngine, RequestContext};
use crate::error::Error;

pub struct RedirectState {
    pub engine: Arc<RedirectEngine>,
}

fn header_text(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Client IP: first parseable X-Forwarded-For hop, then X-Real-IP, then the
/// socket peer address.
fn client_ip(headers: &HeaderMap, socket: SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(hop) = forwarded
            .split(',')
            .map(str::trim)
            .find(|hop| hop.parse::<IpAddr>().is_ok())
        {
            return hop.to_string();
        }
    }
    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
    {
        if real_ip.parse::<IpAddr>().is_ok() {
            return real_ip.to_string();
        }
    }
    socket.ip().to_string()
}

/// The resolve endpoint: `GET /{code}`.
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if code.is_empty() || code.len() > 16 {
        return Error::InvalidInput("invalid short code".to_string()).into_response();
    }

    let ctx = RequestContext {
        ip: client_ip(&headers, addr),
        user_agent: header_text(&headers, header::USER_AGENT),
        referer: header_text(&headers, header::REFERER),
    };

    match state.engine.resolve(&code, &ctx).await {
        Ok(resolution) => (
            StatusCode::from(resolution.kind),
            [(header::LOCATION, resolution.target)],
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9999))
    }

    #[test]
    fn client_ip_prefers_forwarded_hops() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, socket()), "203.0.113.9");
    }

    #[test]
    fn client_ip_skips_garbage_hops() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "unknown, 203.0.113.9".parse().unwrap());
        assert_eq!(client_ip(&headers, socket()), "203.0.113.9");
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_socket() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers, socket()), "198.51.100.4");

        assert_eq!(client_ip(&HeaderMap::new(), socket()), "127.0.0.1");
    }
}
