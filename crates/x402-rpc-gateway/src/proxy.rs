//! Reverse proxy to the upstream JSON-RPC node.

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};

use crate::middleware::Upstream;

/// Request headers never forwarded upstream: hop-by-hop headers, anything
/// that could identify or correlate the originating client, and all
/// credential/payment headers.
const HEADERS_TO_STRIP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
    "forwarded",
    "via",
    "authorization",
    "cookie",
    "proxy-authorization",
    "payment-signature",
    "x-payment",
];

/// Response headers forwarded back from the upstream. Everything else is
/// dropped so upstream identity headers (server, x-powered-by) never reach
/// the client.
const ALLOWED_RESPONSE_HEADERS: &[&str] =
    &["content-type", "cache-control", "date", "vary", "x-request-id"];

/// Forwards JSON-RPC requests to a single upstream node.
pub struct RpcProxy {
    client: reqwest::Client,
    upstream_url: String,
}

impl RpcProxy {
    pub fn new(upstream_url: impl Into<String>) -> Result<Self, url::ParseError> {
        let upstream_url = upstream_url.into();
        url::Url::parse(&upstream_url)?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to create HTTP client");

        Ok(Self {
            client,
            upstream_url,
        })
    }
}

impl Upstream for RpcProxy {
    async fn forward(&self, req: &HttpRequest, body: web::Bytes) -> HttpResponse {
        let mut builder = self.client.post(&self.upstream_url);

        for (name, value) in req.headers() {
            if HEADERS_TO_STRIP.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                builder = builder.header(name.as_str(), value);
            }
        }

        let resp = match builder.body(body.to_vec()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                // Full error server-side only; the client gets a generic 502
                // so the upstream RPC URL and connection details never leak.
                tracing::error!(error = %e, "upstream RPC error");
                return HttpResponse::BadGateway().body("upstream unavailable");
            }
        };

        let status =
            StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let headers = resp.headers().clone();

        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "reading upstream response failed");
                return HttpResponse::BadGateway().body("upstream unavailable");
            }
        };

        let mut out = HttpResponse::build(status);
        for (name, value) in headers.iter() {
            if ALLOWED_RESPONSE_HEADERS.contains(&name.as_str()) {
                if let Ok(value) = value.to_str() {
                    out.insert_header((name.as_str(), value));
                }
            }
        }
        out.body(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_list_covers_identifying_and_credential_headers() {
        for name in [
            "x-forwarded-for",
            "x-real-ip",
            "via",
            "authorization",
            "payment-signature",
            "cookie",
        ] {
            assert!(HEADERS_TO_STRIP.contains(&name), "missing {name}");
        }
        assert!(!HEADERS_TO_STRIP.contains(&"content-type"));
    }

    #[test]
    fn response_allowlist_hides_upstream_identity() {
        assert!(ALLOWED_RESPONSE_HEADERS.contains(&"content-type"));
        assert!(!ALLOWED_RESPONSE_HEADERS.contains(&"server"));
        assert!(!ALLOWED_RESPONSE_HEADERS.contains(&"x-powered-by"));
    }

    #[test]
    fn new_rejects_invalid_url() {
        assert!(RpcProxy::new("not a url").is_err());
        assert!(RpcProxy::new("https://sepolia.base.org").is_ok());
    }
}
