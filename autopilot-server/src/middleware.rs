//! HTTP client middleware that tags every outgoing GitHub request with a
//! correlation id and logs the exchange.

use std::time::Instant;

use axum::http::{self, HeaderMap};
use reqwest::{Request, Response, Url};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use tracing::{debug, warn};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Debug, Default, Clone, Copy)]
pub struct CorrelationMiddleware;

#[async_trait::async_trait]
impl Middleware for CorrelationMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let correlation_id = correlation_id(req.headers());
        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = correlation_id.parse() {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let method = req.method().clone();
        let path = extract_path(req.url());
        let started = Instant::now();
        debug!("[{}] {} {}", correlation_id, method, path);

        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => debug!(
                "[{}] {} {} -> {} in {:?}",
                correlation_id,
                method,
                path,
                resp.status(),
                started.elapsed()
            ),
            Err(err) => warn!(
                "[{}] {} {} failed after {:?}: {}",
                correlation_id,
                method,
                path,
                started.elapsed(),
                err
            ),
        }

        response
    }
}

/// The caller's correlation id if it set a readable one, otherwise a fresh one.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Path and query of a URL, without scheme or host.
pub fn extract_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_reuses_existing_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, "poll-42".parse().unwrap());
        assert_eq!(correlation_id(&headers), "poll-42");
    }

    #[test]
    fn test_correlation_id_is_generated_when_missing() {
        let headers = HeaderMap::new();
        let first = correlation_id(&headers);
        let second = correlation_id(&headers);

        assert!(Uuid::parse_str(&first).is_ok());
        assert_ne!(first, second);
    }

    #[test]
    fn test_extract_path_keeps_query() {
        let url = Url::parse("https://api.github.com/repos/o/r/actions/runs?head_sha=abc&page=2")
            .unwrap();
        assert_eq!(
            extract_path(&url),
            "/repos/o/r/actions/runs?head_sha=abc&page=2"
        );
    }

    #[test]
    fn test_extract_path_without_query() {
        let url = Url::parse("https://api.github.com/repos/o/r/pulls/7").unwrap();
        assert_eq!(extract_path(&url), "/repos/o/r/pulls/7");
    }
}
