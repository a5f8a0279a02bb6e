// ============================================================================
// Request ID Middleware
// ============================================================================
//
// Every request gets an X-Request-ID (client-supplied UUID, or a fresh v4).
// The id is stored in request extensions as `RequestId`, echoed on the
// response, and attached to a tracing span so every log line emitted while
// handling the request (including sync runs triggered by it) carries it.
//
// ============================================================================

use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    request.extensions_mut().insert(RequestId(request_id));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        tracing::debug!("→ Incoming request");
        let mut response = next.run(request).await;

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }

        tracing::debug!(status = %response.status(), "← Outgoing response");
        response
    }
    .instrument(span)
    .await
}
