use axum::{
    async_trait,
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::time::Instant;
use tracing::{debug, info};

/// Header carrying the identifier of the user authenticated upstream
pub const USER_HEADER: &str = "x-relay-user";
pub const VERSION_HEADER: &str = "x-relay-version";

/// The requesting user; `None` for anonymous requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentUser(pub Option<String>);

impl CurrentUser {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let identifier = headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Self(identifier)
    }

    pub fn identifier(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .unwrap_or_else(|| CurrentUser::from_headers(&parts.headers)))
    }
}

/// Resolve the requesting user once per request
pub async fn user_middleware(mut request: Request<Body>, next: Next) -> Response {
    let user = CurrentUser::from_headers(request.headers());
    debug!("USER MIDDLEWARE: request by {:?}", user.identifier());
    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Request timing
pub async fn request_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    info!("REQUEST MIDDLEWARE: Processing incoming {} request to {}", method, uri);

    let response = next.run(request).await;

    debug!(
        "REQUEST MIDDLEWARE: {} {} answered {} in {:?}",
        method,
        uri,
        response.status(),
        start.elapsed()
    );
    response
}

/// Adds the service version to every response
pub async fn response_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(VERSION_HEADER, HeaderValue::from_static(env!("CARGO_PKG_VERSION")));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn whoami(user: CurrentUser) -> String {
        user.identifier().unwrap_or("anonymous").to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn(user_middleware))
            .layer(middleware::from_fn(request_middleware))
            .layer(middleware::from_fn(response_middleware))
    }

    async fn call(request: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_user_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(CurrentUser::from_headers(&headers), CurrentUser(None));

        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(CurrentUser::from_headers(&headers), CurrentUser(None));

        headers.insert(USER_HEADER, HeaderValue::from_static(" alice "));
        assert_eq!(CurrentUser::from_headers(&headers).identifier(), Some("alice"));
    }

    #[tokio::test]
    async fn test_anonymous_request() {
        let request = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
        let (status, headers, body) = call(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");
        assert_eq!(headers.get(VERSION_HEADER).unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_authenticated_request() {
        let request = Request::builder()
            .uri("/whoami")
            .header("X-Relay-User", "alice")
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = call(request).await;
        assert_eq!(body, "alice");
    }
}
