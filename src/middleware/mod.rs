pub mod body_limit;

use poem::{
    http::header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    },
    middleware::SetHeader,
    Endpoint, Middleware,
};

/// Rejects requests whose declared `Content-Length` is over the limit.
/// Bodiless requests (polls, preflights, health checks) pass untouched.
pub struct BodyLimitMiddleware {
    max_bytes: usize,
}

impl BodyLimitMiddleware {
    pub fn new(max_bytes: usize) -> Self {
        BodyLimitMiddleware { max_bytes }
    }
}

impl<E: Endpoint> Middleware<E> for BodyLimitMiddleware {
    type Output = body_limit::BodyLimitCheck<E>;

    fn transform(&self, ep: E) -> Self::Output {
        body_limit::BodyLimitCheck {
            inner: ep,
            max_bytes: self.max_bytes,
        }
    }
}

/// Open CORS: any origin, JSON bodies. GET is allowed alongside POST so
/// browsers can follow `pollUrl`.
pub fn cors_headers() -> SetHeader {
    SetHeader::new()
        .overriding(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .overriding(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
        .overriding(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
}
