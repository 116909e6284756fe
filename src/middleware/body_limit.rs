use poem::{
    web::headers::{ContentLength, HeaderMapExt},
    Endpoint, IntoResponse, Request, Response, Result,
};
use tracing::warn;

use crate::error::GenerateError;

pub struct BodyLimitCheck<E> {
    pub(super) inner: E,
    pub(super) max_bytes: usize,
}

impl<E: Endpoint> Endpoint for BodyLimitCheck<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        if let Some(ContentLength(len)) = req.headers().typed_get::<ContentLength>() {
            if len > self.max_bytes as u64 {
                warn!(len, max = self.max_bytes, "request body over limit");
                return Ok(GenerateError::PayloadTooLarge.into_response());
            }
        }

        Ok(self.inner.call(req).await?.into_response())
    }
}
