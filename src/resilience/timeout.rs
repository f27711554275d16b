//! Per-request deadline middleware (§4.10). Wraps the downstream service in
//! a hard wall-clock timeout and maps an expired request to `AppError::Timeout`
//! instead of letting the connection hang or axum return its own 408.

use std::time::Duration;

use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::AppError;

pub async fn request_timeout(
    timeout: Duration,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => Ok(response),
        Err(_) => {
            tracing::warn!(?timeout, "request exceeded deadline");
            Err(AppError::Timeout)
        }
    }
}

/// Builds the middleware fn with the configured timeout baked in, since
/// `axum::middleware::from_fn` only accepts functions of a fixed arity.
pub fn layer(
    timeout: Duration,
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AppError>> + Send>>
       + Clone {
    move |request: Request, next: Next| {
        let timeout = timeout;
        Box::pin(async move { request_timeout(timeout, request, next).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_future_completes_within_timeout() {
        let result = tokio::time::timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            42
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn slow_future_trips_timeout() {
        let result: Result<(), _> = tokio::time::timeout(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await;
        assert!(result.is_err());
    }
}
