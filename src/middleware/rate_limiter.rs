// Fixed-window rate limiting per client address

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

use crate::config::{RateLimitConfig, RateLimitErrorBehavior};
use crate::counters::{CounterStore, WindowCount};
use crate::models::AppState;
use crate::types::{AppError, AppResult};
use crate::utils::with_deadline;

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    config: RateLimitConfig,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>, config: RateLimitConfig, store_timeout: Duration) -> Self {
        Self {
            counters,
            config,
            store_timeout,
        }
    }

    /// Count one request against `client`. The first `max_requests` of a
    /// window are admitted; everything after is rejected until it resets.
    pub async fn admit(&self, client: &str) -> AppResult<()> {
        let counted = with_deadline("rate limit counter", self.store_timeout, async {
            self.counters
                .increment_in_window(client, self.config.window())
                .await
                .map_err(|e| AppError::Internal(e.to_string()))
        })
        .await;

        // An unreachable and an unresponsive counter store get the same policy.
        match counted {
            Ok(WindowCount { count, resets_in }) if count > self.config.max_requests => {
                warn!(client, count, retry_after_secs = resets_in.as_secs(), "Rate limit exceeded");
                Err(AppError::RateLimitExceeded { retry_after: resets_in })
            }
            Ok(WindowCount { count, .. }) => {
                debug!(client, count, "Request admitted");
                Ok(())
            }
            Err(e) => match self.config.on_error {
                RateLimitErrorBehavior::Allow => {
                    warn!(client, error = %e, "Counter store unavailable, admitting request");
                    Ok(())
                }
                RateLimitErrorBehavior::Deny => {
                    error!(client, error = %e, "Counter store unavailable, rejecting request");
                    Err(e)
                }
            },
        }
    }
}

/// Key requests by peer address, or by the first `X-Forwarded-For` hop
/// when the deployment sits behind a trusted proxy.
pub fn client_key(req: &Request, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        let forwarded = req
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

pub async fn rate_limiter_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_key(&req, state.config.server.trust_proxy_headers);
    state.rate_limiter.admit(&client).await?;
    Ok(next.run(req).await)
}
