use std::collections::HashMap;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::{Error, HttpResponse};
use futures::future::LocalBoxFuture;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Settings;

const AUTH_WINDOW: Duration = Duration::from_secs(15 * 60);
const AUTH_MAX_REQUESTS: u32 = 10;

/// Addresses that only say the request came through a local proxy.
const UNRESOLVED_ADDRESSES: &[&str] = &["::1", "127.0.0.1", "::ffff:127.0.0.1"];

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub window: Duration,
    pub max_requests: u32,
    pub skip_failed_requests: bool,
    pub standard_headers: bool,
    pub legacy_headers: bool,
    pub trust_proxy: bool,
    pub debug: bool,
    pub error: &'static str,
    pub message: &'static str,
}

impl RateLimitPolicy {
    fn base(settings: &Settings) -> Self {
        Self {
            name: "api",
            window: Duration::from_millis(settings.rate_limit.window_ms),
            max_requests: settings.rate_limit.max_requests,
            skip_failed_requests: true,
            standard_headers: true,
            legacy_headers: false,
            trust_proxy: settings.is_production(),
            debug: settings.rate_limit.debug,
            error: "Too many requests",
            message: "Too many requests from this IP, please try again later.",
        }
    }

    pub fn general(settings: &Settings) -> Self {
        Self::base(settings)
    }

    pub fn authentication(settings: &Settings) -> Self {
        Self {
            name: "auth",
            window: AUTH_WINDOW,
            max_requests: AUTH_MAX_REQUESTS,
            error: "Too many authentication attempts",
            message: "Too many authentication attempts from this IP, please try again after 15 minutes.",
            ..Self::base(settings)
        }
    }

    /// Whole seconds a rejected client is told to wait.
    pub fn retry_after_secs(&self) -> u64 {
        ceil_secs(self.window)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    (millis + 999) / 1000
}

/// Body sent with a 429 response.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRejection {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

/// Picks the client identity behind a trusted reverse proxy:
/// first `X-Forwarded-For` entry, then `X-Real-IP`, then the address the
/// framework detected. Loopback results fall back to the raw peer address.
pub fn resolve_client_key(headers: &HeaderMap, detected: Option<&str>, peer: Option<&str>) -> String {
    let forwarded = header_str(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = header_str(headers, "x-real-ip")
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let candidate = forwarded
        .or(real_ip)
        .or_else(|| detected.map(str::trim).filter(|ip| !ip.is_empty()));

    match candidate {
        Some(ip) if !UNRESOLVED_ADDRESSES.contains(&ip) => ip.to_string(),
        _ => peer.unwrap_or("unknown").to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[derive(Debug)]
struct RequestWindow {
    count: u32,
    reset_at: Instant,
}

impl RequestWindow {
    fn new(window: Duration) -> Self {
        Self {
            count: 0,
            reset_at: Instant::now() + window,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// Outcome of counting one request against a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

pub struct RateLimiter {
    windows: Arc<RwLock<HashMap<String, RequestWindow>>>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Counts a request for `key` in its current fixed window.
    pub async fn hit(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut windows = self.windows.write().await;

        let window = windows
            .entry(key.to_string())
            .or_insert_with(|| RequestWindow::new(self.policy.window));
        if window.is_expired(now) {
            *window = RequestWindow::new(self.policy.window);
        }
        window.count = window.count.saturating_add(1);

        RateLimitDecision {
            allowed: window.count <= self.policy.max_requests,
            limit: self.policy.max_requests,
            remaining: self.policy.max_requests.saturating_sub(window.count),
            reset_after: window.reset_at.saturating_duration_since(now),
        }
    }

    /// Takes back a request that should not count, such as a failed one.
    pub async fn undo(&self, key: &str) {
        let mut windows = self.windows.write().await;
        if let Some(window) = windows.get_mut(key) {
            window.count = window.count.saturating_sub(1);
        }
    }

    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, window| !window.is_expired(now));
        before - windows.len()
    }

    pub fn client_key(&self, req: &ServiceRequest) -> String {
        let peer = req.peer_addr().map(|addr| addr.ip().to_string());
        if !self.policy.trust_proxy {
            return peer.unwrap_or_else(|| "unknown".to_string());
        }

        let connection_info = req.connection_info();
        let detected = connection_info.realip_remote_addr();
        let key = resolve_client_key(req.headers(), detected, peer.as_deref());

        if self.policy.debug {
            info!(
                limiter = self.policy.name,
                forwarded_for = ?header_str(req.headers(), "x-forwarded-for"),
                real_ip = ?header_str(req.headers(), "x-real-ip"),
                detected = ?detected,
                peer = ?peer,
                key = %key,
                "Resolved rate limit key"
            );
        }
        key
    }

    pub fn rejection(&self) -> RateLimitRejection {
        RateLimitRejection {
            error: self.policy.error.to_string(),
            message: self.policy.message.to_string(),
            retry_after: self.policy.retry_after_secs(),
        }
    }

    fn apply_headers(&self, headers: &mut HeaderMap, decision: &RateLimitDecision) {
        let reset = ceil_secs(decision.reset_after).to_string();
        let limit = decision.limit.to_string();
        let remaining = decision.remaining.to_string();

        if self.policy.standard_headers {
            let policy = format!("{};w={}", decision.limit, ceil_secs(self.policy.window));
            insert_header(headers, "ratelimit-policy", &policy);
            insert_header(headers, "ratelimit-limit", &limit);
            insert_header(headers, "ratelimit-remaining", &remaining);
            insert_header(headers, "ratelimit-reset", &reset);
        }
        if self.policy.legacy_headers {
            insert_header(headers, "x-ratelimit-limit", &limit);
            insert_header(headers, "x-ratelimit-remaining", &remaining);
            insert_header(headers, "x-ratelimit-reset", &reset);
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

/// Middleware factory; clones share one set of counters.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(policy)),
        }
    }

    pub fn general(settings: &Settings) -> Self {
        Self::new(RateLimitPolicy::general(settings))
    }

    pub fn authentication(settings: &Settings) -> Self {
        Self::new(RateLimitPolicy::authentication(settings))
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service: Rc::new(service),
            limiter: Arc::clone(&self.limiter),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = Arc::clone(&self.limiter);

        Box::pin(async move {
            let key = limiter.client_key(&req);
            let decision = limiter.hit(&key).await;

            if !decision.allowed {
                let policy = limiter.policy();
                warn!(
                    limiter = policy.name,
                    key = %key,
                    path = %req.path(),
                    "Request blocked by rate limiter"
                );

                let mut response = HttpResponse::TooManyRequests()
                    .insert_header((RETRY_AFTER, policy.retry_after_secs().to_string()))
                    .json(limiter.rejection());
                limiter.apply_headers(response.headers_mut(), &decision);

                return Ok(req.into_response(response).map_into_right_body());
            }

            match service.call(req).await {
                Ok(mut res) => {
                    if limiter.policy().skip_failed_requests && !res.status().is_success() {
                        limiter.undo(&key).await;
                    }
                    limiter.apply_headers(res.headers_mut(), &decision);
                    Ok(res.map_into_left_body())
                }
                Err(err) => {
                    if limiter.policy().skip_failed_requests {
                        limiter.undo(&key).await;
                    }
                    Err(err)
                }
            }
        })
    }
}
