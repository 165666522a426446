//! Per-client-IP throttling for the login and register endpoints

use axum::http::HeaderMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Login attempts allowed per window and client IP
pub const LOGIN_MAX_ATTEMPTS: u32 = 20;
/// Registrations allowed per window and client IP
pub const REGISTER_MAX_ATTEMPTS: u32 = 10;
pub const WINDOW: Duration = Duration::from_secs(10 * 60);

/// Keyed limiters for the unauthenticated auth endpoints
pub struct AuthRateLimits {
    login: DefaultKeyedRateLimiter<String>,
    register: DefaultKeyedRateLimiter<String>,
}

impl AuthRateLimits {
    pub fn new() -> Self {
        Self {
            login: RateLimiter::keyed(quota(LOGIN_MAX_ATTEMPTS, WINDOW)),
            register: RateLimiter::keyed(quota(REGISTER_MAX_ATTEMPTS, WINDOW)),
        }
    }

    pub fn allow_login(&self, ip: &str) -> bool {
        self.login.check_key(&ip.to_string()).is_ok()
    }

    pub fn allow_register(&self, ip: &str) -> bool {
        self.register.check_key(&ip.to_string()).is_ok()
    }

    /// Drop state for keys whose quota has fully replenished
    pub fn retain_recent(&self) {
        self.login.retain_recent();
        self.register.retain_recent();
    }
}

impl Default for AuthRateLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// `max` requests per `window`, all of them usable as an immediate burst
fn quota(max: u32, window: Duration) -> Quota {
    let burst = NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(window / burst.get())
        .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN))
        .allow_burst(burst)
}

/// Client address as reported by the reverse proxy
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or("unknown")
        .to_string()
}
