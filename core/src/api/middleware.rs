// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! API middleware configuration.

use axum::http::Method;
use tower_http::cors::{Any, CorsLayer};

/// Per-source rate limits, in requests per minute.
///
/// Workers hammer the status-update endpoint, so `PUT /api/put/*`
/// carries its own tighter cap on top of the API-wide default.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    /// Default cap across the whole API
    pub default_per_minute: u32,
    /// Cap for `PUT /api/put/*`
    pub put_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            default_per_minute: 200,
            put_per_minute: 60,
        }
    }
}

impl RateLimits {
    /// Token replenish period for a per-minute cap, in milliseconds
    pub fn replenish_ms(per_minute: u32) -> u64 {
        (60_000 / u64::from(per_minute.max(1))).max(1)
    }
}

/// CORS configuration for the dashboard and submission tools
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed methods
    pub allowed_methods: Vec<Method>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_methods: vec![Method::GET, Method::POST, Method::PUT, Method::DELETE],
        }
    }
}

impl CorsConfig {
    /// Build the tower-http layer
    pub fn to_layer(&self) -> CorsLayer {
        CorsLayer::new()
            .allow_methods(self.allowed_methods.clone())
            .allow_headers(Any)
            .allow_origin(Any)
    }
}
