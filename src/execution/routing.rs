//! Endpoint selection and failover.
//!
//! [`EndpointRouter`] tracks an [`EndpointHealth`] per service class and
//! resolves each attempt to an [`Endpoint`]:
//!
//! - healthy → the primary
//! - after `failure_threshold` consecutive unreachable failures on the
//!   primary → the designated fallback (`fallbacks[0]`), until an explicit
//!   [`reset_to_primary`](EndpointRouter::reset_to_primary)
//!
//! The counter tracks the designated route only: outcomes of attempts sent
//! elsewhere (a keyed first attempt on a pinned fallback node) neither count
//! nor reset it. Successes reset it but never switch back on their own.
//!
//! # Routing keys
//!
//! [`resolve_keyed`](EndpointRouter::resolve_keyed) maps a caller-supplied
//! key (e.g. a market id) onto one of the fallback nodes by stable hash, so
//! repeated calls for the same entity land on the same node. Only the first
//! attempt is pinned; retries go wherever [`resolve`](EndpointRouter::resolve)
//! points.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::classify::{ErrorClassifier, FailureKind};
use crate::telemetry;
use crate::types::{Endpoint, ServiceEndpoints};
use crate::{HuginnError, Result};

/// Default consecutive unreachable failures before failing over.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Failover bookkeeping for one service class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointHealth {
    pub consecutive_failures: u32,
    pub using_fallback: bool,
}

#[derive(Debug)]
struct Route {
    endpoints: ServiceEndpoints,
    health: EndpointHealth,
}

/// Primary/fallback router shared by the clients of one or more service classes.
#[derive(Debug)]
pub struct EndpointRouter {
    failure_threshold: u32,
    routes: RwLock<HashMap<String, Route>>,
}

impl Default for EndpointRouter {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl EndpointRouter {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the endpoints of a service class.
    ///
    /// Replacing resets its health.
    pub fn register(&self, service: impl Into<String>, endpoints: ServiceEndpoints) {
        self.routes.write().insert(
            service.into(),
            Route {
                endpoints,
                health: EndpointHealth::default(),
            },
        );
    }

    /// Active endpoint for a service class.
    pub fn resolve(&self, service: &str) -> Result<Endpoint> {
        let routes = self.routes.read();
        let route = Self::route(&routes, service)?;
        Ok(Self::designated(route))
    }

    /// Endpoint for attempt `attempt` (0-indexed) of a keyed call.
    ///
    /// The first attempt goes to the fallback node the key hashes to; later
    /// attempts, and services without fallbacks, use [`resolve`](Self::resolve).
    pub fn resolve_keyed(&self, service: &str, key: &str, attempt: u32) -> Result<Endpoint> {
        let routes = self.routes.read();
        let route = Self::route(&routes, service)?;
        let fallbacks = &route.endpoints.fallbacks;
        if attempt > 0 || fallbacks.is_empty() {
            return Ok(Self::designated(route));
        }
        let index = pin_index(key, fallbacks.len());
        Ok(Endpoint::Fallback {
            url: fallbacks[index].clone(),
            index,
        })
    }

    /// Record a successful attempt against `endpoint`.
    pub fn record_success(&self, service: &str, endpoint: &Endpoint) {
        let mut routes = self.routes.write();
        let Some(route) = routes.get_mut(service) else {
            return;
        };
        if Self::designated(route) == *endpoint {
            route.health.consecutive_failures = 0;
        }
    }

    /// Record a failed attempt against `endpoint`.
    ///
    /// Only unreachable-class failures (timeouts, refused connections, DNS)
    /// on the designated route count. Reaching the threshold on the primary
    /// switches the service to its fallback and resets the counter.
    pub fn record_failure(&self, service: &str, endpoint: &Endpoint, err: &HuginnError) {
        if ErrorClassifier::classify(err).kind != FailureKind::Unreachable {
            return;
        }
        let mut routes = self.routes.write();
        let Some(route) = routes.get_mut(service) else {
            return;
        };
        if Self::designated(route) != *endpoint {
            debug!(service, %endpoint, "failure off the designated route not counted");
            return;
        }
        route.health.consecutive_failures += 1;

        if route.health.using_fallback
            || route.health.consecutive_failures < self.failure_threshold
        {
            return;
        }
        match route.endpoints.fallbacks.first() {
            Some(fallback) => {
                warn!(
                    service,
                    primary = %route.endpoints.primary,
                    fallback = %fallback,
                    failures = route.health.consecutive_failures,
                    "switching to fallback endpoint"
                );
                route.health.using_fallback = true;
                route.health.consecutive_failures = 0;
                metrics::counter!(telemetry::FAILOVERS_TOTAL, "service" => service.to_owned())
                    .increment(1);
            }
            None => warn!(
                service,
                failures = route.health.consecutive_failures,
                "primary endpoint failing and no fallback configured"
            ),
        }
    }

    /// Switch a service back to its primary endpoint.
    pub fn reset_to_primary(&self, service: &str) {
        if let Some(route) = self.routes.write().get_mut(service) {
            if route.health.using_fallback {
                info!(service, primary = %route.endpoints.primary, "reset to primary endpoint");
            }
            route.health = EndpointHealth::default();
        }
    }

    /// Current health of a service class.
    pub fn health(&self, service: &str) -> Option<EndpointHealth> {
        self.routes.read().get(service).map(|r| r.health)
    }

    fn route<'a>(routes: &'a HashMap<String, Route>, service: &str) -> Result<&'a Route> {
        routes.get(service).ok_or_else(|| {
            HuginnError::Configuration(format!("no endpoints registered for service '{service}'"))
        })
    }

    fn designated(route: &Route) -> Endpoint {
        match (route.health.using_fallback, route.endpoints.fallbacks.first()) {
            (true, Some(url)) => Endpoint::Fallback {
                url: url.clone(),
                index: 0,
            },
            _ => Endpoint::Primary {
                url: route.endpoints.primary.clone(),
            },
        }
    }
}

/// Stable slot for `key` among `len` nodes.
///
/// `DefaultHasher::new()` uses fixed keys, so the mapping is identical
/// across calls and processes built from the same toolchain.
fn pin_index(key: &str, len: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % len as u64) as usize
}
