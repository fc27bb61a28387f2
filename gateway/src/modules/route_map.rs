//! Maps API routes to module queues.

use crate::infrastructure::config::ModuleSettings;
use dashmap::DashMap;

/// Where a route's requests go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteQueueInfo {
    /// Normalised route, e.g. `vision/custom`.
    pub route: String,
    /// Upper-case HTTP method.
    pub method: String,
    /// Lower-case queue name.
    pub queue_name: String,
    /// Command put in the payload.
    pub command: String,
}

/// Route table keyed by `METHOD_route`.
#[derive(Debug, Default)]
pub struct BackendRouteMap {
    routes: DashMap<String, RouteQueueInfo>,
}

fn normalise_route(route: &str) -> String {
    route.trim().trim_matches('/').to_lowercase()
}

fn key(route: &str, method: &str) -> String {
    format!("{}_{}", method.trim().to_uppercase(), route)
}

impl BackendRouteMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map from the configured modules.
    #[must_use]
    pub fn from_modules(modules: &[ModuleSettings]) -> Self {
        let map = Self::new();
        for module in modules {
            for route in &module.routes {
                map.register(&route.route, &route.method, &module.queue, &route.command);
            }
        }
        map
    }

    /// Adds or replaces a route.
    pub fn register(&self, route: &str, method: &str, queue_name: &str, command: &str) {
        let route = normalise_route(route);
        let info = RouteQueueInfo {
            route: route.clone(),
            method: method.trim().to_uppercase(),
            queue_name: queue_name.trim().to_lowercase(),
            command: command.to_owned(),
        };
        self.routes.insert(key(&route, method), info);
    }

    /// Finds the route for `path`: exact match first, else the longest
    /// registered route that prefixes it with the same method.
    #[must_use]
    pub fn lookup(&self, path: &str, method: &str) -> Option<RouteQueueInfo> {
        let path = normalise_route(path);
        if let Some(info) = self.routes.get(&key(&path, method)) {
            return Some(info.clone());
        }

        let method = method.trim().to_uppercase();
        self.routes
            .iter()
            .filter(|entry| entry.method == method && is_route_prefix(&entry.route, &path))
            .max_by_key(|entry| entry.route.len())
            .map(|entry| entry.value().clone())
    }

    /// Distinct routes, sorted.
    #[must_use]
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.routes.iter().map(|e| e.route.clone()).collect();
        routes.sort();
        routes.dedup();
        routes
    }
}

/// `route` prefixes `path` at a segment boundary.
fn is_route_prefix(route: &str, path: &str) -> bool {
    path.strip_prefix(route)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Path segments that follow `route` in `path`, trimmed and without empties.
#[must_use]
pub fn extra_segments(path: &str, route: &str) -> Vec<String> {
    let path = path.trim().trim_matches('/');
    let rest = match (path.get(..route.len()), path.get(route.len()..)) {
        (Some(head), Some(rest)) if head.eq_ignore_ascii_case(route) => rest,
        _ => "",
    };

    rest.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}
