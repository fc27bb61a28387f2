//! Analysis module configuration.
//!
//! Modules run out of process and pull work from their queue. The gateway only
//! needs to know which routes map to which queue and command.

use serde::Deserialize;

/// One route a module serves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleRouteSettings {
    /// API route without the `v1/` prefix, e.g. `vision/custom`.
    pub route: String,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Command placed in the payload.
    pub command: String,
    /// Whether the route is advertised to, and forwardable through, the mesh.
    #[serde(default = "default_mesh_enabled")]
    pub mesh_enabled: bool,
}

/// An analysis module known to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleSettings {
    /// Unique module id.
    pub module_id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Queue the module pulls from.
    pub queue: String,
    /// Routes served by the module.
    #[serde(default)]
    pub routes: Vec<ModuleRouteSettings>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_mesh_enabled() -> bool {
    true
}
