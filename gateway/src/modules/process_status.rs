//! Runtime status of the analysis modules.
//!
//! Modules announce themselves by polling their queue. The table tracks when
//! each was last seen, how much it processed and what it reports about itself,
//! and publishes start/stop transitions so the mesh can re-advertise routes.

use crate::infrastructure::config::ModuleSettings;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessStatusType {
    /// Configured but never seen.
    NotStarted,
    /// Polling its queue.
    Started,
    /// Told to quit.
    Stopping,
}

/// Status record of one module.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    /// Module id.
    pub module_id: String,
    /// Display name.
    pub name: String,
    /// Queue the module pulls from.
    pub queue: String,
    /// Lifecycle state.
    pub status: ProcessStatusType,
    /// First time the module was seen after (re)starting.
    pub started: Option<DateTime<Utc>>,
    /// Last queue poll or response.
    pub last_seen: Option<DateTime<Utc>>,
    /// Requests processed.
    pub request_count: u64,
    /// Whatever the module last reported.
    pub status_data: Option<Value>,
    /// `CPU` or `GPU`.
    pub inference_device: Option<String>,
    /// Execution provider reported by the module.
    pub execution_provider: Option<String>,
    /// Whether the module can use a GPU.
    pub can_use_gpu: bool,
    /// Routes advertised through the mesh.
    pub mesh_routes: Vec<String>,
}

/// A module changed lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStateChange {
    /// Module id.
    pub module_id: String,
    /// New state.
    pub status: ProcessStatusType,
}

/// Concurrent table of module statuses.
#[derive(Debug)]
pub struct ProcessStatusTable {
    processes: DashMap<String, ProcessStatus>,
    changes: broadcast::Sender<ProcessStateChange>,
}

impl Default for ProcessStatusTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStatusTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            processes: DashMap::new(),
            changes,
        }
    }

    /// Builds the table from configuration; every module starts as `NotStarted`.
    #[must_use]
    pub fn from_modules(modules: &[ModuleSettings]) -> Self {
        let table = Self::new();
        for module in modules {
            table.register(module);
        }
        table
    }

    /// Adds or replaces a module record.
    pub fn register(&self, module: &ModuleSettings) {
        let mesh_routes = module
            .routes
            .iter()
            .filter(|r| r.mesh_enabled)
            .map(|r| r.route.trim().trim_matches('/').to_lowercase())
            .collect();

        self.processes.insert(
            module.module_id.to_lowercase(),
            ProcessStatus {
                module_id: module.module_id.clone(),
                name: module.name.clone().unwrap_or_else(|| module.module_id.clone()),
                queue: module.queue.to_lowercase(),
                status: ProcessStatusType::NotStarted,
                started: None,
                last_seen: None,
                request_count: 0,
                status_data: None,
                inference_device: None,
                execution_provider: None,
                can_use_gpu: false,
                mesh_routes,
            },
        );
    }

    /// Subscribes to lifecycle changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessStateChange> {
        self.changes.subscribe()
    }

    fn publish(&self, module_id: &str, status: ProcessStatusType) {
        info!(module_id = %module_id, status = ?status, "Module state changed");
        // No subscribers is fine.
        let _ = self.changes.send(ProcessStateChange {
            module_id: module_id.to_owned(),
            status,
        });
    }

    /// Marks the module as seen now. A module that was not running becomes `Started`.
    ///
    /// Returns `false` for unknown modules.
    pub fn update_last_seen(&self, module_id: &str) -> bool {
        let started = {
            let Some(mut process) = self.processes.get_mut(&module_id.to_lowercase()) else {
                debug!(module_id = %module_id, "Ignoring unknown module");
                return false;
            };
            let now = Utc::now();
            process.last_seen = Some(now);
            if process.status == ProcessStatusType::NotStarted {
                process.status = ProcessStatusType::Started;
                process.started = Some(now);
                true
            } else {
                false
            }
        };

        if started {
            self.publish(module_id, ProcessStatusType::Started);
        }
        true
    }

    /// Counts one processed request.
    pub fn increment_processed(&self, module_id: &str) -> bool {
        match self.processes.get_mut(&module_id.to_lowercase()) {
            Some(mut process) => {
                process.request_count += 1;
                true
            }
            None => false,
        }
    }

    /// Marks the module as shutting down.
    pub fn advise_shutdown(&self, module_id: &str) -> bool {
        let changed = match self.processes.get_mut(&module_id.to_lowercase()) {
            Some(mut process) => {
                let changed = process.status != ProcessStatusType::Stopping;
                process.status = ProcessStatusType::Stopping;
                changed
            }
            None => return false,
        };

        if changed {
            self.publish(module_id, ProcessStatusType::Stopping);
        }
        true
    }

    /// Merges a JSON object into the module's status data; other values replace it.
    pub fn update_status_data(&self, module_id: &str, data: Value) -> bool {
        let Some(mut process) = self.processes.get_mut(&module_id.to_lowercase()) else {
            return false;
        };

        match (&mut process.status_data, data) {
            (Some(Value::Object(existing)), Value::Object(update)) => existing.extend(update),
            (slot, data) => *slot = Some(data),
        }
        true
    }

    /// Records the device the module infers on.
    pub fn update_inference_device(
        &self,
        module_id: &str,
        execution_provider: &str,
        can_use_gpu: bool,
    ) -> bool {
        let Some(mut process) = self.processes.get_mut(&module_id.to_lowercase()) else {
            return false;
        };

        process.execution_provider = Some(execution_provider.to_owned());
        process.can_use_gpu = can_use_gpu;
        process.inference_device = Some(if can_use_gpu { "GPU" } else { "CPU" }.to_owned());
        true
    }

    /// Mesh-enabled routes of started modules, distinct and sorted.
    #[must_use]
    pub fn started_routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .processes
            .iter()
            .filter(|p| p.status == ProcessStatusType::Started)
            .flat_map(|p| p.mesh_routes.clone())
            .collect();
        routes.sort();
        routes.dedup();
        routes
    }

    /// Snapshot of one module.
    #[must_use]
    pub fn get(&self, module_id: &str) -> Option<ProcessStatus> {
        self.processes
            .get(&module_id.to_lowercase())
            .map(|p| p.clone())
    }

    /// Snapshot of all modules, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<ProcessStatus> {
        let mut list: Vec<ProcessStatus> = self.processes.iter().map(|p| p.clone()).collect();
        list.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ModuleRouteSettings;
    use serde_json::json;

    fn module(id: &str, route: &str, mesh_enabled: bool) -> ModuleSettings {
        ModuleSettings {
            module_id: id.into(),
            name: None,
            queue: format!("{id}_queue"),
            routes: vec![ModuleRouteSettings {
                route: route.into(),
                method: "POST".into(),
                command: "detect".into(),
                mesh_enabled,
            }],
        }
    }

    fn table() -> ProcessStatusTable {
        ProcessStatusTable::from_modules(&[
            module("Vision", "vision/custom", true),
            module("Face", "vision/face", false),
            module("Text", "text/summary", true),
        ])
    }

    #[tokio::test]
    async fn first_sighting_starts_the_module_once() {
        let table = table();
        let mut changes = table.subscribe();

        assert!(table.update_last_seen("vision"));
        assert!(table.update_last_seen("VISION"));

        let change = changes.recv().await.unwrap();
        assert_eq!(change.status, ProcessStatusType::Started);
        assert!(changes.try_recv().is_err());
        assert!(!table.update_last_seen("unknown"));
    }

    #[test]
    fn started_routes_respect_mesh_flag_and_state() {
        let table = table();
        assert!(table.started_routes().is_empty());

        table.update_last_seen("Vision");
        table.update_last_seen("Face");
        assert_eq!(table.started_routes(), vec!["vision/custom"]);

        table.advise_shutdown("Vision");
        assert!(table.started_routes().is_empty());
        assert_eq!(table.get("vision").unwrap().status, ProcessStatusType::Stopping);
    }

    #[test]
    fn stopping_module_is_not_restarted_by_polling() {
        let table = table();
        table.update_last_seen("Text");
        table.advise_shutdown("Text");
        table.update_last_seen("Text");

        assert_eq!(table.get("text").unwrap().status, ProcessStatusType::Stopping);
    }

    #[test]
    fn status_data_objects_merge() {
        let table = table();
        table.update_status_data("Vision", json!({"inferenceCount": 1, "model": "yolo"}));
        table.update_status_data("Vision", json!({"inferenceCount": 2}));

        let data = table.get("vision").unwrap().status_data.unwrap();
        assert_eq!(data, json!({"inferenceCount": 2, "model": "yolo"}));
    }

    #[test]
    fn counters_and_device() {
        let table = table();
        table.increment_processed("Vision");
        table.increment_processed("Vision");
        table.update_inference_device("Vision", "CUDA", true);

        let status = table.get("Vision").unwrap();
        assert_eq!(status.request_count, 2);
        assert_eq!(status.inference_device.as_deref(), Some("GPU"));
        assert!(!table.increment_processed("nobody"));
    }
}
