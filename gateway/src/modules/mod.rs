//! Analysis module routing and runtime status.

pub mod process_status;
pub mod route_map;

pub use process_status::{ProcessStateChange, ProcessStatus, ProcessStatusTable, ProcessStatusType};
pub use route_map::{BackendRouteMap, RouteQueueInfo, extra_segments};
