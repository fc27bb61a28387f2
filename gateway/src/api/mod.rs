//! HTTP API of the gateway.
//!
//! Clients post inference requests under `/v1/{category}/{module}/...`; analysis
//! modules long-poll `/v1/queue/{name}` for work and post their responses back.
//! Mesh settings are managed under `/v1/server/mesh`.

pub mod envelope;
pub mod error;
pub mod form;
pub mod mesh;
pub mod proxy;
pub mod queue;
pub mod routes;

pub use envelope::{EnvelopeBody, ResponseEnvelope};
pub use error::ApiError;
pub use proxy::FORWARDED_HEADER;
pub use routes::routes;
