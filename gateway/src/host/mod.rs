//! Shared gateway state handed to every HTTP handler.

pub mod state;

pub use state::GatewayState;
