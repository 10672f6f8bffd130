//! The MCP face of the gateway: one endpoint speaking the protocol the
//! upstream client expects, exposing the gateway operations as MCP tools.

pub mod endpoint;

pub use endpoint::{handle_get, handle_post};
