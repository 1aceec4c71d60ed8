//! Domain types: configuration, errors, identifiers and turns.

pub mod config;
pub mod errors;
pub mod ids;
pub mod turn;

pub use config::{
    BackendConfig, FailurePolicy, OrchestratorConfig, ReasoningMode, RelayConfig, RenderConfig,
    ServerConfig, SessionConfig,
};
pub use errors::{RelayError, RelayResult};
pub use ids::SessionId;
pub use turn::{Role, Transcript, Turn};
