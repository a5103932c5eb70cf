//! Server-side session coordination

pub mod engine;
pub mod registry;
pub mod run;
pub mod server_session;

pub use engine::{EngineSnapshot, LegPhase, NegotiationEngine, SessionPhase};
pub use registry::{SessionId, SessionRegistry};
pub use run::RecordingRun;
pub use server_session::ServerSession;
