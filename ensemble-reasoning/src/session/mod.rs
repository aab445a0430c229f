//! Session state: types, the per-session thought graph, and the store

mod graph;
mod store;
mod types;

pub use graph::{GraphLimits, ThoughtGraph};
pub use store::{SessionRecord, SessionStore, StartOutcome};
pub use types::{
    AgentLens, Challenge, Endorsement, IntegrationProposal, LensProfile, Session,
    SessionSnapshot, SessionStatus, Thought, ThoughtId,
};
