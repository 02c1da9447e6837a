//! Connection supervision: one transport session, its authentication
//! challenge window, and the reconnect policy.

pub mod challenge;
pub mod handle;
pub mod policy;
pub mod state;
pub mod supervisor;

pub use challenge::{ChallengeOutcome, ChallengeWindow};
pub use handle::{ConnectionHandle, ConnectionRequest, EnsureOutcome};
pub use policy::{ReconnectDecision, decide, decide_within};
pub use state::{AuthChallenge, ConnectionSnapshot, SessionState, SupervisorCondition};
pub use supervisor::{
    ConnectionSupervisor, InitializeOutcome, SessionSignal, SignalKind, SupervisorConfig,
};
