pub mod circuit;
pub mod classify;
pub mod errors;
pub mod ids;
pub mod profile;
pub mod request;
pub mod snapshot;

pub use circuit::CircuitState;
pub use errors::{DispatchError, FailureKind};
pub use ids::{RequestId, SessionId};
pub use profile::{Credential, ExecutionProfile};
pub use request::{Outcome, Request};
pub use snapshot::{CallerEntry, HistoryEntry, SessionSnapshot};
