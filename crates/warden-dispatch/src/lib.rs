//! Dispatch to the external agent process: single-flight execution, rate
//! limiting, circuit breaking, retries and profile fallback.

pub mod breaker;
pub mod dispatcher;
pub mod oneshot;
pub mod policy;
pub mod process;
pub mod rate_limit;
pub mod supervised;

pub mod mock;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use dispatcher::{Call, Dispatched, DispatcherConfig, ProcessDispatcher};
pub use mock::{MockReply, ScriptedProcess};
pub use oneshot::OneShotProcess;
pub use policy::{FallbackPolicy, RetryPolicy};
pub use process::{AgentProcess, ProcessCommand, ProcessError};
pub use rate_limit::RateLimiter;
pub use supervised::SupervisedProcess;
