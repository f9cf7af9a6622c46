//! REAPI transport: gRPC channel setup, per-call request context, retry
//! policy, and the three REAPI service clients recc talks to.

pub mod action_cache_client;
pub mod cas_client;
pub mod channel;
pub mod context;
pub mod execution_client;
pub mod retry;

pub use action_cache_client::{ActionCacheClient, CacheLookup};
pub use cas_client::CasClient;
pub use channel::Channels;
pub use context::RequestContext;
pub use execution_client::{ExecuteActionResult, ExecutionClient, CANCELLED_EXIT_CODE};
