//! Action Cache probe, grounded on the `fetch_from_action_cache` call site
//! in `original_source/src/bin/recc.m.cpp`: recc looks up the action
//! before ever calling `Execute`, and a cache miss is not an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::error;
use tonic::transport::Channel;
use tonic::{Code, Status};

use crate::errors::{RecExecError, Result};
use crate::reapi_proto::build::bazel::remote::execution::v2::action_cache_client::ActionCacheClient as GeneratedClient;
use crate::reapi_proto::build::bazel::remote::execution::v2::{
    ActionResult, Digest as DigestProto, GetActionResultRequest,
};

use super::context::RequestContext;
use super::retry::sleep_cancellable;

pub struct ActionCacheClient {
    client: GeneratedClient<Channel>,
    instance_name: String,
    retry_limit: u32,
    retry_delay: Duration,
}

/// Outcome of a cache probe: either a hit carrying the cached result, or a
/// miss recc should fall through to remote execution for.
pub enum CacheLookup {
    Hit(ActionResult),
    Miss,
}

impl ActionCacheClient {
    pub fn new(channel: Channel, instance_name: String, retry_limit: u32, retry_delay: Duration) -> Self {
        ActionCacheClient {
            client: GeneratedClient::new(channel),
            instance_name,
            retry_limit,
            retry_delay,
        }
    }

    /// Probe the action cache for `action_digest`. `NOT_FOUND` is a normal
    /// miss returned immediately, never retried; any other error status is
    /// retried with the usual exponential backoff and then surfaced.
    pub async fn get_action_result(
        &self,
        action_digest: &DigestProto,
        cancel: &AtomicBool,
    ) -> Result<CacheLookup> {
        let ctx = RequestContext::with_action_id(action_digest.hash.clone());
        let mut n_attempts = 0u32;
        let mut last_status: Option<Status> = None;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(RecExecError::Cancelled);
            }

            let mut client = self.client.clone();
            let request = ctx.wrap(GetActionResultRequest {
                instance_name: self.instance_name.clone(),
                action_digest: Some(action_digest.clone()),
            });

            match client.get_action_result(request).await {
                Ok(response) => return Ok(CacheLookup::Hit(response.into_inner())),
                Err(status) if status.code() == Code::NotFound => return Ok(CacheLookup::Miss),
                Err(status) => {
                    if n_attempts < self.retry_limit {
                        let delay = self.retry_delay * 2u32.pow(n_attempts.min(16));
                        error!(
                            "Action Cache lookup attempt {}/{} failed with {}: {}. Retrying in {:?}...",
                            n_attempts + 1,
                            self.retry_limit + 1,
                            status.code(),
                            status.message(),
                            delay,
                        );
                        if !sleep_cancellable(delay, cancel).await {
                            return Err(RecExecError::Cancelled);
                        }
                    }
                    last_status = Some(status);
                    n_attempts += 1;
                    if n_attempts >= self.retry_limit + 1 {
                        break;
                    }
                }
            }
        }

        let status = last_status.unwrap_or_else(|| Status::new(Code::Unknown, "no attempts made"));
        Err(RecExecError::RpcFailed {
            code: status.code(),
            message: status.message().to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cache_lookup_variants_are_distinguishable() {
        let hit = CacheLookup::Hit(ActionResult::default());
        let miss = CacheLookup::Miss;
        assert!(matches!(hit, CacheLookup::Hit(_)));
        assert!(matches!(miss, CacheLookup::Miss));
    }
}
