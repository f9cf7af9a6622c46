//! Execution RPC: stream an `Execute` call to completion, materializing
//! the resulting `ActionResult` into a flat output-file map. Grounded on
//! `original_source/src/remoteexecutionclient.cpp`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use prost::Message;
use tonic::transport::Channel;

use crate::errors::{RecExecError, Result};
use crate::reapi_proto::build::bazel::remote::execution::v2::execution_client::ExecutionClient as GeneratedExecutionClient;
use crate::reapi_proto::build::bazel::remote::execution::v2::{
    Digest as DigestProto, Directory, ExecuteRequest, ExecuteResponse, Tree,
};
use crate::reapi_proto::google::longrunning::operations_client::OperationsClient;
use crate::reapi_proto::google::longrunning::{operation, CancelOperationRequest, Operation};

use super::cas_client::CasClient;
use super::context::RequestContext;

const EXECUTE_RESPONSE_TYPE_URL: &str =
    "type.googleapis.com/build.bazel.remote.execution.v2.ExecuteResponse";

/// Unpack the `ExecuteResponse` an `Operation`'s `response` field carries,
/// mirroring `get_actionresult`'s error/response handling in the source:
/// an `error` result is a hard failure, an unfinished operation is a bug,
/// and an `Any` that isn't an `ExecuteResponse` is a protocol violation.
fn unpack_execute_response(operation: &Operation) -> Result<ExecuteResponse> {
    match &operation.result {
        Some(operation::Result::Error(status)) => Err(RecExecError::RpcFailed {
            code: tonic::Code::from_i32(status.code),
            message: status.message.clone(),
        }),
        Some(operation::Result::Response(any)) => {
            if any.type_url != EXECUTE_RESPONSE_TYPE_URL {
                return Err(RecExecError::ParseFailed("ExecuteResponse"));
            }
            ExecuteResponse::decode(any.value.as_slice())
                .map_err(|_| RecExecError::ParseFailed("ExecuteResponse"))
        }
        None => Err(RecExecError::ParseFailed("ExecuteResponse")),
    }
}

/// Cancellation exit code recc reports when a SIGINT aborted an in-flight
/// `Execute` call, matching the source's "Ctrl+C exit code" of 130.
pub const CANCELLED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone)]
pub struct OutputFileResult {
    pub digest: DigestProto,
    pub executable: bool,
}

#[derive(Debug)]
pub struct ExecuteActionResult {
    pub exit_code: i32,
    pub stdout_raw: Vec<u8>,
    pub stdout_digest: Option<DigestProto>,
    pub stderr_raw: Vec<u8>,
    pub stderr_digest: Option<DigestProto>,
    pub output_files: BTreeMap<String, OutputFileResult>,
}

impl ExecuteActionResult {
    fn cancelled() -> Self {
        ExecuteActionResult {
            exit_code: CANCELLED_EXIT_CODE,
            stdout_raw: Vec::new(),
            stdout_digest: None,
            stderr_raw: Vec::new(),
            stderr_digest: None,
            output_files: BTreeMap::new(),
        }
    }
}

pub struct ExecutionClient {
    execution: GeneratedExecutionClient<Channel>,
    operations: OperationsClient<Channel>,
    instance_name: String,
    digest_function: crate::digest::DigestFunction,
}

impl ExecutionClient {
    pub fn new(
        channel: Channel,
        instance_name: String,
        digest_function: crate::digest::DigestFunction,
    ) -> Self {
        ExecutionClient {
            execution: GeneratedExecutionClient::new(channel.clone()),
            operations: OperationsClient::new(channel),
            instance_name,
            digest_function,
        }
    }

    /// Run `action_digest` remotely, polling `cancel` between stream reads.
    /// A cancellation observed mid-stream sends `CancelOperation` on a
    /// fresh context and returns a synthetic result with exit code 130,
    /// rather than surfacing an error — the caller's job is done either
    /// way, just unsuccessfully.
    pub async fn execute_action(
        &self,
        action_digest: &DigestProto,
        skip_cache_lookup: bool,
        cas: &CasClient,
        cancel: &AtomicBool,
    ) -> Result<ExecuteActionResult> {
        let ctx = RequestContext::with_action_id(action_digest.hash.clone());
        let request = ctx.wrap(ExecuteRequest {
            instance_name: self.instance_name.clone(),
            skip_cache_lookup,
            action_digest: Some(action_digest.clone()),
        });

        let mut client = self.execution.clone();
        let mut stream = client.execute(request).await?.into_inner();

        let mut last_operation: Option<Operation> = None;
        loop {
            if cancel.load(Ordering::SeqCst) {
                if let Some(operation) = &last_operation {
                    self.cancel_operation(&operation.name).await;
                }
                return Ok(ExecuteActionResult::cancelled());
            }

            match stream.message().await? {
                Some(operation) => {
                    let done = operation.done;
                    last_operation = Some(operation);
                    if done {
                        break;
                    }
                }
                None => break,
            }
        }

        let operation = last_operation
            .filter(|op| op.done)
            .ok_or_else(|| RecExecError::RpcFailed {
                code: tonic::Code::Aborted,
                message: "server closed stream before Operation finished".to_string(),
            })?;

        let execute_response = unpack_execute_response(&operation)?;
        if let Some(status) = &execute_response.status {
            if status.code != 0 {
                return Err(RecExecError::RpcFailed {
                    code: tonic::Code::from_i32(status.code),
                    message: status.message.clone(),
                });
            }
        }
        let result = execute_response
            .result
            .ok_or_else(|| RecExecError::ParseFailed("ExecuteResponse.result"))?;

        let mut output_files = BTreeMap::new();
        for file in &result.output_files {
            output_files.insert(
                file.path.clone(),
                OutputFileResult {
                    digest: file.digest.clone().unwrap_or_default(),
                    executable: file.is_executable,
                },
            );
        }

        for output_directory in &result.output_directories {
            let tree_digest = match &output_directory.tree_digest {
                Some(d) => d,
                None => continue,
            };
            let tree: Tree = cas.fetch_message(tree_digest, cancel, "Tree").await?;
            let mut digest_map: BTreeMap<DigestProto, Directory> = BTreeMap::new();
            for child in &tree.children {
                digest_map.insert(
                    crate::digest::make_message_digest(child, self.digest_function),
                    child.clone(),
                );
            }
            if let Some(root) = tree.root {
                add_from_directory(
                    &mut output_files,
                    &root,
                    &format!("{}/", output_directory.path),
                    &digest_map,
                );
            }
        }

        Ok(ExecuteActionResult {
            exit_code: result.exit_code,
            stdout_raw: result.stdout_raw,
            stdout_digest: result.stdout_digest,
            stderr_raw: result.stderr_raw,
            stderr_digest: result.stderr_digest,
            output_files,
        })
    }

    async fn cancel_operation(&self, operation_name: &str) {
        let mut client = self.operations.clone();
        let ctx = RequestContext::new();
        let request = ctx.wrap(CancelOperationRequest {
            name: operation_name.to_string(),
        });
        match client.cancel_operation(request).await {
            Ok(_) => log::info!("Cancelled job {operation_name}"),
            Err(status) => log::error!("Failed to cancel job {operation_name}: {status}"),
        }
    }
}

fn add_from_directory(
    output_files: &mut BTreeMap<String, OutputFileResult>,
    directory: &Directory,
    prefix: &str,
    digest_map: &BTreeMap<DigestProto, Directory>,
) {
    for file in &directory.files {
        output_files.insert(
            format!("{prefix}{}", file.name),
            OutputFileResult {
                digest: file.digest.clone().unwrap_or_default(),
                executable: file.is_executable,
            },
        );
    }
    for subdir in &directory.directories {
        let Some(digest) = &subdir.digest else { continue };
        if let Some(child) = digest_map.get(digest) {
            add_from_directory(
                output_files,
                child,
                &format!("{prefix}{}/", subdir.name),
                digest_map,
            );
        }
    }
}
