//! CAS client: capability negotiation, `FindMissingBlobs`, batched/streamed
//! upload, and streamed download, grounded on
//! `original_source/src/casclient.cpp`.
//!
//! Design note §9: the source's execution client inherits from `CASClient`.
//! Here the two hold a shared channel/instance name and compose instead —
//! `ExecutionClient` takes a `&CasClient` rather than extending it.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use prost::Message;
use tonic::transport::Channel;
use uuid::Uuid;

use crate::digest::DigestFunction;
use crate::errors::{RecExecError, Result};
use crate::reapi_proto::build::bazel::remote::execution::v2::{
    batch_update_blobs_request::Request as BatchRequestEntry,
    capabilities_client::CapabilitiesClient,
    content_addressable_storage_client::ContentAddressableStorageClient, BatchUpdateBlobsRequest,
    Digest as DigestProto, FindMissingBlobsRequest, GetCapabilitiesRequest,
};
use crate::reapi_proto::google::bytestream::byte_stream_client::ByteStreamClient;
use crate::reapi_proto::google::bytestream::{ReadRequest, WriteRequest};

use super::context::RequestContext;
use super::retry;

const BYTE_STREAM_CHUNK_SIZE_BYTES: usize = 1024 * 1024;
const DEFAULT_MAX_BATCH_TOTAL_SIZE_BYTES: i64 = 2 * 1024 * 1024;
const MAX_MISSING_BLOBS_REQUEST_ITEMS: usize = 16_384;

pub struct CasClient {
    cas: ContentAddressableStorageClient<Channel>,
    byte_stream: ByteStreamClient<Channel>,
    capabilities: CapabilitiesClient<Channel>,
    instance_name: String,
    upload_guid: String,
    max_batch_total_size_bytes: i64,
    retry_limit: u32,
    retry_delay: Duration,
}

impl CasClient {
    pub fn new(channel: Channel, instance_name: String, retry_limit: u32, retry_delay: Duration) -> Self {
        CasClient {
            cas: ContentAddressableStorageClient::new(channel.clone()),
            byte_stream: ByteStreamClient::new(channel.clone()),
            capabilities: CapabilitiesClient::new(channel),
            instance_name,
            upload_guid: Uuid::new_v4().to_string(),
            max_batch_total_size_bytes: DEFAULT_MAX_BATCH_TOTAL_SIZE_BYTES,
            retry_limit,
            retry_delay,
        }
    }

    /// Fetch the server's cache capabilities and (a) lower the client's
    /// batch cap if the server advertises a smaller one, (b) fail fast if
    /// `function` isn't in the server's supported set.
    pub async fn negotiate_capabilities(
        &mut self,
        function: DigestFunction,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let instance = self.instance_name.clone();
        let mut client = self.capabilities.clone();
        let ctx = RequestContext::new();
        let response = retry::retry(self.retry_limit, self.retry_delay, cancel, move |_n| {
            let mut client = client.clone();
            let request = ctx.wrap(GetCapabilitiesRequest {
                instance_name: instance.clone(),
            });
            async move { client.get_capabilities(request).await.map(|r| r.into_inner()) }
        })
        .await;

        let capabilities = match response {
            Ok(c) => c,
            // Matches the source: capability fetch failure is non-fatal,
            // the client just keeps its defaults.
            Err(_) => return Ok(()),
        };

        if let Some(cache_capabilities) = capabilities.cache_capabilities {
            let server_max = cache_capabilities.max_batch_total_size_bytes;
            if server_max > 0 && server_max < self.max_batch_total_size_bytes {
                self.max_batch_total_size_bytes = server_max;
            }

            let proto_function = function.to_proto() as i32;
            if !cache_capabilities.digest_function.contains(&proto_function) {
                return Err(RecExecError::UnsupportedDigestFunction(function.name().to_string()));
            }
        }

        Ok(())
    }

    fn upload_resource_name(&self, digest: &DigestProto) -> String {
        let mut name = self.instance_name.clone();
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(&format!(
            "uploads/{}/blobs/{}/{}",
            self.upload_guid, digest.hash, digest.size_bytes
        ));
        name
    }

    fn download_resource_name(&self, digest: &DigestProto) -> String {
        let mut name = self.instance_name.clone();
        if !name.is_empty() {
            name.push('/');
        }
        name.push_str(&format!("blobs/{}/{}", digest.hash, digest.size_bytes));
        name
    }

    /// Upload a single blob via the ByteStream API unconditionally (used
    /// both for over-cap blobs in a batch upload and directly by callers
    /// that just want to push one blob).
    pub async fn upload_blob(
        &self,
        digest: &DigestProto,
        blob: &[u8],
        cancel: &AtomicBool,
    ) -> Result<()> {
        let resource_name = self.upload_resource_name(digest);
        let blob = blob.to_vec();
        let expected_len = blob.len() as i64;
        let mut client = self.byte_stream.clone();
        let ctx = RequestContext::new();

        let committed = retry::retry(self.retry_limit, self.retry_delay, cancel, move |_n| {
            let mut client = client.clone();
            let resource_name = resource_name.clone();
            let blob = blob.clone();
            let ctx = ctx.clone();
            async move {
                let chunks = chunked_write_requests(&resource_name, &blob);
                let stream = tokio_stream::iter(chunks);
                let request = ctx.wrap(stream);
                let response = client.write(request).await?.into_inner();
                Ok(response.committed_size)
            }
        })
        .await?;

        if committed != expected_len {
            return Err(RecExecError::UploadShort {
                path: resource_name_debug(digest),
                sent: expected_len,
                committed,
            });
        }
        Ok(())
    }

    /// Download a blob's full contents via the ByteStream API.
    pub async fn fetch_blob(&self, digest: &DigestProto, cancel: &AtomicBool) -> Result<Vec<u8>> {
        let resource_name = self.download_resource_name(digest);
        let mut client = self.byte_stream.clone();
        let ctx = RequestContext::new();

        retry::retry(self.retry_limit, self.retry_delay, cancel, move |_n| {
            let mut client = client.clone();
            let resource_name = resource_name.clone();
            let ctx = ctx.clone();
            async move {
                let request = ctx.wrap(ReadRequest {
                    resource_name,
                    read_offset: 0,
                    read_limit: 0,
                });
                let mut stream = client.read(request).await?.into_inner();
                let mut result = Vec::new();
                use tokio_stream::StreamExt;
                while let Some(chunk) = stream.next().await {
                    result.extend_from_slice(&chunk?.data);
                }
                Ok(result)
            }
        })
        .await
    }

    /// Download a blob and parse it as `T`.
    pub async fn fetch_message<T: Message + Default>(
        &self,
        digest: &DigestProto,
        cancel: &AtomicBool,
        type_name: &'static str,
    ) -> Result<T> {
        let bytes = self.fetch_blob(digest, cancel).await?;
        T::decode(bytes.as_slice()).map_err(|_| RecExecError::ParseFailed(type_name))
    }

    async fn find_missing(
        &self,
        digests: &[DigestProto],
        cancel: &AtomicBool,
    ) -> Result<HashSet<DigestProto>> {
        let mut missing = HashSet::new();
        for chunk in digests.chunks(MAX_MISSING_BLOBS_REQUEST_ITEMS) {
            let instance = self.instance_name.clone();
            let chunk = chunk.to_vec();
            let mut client = self.cas.clone();
            let ctx = RequestContext::new();
            let response = retry::retry(self.retry_limit, self.retry_delay, cancel, move |_n| {
                let mut client = client.clone();
                let request = ctx.wrap(FindMissingBlobsRequest {
                    instance_name: instance.clone(),
                    blob_digests: chunk.clone(),
                });
                async move { client.find_missing_blobs(request).await.map(|r| r.into_inner()) }
            })
            .await?;
            missing.extend(response.missing_blob_digests);
        }
        Ok(missing)
    }

    /// Upload every blob in `blobs` / `file_contents` that the server
    /// reports as missing: small blobs batched via `BatchUpdateBlobs`,
    /// oversized ones via the streamed ByteStream `Write`.
    pub async fn upload_resources(
        &self,
        blobs: &BTreeMap<DigestProto, Vec<u8>>,
        file_contents: &BTreeMap<DigestProto, Vec<u8>>,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let all_digests: Vec<DigestProto> = blobs
            .keys()
            .chain(file_contents.keys())
            .cloned()
            .collect();
        if all_digests.is_empty() {
            return Ok(());
        }

        let missing = self.find_missing(&all_digests, cancel).await?;

        let mut batch: Vec<BatchRequestEntry> = Vec::new();
        let mut batch_size: i64 = 0;

        for digest in &all_digests {
            if !missing.contains(digest) {
                continue;
            }
            let data = blobs
                .get(digest)
                .or_else(|| file_contents.get(digest))
                .expect("digest came from blobs/file_contents keys")
                .clone();

            if digest.size_bytes > self.max_batch_total_size_bytes {
                self.upload_blob(digest, &data, cancel).await?;
                continue;
            }

            if digest.size_bytes + batch_size > self.max_batch_total_size_bytes && !batch.is_empty() {
                self.flush_batch(std::mem::take(&mut batch), cancel).await?;
                batch_size = 0;
            }

            batch_size += digest.size_bytes;
            batch.push(BatchRequestEntry {
                digest: Some(digest.clone()),
                data,
            });
        }

        if !batch.is_empty() {
            self.flush_batch(batch, cancel).await?;
        }
        Ok(())
    }

    async fn flush_batch(&self, requests: Vec<BatchRequestEntry>, cancel: &AtomicBool) -> Result<()> {
        let instance = self.instance_name.clone();
        let mut client = self.cas.clone();
        let ctx = RequestContext::new();
        let response = retry::retry(self.retry_limit, self.retry_delay, cancel, move |_n| {
            let mut client = client.clone();
            let request = ctx.wrap(BatchUpdateBlobsRequest {
                instance_name: instance.clone(),
                requests: requests.clone(),
            });
            async move { client.batch_update_blobs(request).await.map(|r| r.into_inner()) }
        })
        .await?;

        for entry in response.responses {
            if let Some(status) = &entry.status {
                if status.code != 0 {
                    return Err(RecExecError::RpcFailed {
                        code: tonic::Code::from_i32(status.code),
                        message: status.message.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn chunked_write_requests(resource_name: &str, blob: &[u8]) -> Vec<WriteRequest> {
    if blob.is_empty() {
        return vec![WriteRequest {
            resource_name: resource_name.to_string(),
            write_offset: 0,
            finish_write: true,
            data: Vec::new(),
        }];
    }
    let mut requests = Vec::new();
    let mut offset = 0usize;
    while offset < blob.len() {
        let end = (offset + BYTE_STREAM_CHUNK_SIZE_BYTES).min(blob.len());
        let finish = end == blob.len();
        requests.push(WriteRequest {
            resource_name: if offset == 0 {
                resource_name.to_string()
            } else {
                String::new()
            },
            write_offset: offset as i64,
            finish_write: finish,
            data: blob[offset..end].to_vec(),
        });
        offset = end;
    }
    requests
}

fn resource_name_debug(digest: &DigestProto) -> String {
    crate::digest::human_form(digest)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chunked_write_requests_single_chunk() {
        let requests = chunked_write_requests("name", b"hello");
        assert_eq!(requests.len(), 1);
        assert!(requests[0].finish_write);
        assert_eq!(requests[0].resource_name, "name");
    }

    #[test]
    fn test_chunked_write_requests_splits_at_chunk_size() {
        let blob = vec![0u8; BYTE_STREAM_CHUNK_SIZE_BYTES + 10];
        let requests = chunked_write_requests("name", &blob);
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].finish_write);
        assert!(requests[1].finish_write);
        assert_eq!(requests[1].resource_name, "");
        assert_eq!(requests[1].write_offset, BYTE_STREAM_CHUNK_SIZE_BYTES as i64);
    }
}
