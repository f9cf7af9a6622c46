//! gRPC channel construction, grounded on
//! `original_source/src/grpcchannels.cpp`: one channel for the execution
//! server, one for CAS, both sharing the same TLS/plaintext policy.

use tonic::transport::{Channel, Endpoint};

use crate::config::Config;
use crate::errors::{RecExecError, Result};

/// Channels to the two logical endpoints a recc invocation talks to. Most
/// deployments point both at the same address; the config surface (spec
/// §6) allows them to differ so CAS traffic can be routed separately.
pub struct Channels {
    pub server: Channel,
    pub cas: Channel,
}

impl Channels {
    pub async fn connect(config: &Config) -> Result<Self> {
        let server = build_endpoint(&config.server)?
            .connect()
            .await
            .map_err(|e| invalid_transport(&config.server, e))?;
        let cas = if config.cas_server == config.server {
            server.clone()
        } else {
            build_endpoint(&config.cas_server)?
                .connect()
                .await
                .map_err(|e| invalid_transport(&config.cas_server, e))?
        };
        Ok(Channels { server, cas })
    }
}

fn build_endpoint(address: &str) -> Result<Endpoint> {
    Endpoint::from_shared(address.to_string())
        .map_err(|e| RecExecError::InvalidTransportConfig(format!("bad server address: {e}")))
}

fn invalid_transport(address: &str, error: tonic::transport::Error) -> RecExecError {
    RecExecError::InvalidTransportConfig(format!("could not connect to {address}: {error}"))
}
