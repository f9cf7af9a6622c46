//! Error taxonomy for the recc core.
//!
//! Mirrors the exception hierarchy of the source implementation
//! (`subprocess_failed_error`, `PreconditionFail`, ad-hoc `runtime_error`s)
//! as a single enum so callers can match on `RecExecError` instead of
//! downcasting.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecExecError {
    /// The parsed command wasn't something recc can remote, and
    /// `force-remote` wasn't set. Not fatal: the caller should exec the
    /// original command locally.
    #[error("not a compiler command")]
    NotACompilerCommand,

    /// argv[0] has no `/` in it, so the remote side has no way to locate
    /// the executable inside its input root.
    #[error("argv[0] does not contain a relative or absolute path to an executable")]
    BadExecutable,

    /// The dependency probe (e.g. `gcc -M`) exited non-zero. The caller
    /// should fall back to running the real command locally so the user
    /// sees the actual compiler error.
    #[error("dependency probe exited with status {0}")]
    SubprocessFailed(i32),

    /// A file named by the dependency set could not be opened or read.
    /// Logged and skipped, not propagated as a hard failure.
    #[error("could not read file {0}")]
    UnreadableFile(PathBuf),

    /// The server's advertised capabilities don't include the digest
    /// function this client is configured to use.
    #[error("server does not support digest function {0}")]
    UnsupportedDigestFunction(String),

    /// The ByteStream `Write` call reported fewer committed bytes than
    /// were sent.
    #[error("upload of {path} short: sent {sent} bytes, server committed {committed}")]
    UploadShort {
        path: String,
        sent: i64,
        committed: i64,
    },

    /// An RPC failed after exhausting the retry budget.
    #[error("rpc failed with code {code}: {message}")]
    RpcFailed { code: tonic::Code, message: String },

    /// A blob fetched from CAS did not decode as the expected proto
    /// message.
    #[error("could not parse fetched blob as {0}")]
    ParseFailed(&'static str),

    /// SIGINT was observed while an `Execute` call was in flight.
    #[error("execution cancelled")]
    Cancelled,

    #[error("invalid working directory: {0}")]
    InvalidWorkingDirectory(String),

    /// The configured server/CAS endpoints couldn't be parsed or connected.
    #[error("invalid transport configuration: {0}")]
    InvalidTransportConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecExecError>;

impl From<tonic::Status> for RecExecError {
    fn from(status: tonic::Status) -> Self {
        RecExecError::RpcFailed {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl RecExecError {
    /// The process exit code this error should produce, per the CLI
    /// wrapper's exit-code table. `NotACompilerCommand` has no code of its
    /// own: callers handle it before it ever reaches `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            RecExecError::NotACompilerCommand => 100,
            RecExecError::BadExecutable => 101,
            RecExecError::SubprocessFailed(_) => 101,
            RecExecError::UnreadableFile(_) => 105,
            RecExecError::UnsupportedDigestFunction(_) => 103,
            RecExecError::UploadShort { .. } => 104,
            RecExecError::RpcFailed { .. } => 104,
            RecExecError::ParseFailed(_) => 104,
            RecExecError::Cancelled => 130,
            RecExecError::InvalidWorkingDirectory(_) => 102,
            RecExecError::InvalidTransportConfig(_) => 102,
            RecExecError::Io(_) => 105,
        }
    }
}
