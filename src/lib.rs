//! recc: a transparent remote-execution shim for C/C++ compiler
//! invocations. See individual modules for the pipeline stage each one
//! implements (spec §4): parse the command, resolve its dependencies,
//! build a Merkle tree of the input root, and talk REAPI to run it on a
//! build farm, falling back to local execution wherever remoting isn't
//! possible or doesn't pay off.

pub mod actionbuilder;
pub mod config;
pub mod deps;
pub mod digest;
pub mod errors;
pub mod logging;
pub mod merklize;
pub mod parsedcommand;
pub mod path_utils;
pub mod reapi_proto;
pub mod reccfile;
pub mod signalhandling;
pub mod transport;

pub use config::Config;
pub use errors::{RecExecError, Result};
