//! # walletd-core
//!
//! Configuration, spec document, error mapping, and wire types for the
//! walletd client.

pub mod amount;
pub mod config;
pub mod errors;
pub mod spec;
pub mod types;

pub use config::{Config, ConfigError, ProxyDescriptor, ReconnectPolicy};
pub use errors::{ErrorKind, ErrorMapper, KindRegistry, MappedError, RequestError};
pub use spec::{SpecDocument, SpecError};
pub use types::{Event, Params, RpcRequest, RpcResponse, UpdateBatch};
