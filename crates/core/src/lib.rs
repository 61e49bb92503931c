//! tfengine Core - Core types and traits for the tfengine execution engine.

mod config;
mod error;
mod request;
mod response;
mod sink;

pub use config::{Chunking, EngineConfig, EnvPolicy};
pub use error::{EngineError, Result, StartError, TransportFault};
pub use request::{ExecutionRequest, InitRequest, ShutdownRequest};
pub use response::{
    ExecutionResult, OutputChunk, ResponseUnit, START_FAILURE_CODE, STATUS_UNAVAILABLE_CODE,
    StreamKind, WireResponse,
};
pub use sink::{CollectingSink, ResponseSink};
