pub mod bridge;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod mock;

pub use bridge::BridgeTransport;
pub use error::{GatewayError, PipelineError, TransportError};
pub use media::MediaStore;
pub use pipeline::{ConnectionSource, ForwardRoute, MessagePipeline, Outcome};
pub use registry::{RegistryConfig, SessionRegistry};
pub use transport::{Connection, EventStream, Transport};
