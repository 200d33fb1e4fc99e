//! Session transport
//!
//! The controller only sees these traits: a [`Transport`] opens a connection
//! and hands back a [`TransportLink`] for outbound traffic, while inbound
//! traffic arrives through the [`TransportEvents`] sink given at connect time.

use futures_util::future::BoxFuture;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::error::NetworkError;
use crate::protocol::{EncodedChunk, ToolResponse, TransportEvent};

pub mod wire;
#[cfg(feature = "live")]
pub mod live;

#[cfg(feature = "live")]
pub use live::LiveTransport;

/// Outcome of a connect attempt
pub type ConnectFuture = BoxFuture<'static, Result<Arc<dyn TransportLink>, NetworkError>>;

/// Opens connections to the remote speech model
pub trait Transport: Send + Sync + 'static {
    /// Connect and complete the setup handshake.
    ///
    /// Resolving `Ok` means the connection is open. The future may be dropped
    /// at any point, which must abandon the attempt.
    fn connect(&self, config: &SessionConfig, events: TransportEvents) -> ConnectFuture;
}

/// Outbound side of an open connection
///
/// Sends are fire-and-forget and never fail synchronously, even once the
/// connection is gone.
pub trait TransportLink: Send + Sync {
    /// Queue one encoded capture frame
    fn send(&self, chunk: EncodedChunk);

    /// Return a tool result to the model
    fn send_tool_response(&self, response: ToolResponse);

    /// Request graceful shutdown without waiting for it
    fn close(&self);
}

/// Sink for inbound events, delivered in arrival order
#[derive(Clone)]
pub struct TransportEvents {
    sink: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportEvents {
    pub fn new(sink: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.sink)(event)
    }
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents").finish_non_exhaustive()
    }
}
