use std::io;

use thiserror::Error;

/// Failure of the readiness-polling primitive itself.
///
/// Fatal to the current [`dispatch`](crate::Multiplexer::dispatch) call; the
/// loop owner decides whether to abort or retry. An interrupted wait is not
/// an error and never surfaces as one.
#[derive(Debug, Error)]
#[error("readiness poll failed: {0}")]
pub struct MultiplexError(#[from] io::Error);

/// Failure of a single operation on a transport.
///
/// Surfaced through the owning socket's error subscription, never across the
/// multiplexer boundary. A transport error does not close the connection
/// implicitly; that decision belongs to the owner.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A receive attempt failed.
    #[error("unable to read from stream: {0}")]
    Recv(#[source] io::Error),
    /// A send attempt failed.
    #[error("unable to write to stream: {0}")]
    Send(#[source] io::Error),
    /// The blocking mode of the endpoint could not be changed.
    #[error("cannot set blocking mode: {0}")]
    Mode(#[source] io::Error),
    /// The operation was attempted on an already-closed endpoint.
    #[error("stream is closed")]
    Closed,
}
