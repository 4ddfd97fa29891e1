//! The byte-stream port the engine runs over.
//!
//! The engine never opens a transport itself: the caller hands over any
//! full-duplex stream that is already open. The read half goes to the reader
//! task, the write half becomes the shared writer slot.

use tokio::io::{AsyncRead, AsyncWrite};

/// A full-duplex byte stream to a board.
///
/// Implemented for every tokio stream type: `TcpStream`, `DuplexStream`,
/// serial port adapters, and so on.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Read half owned by the reader task.
pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half stored in the shared writer slot.
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) fn split<T: Transport>(transport: T) -> (BoxedReader, BoxedWriter) {
    let (read_half, write_half) = tokio::io::split(transport);
    (Box::new(read_half), Box::new(write_half))
}
