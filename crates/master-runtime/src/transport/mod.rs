//! # Transport
//!
//! Length-prefixed JSON framing over any byte stream, plus the reader and
//! writer tasks that give a connection cancel-safe message queues.

pub mod codec;

pub use codec::{read_message, write_message, FrameError};

use shared_types::WireMessage;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Inbound queue depth. Frames are consumed one at a time, so a small
/// buffer is enough to decouple socket reads from message handling.
const INBOUND_CAPACITY: usize = 8;

/// Messages read from a connection. The last item is the error that ended
/// the stream, if any; a clean EOF simply closes the queue.
pub type Inbound = mpsc::Receiver<Result<WireMessage, FrameError>>;

/// Spawn a task that reads frames into a queue until EOF, error, or the
/// queue's receiver is dropped.
pub fn spawn_reader<R>(mut reader: R, max_len: usize) -> (Inbound, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
    let handle = tokio::spawn(async move {
        loop {
            match read_message(&mut reader, max_len).await {
                Ok(Some(message)) => {
                    if tx.send(Ok(message)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });
    (rx, handle)
}

/// Spawn a task that writes queued messages until every sender is dropped.
///
/// Stops at the first write error; later sends then fail with `Closed`.
pub fn spawn_writer<W>(
    mut writer: W,
    mut outbox: mpsc::Receiver<WireMessage>,
    max_len: usize,
) -> JoinHandle<Result<(), FrameError>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            if let Err(e) = write_message(&mut writer, &message, max_len).await {
                debug!(message = message.name(), error = %e, "Write failed, closing writer");
                return Err(e);
            }
        }
        // Lets the peer see EOF even while the read half is still alive.
        writer.shutdown().await?;
        Ok(())
    })
}
