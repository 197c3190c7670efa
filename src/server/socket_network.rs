//! Socket Network Layer: framed I/O for a single connection.
//!
//! Reading and writing are separate futures. A reader stalled on a full inbound
//! channel never stops outbound frames from reaching the socket, so a session
//! waiting to queue a response always makes progress while the peer reads.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::server::protocol::{FanoutCodec, InboundFrame, OutboundFrame, ParseError};

/// Runs both halves until the peer closes or the session drops its outbound sender.
///
/// After the peer stops sending, frames already queued for it are still written.
pub async fn run_socket<R, W>(
    reader: R,
    writer: W,
    inbound_tx: mpsc::Sender<InboundFrame>,
    outbound_rx: mpsc::Receiver<OutboundFrame>,
) -> Result<(), ParseError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let read = read_frames(reader, inbound_tx);
    let write = write_frames(writer, outbound_rx);
    tokio::pin!(read, write);

    tokio::select! {
        read_result = &mut read => {
            read_result?;
            write.await
        }
        write_result = &mut write => write_result,
    }
}

/// Decodes frames into `inbound_tx`. Ends on EOF or when the session stops listening.
async fn read_frames<R>(reader: R, inbound_tx: mpsc::Sender<InboundFrame>) -> Result<(), ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, FanoutCodec::new());

    while let Some(frame) = frames.next().await {
        if inbound_tx.send(frame?).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Encodes everything sent on `outbound_rx` until every sender is gone.
async fn write_frames<W>(writer: W, mut outbound_rx: mpsc::Receiver<OutboundFrame>) -> Result<(), ParseError>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, FanoutCodec::new());

    while let Some(frame) = outbound_rx.recv().await {
        sink.feed(frame).await?;
        // Batch whatever is already queued into a single flush.
        while let Ok(frame) = outbound_rx.try_recv() {
            sink.feed(frame).await?;
        }
        sink.flush().await?;
    }
    Ok(())
}
