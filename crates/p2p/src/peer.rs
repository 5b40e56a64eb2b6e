use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use protocol::{checksum, parse_command, NetworkAddress, NetworkMessage, ProtocolError, MAGIC};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionState, Mode};
use crate::error::NetworkError;
use crate::handler::{HandlerInner, PeerId};

const FRAME_HEADER_LENGTH: usize = 24;

/// Read one frame: fixed header, then the checksummed payload.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    max_payload: usize,
) -> Result<NetworkMessage, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LENGTH];
    reader.read_exact(&mut header).await?;
    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic).into());
    }
    let command = parse_command(&header[4..16])?;
    let length = u32::from_be_bytes([header[16], header[17], header[18], header[19]]) as usize;
    if length > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            length,
            limit: max_payload,
        }
        .into());
    }
    let mut expected = [0u8; 4];
    expected.copy_from_slice(&header[20..24]);
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    if checksum(&payload) != expected {
        return Err(ProtocolError::ChecksumMismatch.into());
    }
    Ok(NetworkMessage::decode(&command, &payload)?)
}

pub(crate) async fn write_frame<W>(
    writer: &mut W,
    message: &NetworkMessage,
) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.to_frame()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Register a connection for the stream and spawn its I/O loops.
pub(crate) async fn spawn_peer<S>(
    inner: Arc<HandlerInner>,
    stream: S,
    mode: Mode,
    peer_addr: SocketAddr,
) -> Result<PeerId, NetworkError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let config = inner.ctx.config();
    let node = NetworkAddress::new(peer_addr, config.primary_stream());
    let connection = Connection::new(
        inner.ctx.clone(),
        inner.relay(),
        mode,
        node,
        inner.common_requested.clone(),
        None,
    );
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue);
    let peer_id = inner.register(connection, outbound_tx, peer_addr)?;
    // Client mode has its version frame queued already.
    inner.flush(peer_id);

    let (reader, writer) = tokio::io::split(stream);
    tokio::spawn(read_loop(inner.clone(), peer_id, reader));
    tokio::spawn(write_loop(inner.clone(), peer_id, writer, outbound_rx));
    Ok(peer_id)
}

async fn read_loop<S>(inner: Arc<HandlerInner>, peer_id: PeerId, mut reader: ReadHalf<S>)
where
    S: AsyncRead + AsyncWrite,
{
    let max_payload = inner.ctx.config().max_message_size;
    loop {
        match read_frame(&mut reader, max_payload).await {
            Ok(message) => {
                if !inner.deliver(peer_id, message) {
                    break;
                }
            }
            Err(err) => {
                debug!(%peer_id, error = %err, "peer read loop exiting");
                inner.disconnect_peer(peer_id, &err.to_string());
                break;
            }
        }
    }
}

async fn write_loop<S>(
    inner: Arc<HandlerInner>,
    peer_id: PeerId,
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::Receiver<NetworkMessage>,
) where
    S: AsyncRead + AsyncWrite,
{
    while let Some(message) = outbound.recv().await {
        if let Err(err) = write_frame(&mut writer, &message).await {
            warn!(%peer_id, error = %err, "failed to send frame");
            inner.disconnect_peer(peer_id, &err.to_string());
            break;
        }
    }
}

/// Drive a sync-mode connection to completion on the current task.
///
/// Frames are read by a helper task feeding a channel, so the one-second
/// idle poll cannot tear a frame in half; aborting that task is the
/// cancellation point.
pub(crate) async fn run_sync<S>(
    inner: &Arc<HandlerInner>,
    stream: S,
    peer_addr: SocketAddr,
    timeout_seconds: i64,
) -> Result<(), NetworkError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let config = inner.ctx.config();
    let max_payload = config.max_message_size;
    let node = NetworkAddress::new(peer_addr, config.primary_stream());
    let mut connection = Connection::new(
        inner.ctx.clone(),
        inner.relay(),
        Mode::Sync,
        node,
        inner.common_requested.clone(),
        Some(timeout_seconds),
    );

    let (mut reader, mut writer) = tokio::io::split(stream);
    let (frames_tx, mut frames) = mpsc::channel(64);
    let reader_task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader, max_payload).await {
                Ok(message) => {
                    if frames_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "sync read loop exiting");
                    break;
                }
            }
        }
    });

    let result = 'exchange: loop {
        for message in connection.take_outbound() {
            if let Err(err) = write_frame(&mut writer, &message).await {
                break 'exchange Err(err);
            }
        }
        let received = tokio::time::timeout(Duration::from_secs(1), frames.recv()).await;
        let message = match received {
            Ok(Some(message)) => Some(message),
            Ok(None) => break 'exchange Ok(()),
            Err(_) => None,
        };
        if let Some(message) = &message {
            if let Err(err) = connection.handle_message(message.clone()) {
                connection.disconnect();
                break 'exchange Err(NetworkError::Node(err));
            }
        }
        if connection.sync_finished(message.as_ref()) {
            break 'exchange Ok(());
        }
        if connection.state() == ConnectionState::Disconnected {
            break 'exchange Ok(());
        }
    };

    reader_task.abort();
    connection.disconnect();
    result
}
