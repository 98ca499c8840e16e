//! Length-prefixed MessagePack framing over TCP, plus bind/connect helpers.

use std::marker::Unpin;
use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::utils::CacheSyncError;

/// Upper bound on a single frame's payload; anything larger is treated as a
/// corrupted stream.
const MAX_FRAME_LEN: u64 = 1 << 20;

/// Receives one raw frame payload from TCP readable connection `conn_read`,
/// using `read_buf` as buffer storage. Frames are an 8-byte big-endian length
/// followed by the payload. Bytes of a following frame that happen to arrive
/// early are kept in `read_buf`.
///
/// NOT cancellation-safe across partial frames: callers that wrap this in a
/// timeout must drop the connection when the timeout fires.
pub(crate) async fn frame_read_raw<Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<Bytes, CacheSyncError>
where
    Conn: AsyncReadExt + Unpin,
{
    // read length of payload first
    while read_buf.len() < 8 {
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(CacheSyncError::msg("connection closed by peer"));
        }
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&read_buf[..8]);
    let obj_len = u64::from_be_bytes(len_bytes);
    if obj_len > MAX_FRAME_LEN {
        return Err(CacheSyncError::msg(format!(
            "frame length {} exceeds limit",
            obj_len
        )));
    }

    // then read the payload itself
    #[allow(clippy::cast_possible_truncation)]
    let obj_end = 8 + obj_len as usize;
    if read_buf.capacity() < obj_end {
        read_buf.reserve(obj_end - read_buf.len());
    }
    while read_buf.len() < obj_end {
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(CacheSyncError::msg("connection closed mid-frame"));
        }
    }

    // split off bytes consumed by this frame, keeping any tail
    let mut frame = read_buf.split_to(obj_end);
    frame.advance(8);
    Ok(frame.freeze())
}

/// Receives an object of type `T` encoded as MessagePack in one frame.
pub(crate) async fn frame_read<T, Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<T, CacheSyncError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    let payload = frame_read_raw(read_buf, conn_read).await?;
    Ok(rmp_serde::decode::from_slice(&payload)?)
}

/// Sends an object of type `T` to TCP writable connection `conn_write` as
/// one frame, waiting until all bytes are written.
pub(crate) async fn frame_write<T, Conn>(
    conn_write: &mut Conn,
    obj: &T,
) -> Result<(), CacheSyncError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = rmp_serde::encode::to_vec(obj)?;
    let mut write_buf = BytesMut::with_capacity(8 + obj_bytes.len());
    write_buf.extend_from_slice(&(obj_bytes.len() as u64).to_be_bytes());
    write_buf.extend_from_slice(&obj_bytes);
    conn_write.write_all(&write_buf).await?;
    conn_write.flush().await?;
    Ok(())
}

/// Wrapper over `TcpSocket` binding with the socket options used by all
/// listeners in this crate.
pub(crate) fn tcp_bind(
    bind_addr: SocketAddr,
) -> Result<TcpListener, CacheSyncError> {
    let socket = if bind_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_nodelay(true)?;
    socket.bind(bind_addr)?;
    Ok(socket.listen(1024)?)
}

/// Connects to a peer given as a `host:port` string.
pub(crate) async fn tcp_connect(
    conn_addr: &str,
) -> Result<TcpStream, CacheSyncError> {
    let stream = TcpStream::connect(conn_addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
