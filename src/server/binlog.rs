//! Remote binlog time RPC: the client side used by the lag tracker and the
//! servant side a master runs to answer it.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::server::GlobalStatus;
use crate::utils::{
    frame_read, frame_read_raw, frame_write, tcp_bind, tcp_connect,
    CacheSyncError,
};

use async_trait::async_trait;

use bytes::BytesMut;

use serde::{Deserialize, Serialize};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

/// Request message of the binlog time service.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum BinlogRequest {
    GetLastBinlogTime,
}

/// Reply message of the binlog time service.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum BinlogReply {
    /// `ret` is 0 on success, in which case `time` is valid.
    LastBinlogTime { ret: i32, time: u32 },
}

/// Failure kinds of a remote binlog time call.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum RemoteError {
    /// The peer answered with a non-zero status code.
    Status(i32),

    /// No reply within the per-call timeout.
    Timeout,

    /// Connecting, sending or receiving failed.
    Transport(String),

    /// The reply could not be decoded.
    Codec(String),
}

impl RemoteError {
    /// True if the peer was reached and answered, even if negatively.
    pub fn is_answered(&self) -> bool {
        matches!(self, RemoteError::Status(_))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RemoteError::Status(ret) => write!(f, "peer returned status {}", ret),
            RemoteError::Timeout => write!(f, "call timed out"),
            RemoteError::Transport(e) => write!(f, "transport error: {}", e),
            RemoteError::Codec(e) => write!(f, "codec error: {}", e),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<RemoteError> for CacheSyncError {
    fn from(e: RemoteError) -> Self {
        CacheSyncError::msg(e.to_string())
    }
}

/// Handle to a remote binlog time servant.
#[async_trait]
pub trait BinlogPeer: Send + Sync {
    /// Fetches the peer's latest binlog entry timestamp.
    async fn get_last_binlog_time(&mut self) -> Result<u32, RemoteError>;

    /// The address this handle talks to.
    fn addr(&self) -> &str;
}

/// Factory of peer handles. Opening a handle is lazy: no I/O happens until
/// the first call.
pub trait BinlogConnector: Send + Sync {
    fn open(&self, addr: &str, timeout: Duration) -> Box<dyn BinlogPeer>;
}

/// TCP connector producing `TcpBinlogPeer`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBinlogConnector;

impl BinlogConnector for TcpBinlogConnector {
    fn open(&self, addr: &str, timeout: Duration) -> Box<dyn BinlogPeer> {
        Box::new(TcpBinlogPeer::new(addr, timeout))
    }
}

/// Binlog time client over a lazily (re)established TCP connection.
pub struct TcpBinlogPeer {
    addr: String,
    timeout: Duration,
    conn: Option<TcpStream>,
    read_buf: BytesMut,
}

impl TcpBinlogPeer {
    pub fn new(addr: &str, timeout: Duration) -> Self {
        TcpBinlogPeer {
            addr: addr.into(),
            timeout,
            conn: None,
            read_buf: BytesMut::new(),
        }
    }

    /// One request-reply exchange, connecting first if needed.
    async fn call(
        &mut self,
        req: &BinlogRequest,
    ) -> Result<BinlogReply, RemoteError> {
        let transport = |e: CacheSyncError| RemoteError::Transport(e.to_string());
        if self.conn.is_none() {
            self.conn = Some(tcp_connect(&self.addr).await.map_err(transport)?);
            self.read_buf.clear();
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(RemoteError::Transport("not connected".into()));
        };
        frame_write(conn, req).await.map_err(transport)?;
        let payload = frame_read_raw(&mut self.read_buf, conn)
            .await
            .map_err(transport)?;
        rmp_serde::decode::from_slice(&payload)
            .map_err(|e| RemoteError::Codec(e.to_string()))
    }
}

#[async_trait]
impl BinlogPeer for TcpBinlogPeer {
    async fn get_last_binlog_time(&mut self) -> Result<u32, RemoteError> {
        let timeout = self.timeout;
        let result =
            time::timeout(timeout, self.call(&BinlogRequest::GetLastBinlogTime))
                .await
                .unwrap_or(Err(RemoteError::Timeout));
        match result {
            Ok(BinlogReply::LastBinlogTime { ret: 0, time }) => Ok(time),
            Ok(BinlogReply::LastBinlogTime { ret, .. }) => {
                Err(RemoteError::Status(ret))
            }
            Err(e) => {
                // drop the connection; a partial frame may be left behind
                self.conn = None;
                Err(e)
            }
        }
    }

    fn addr(&self) -> &str {
        &self.addr
    }
}

/// Binlog time servant answering `GetLastBinlogTime` with the local status's
/// latest binlog time. Run by a master so its slaves can measure lag.
pub struct BinlogTimeService {
    /// Actual bound address.
    local_addr: SocketAddr,

    /// Join handle of the acceptor task.
    acceptor_handle: JoinHandle<()>,

    tx_stop: watch::Sender<bool>,
}

impl BinlogTimeService {
    /// Binds the listener and spawns the acceptor task.
    pub async fn new_and_setup(
        bind_addr: SocketAddr,
        status: Arc<GlobalStatus>,
    ) -> Result<Self, CacheSyncError> {
        let listener = tcp_bind(bind_addr)?;
        let local_addr = listener.local_addr()?;
        pf_info!("binlog time service listening on '{}'", local_addr);

        let (tx_stop, rx_stop) = watch::channel(false);
        let acceptor_handle =
            tokio::spawn(Self::acceptor_task(listener, status, rx_stop));

        Ok(BinlogTimeService {
            local_addr,
            acceptor_handle,
            tx_stop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits for the acceptor task to exit. Connections
    /// already being served end when their peers disconnect.
    pub async fn shutdown(self) -> Result<(), CacheSyncError> {
        self.tx_stop.send(true)?;
        self.acceptor_handle.await?;
        Ok(())
    }

    async fn acceptor_task(
        listener: TcpListener,
        status: Arc<GlobalStatus>,
        mut rx_stop: watch::Receiver<bool>,
    ) {
        pf_debug!("binlog time acceptor task spawned");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            pf_debug!("binlog time client '{}' connected", peer);
                            tokio::spawn(Self::serve_conn(stream, status.clone()));
                        }
                        Err(e) => {
                            pf_warn!("error accepting binlog time client: {}", e);
                        }
                    }
                },

                _ = rx_stop.changed() => break,
            }
        }

        pf_debug!("binlog time acceptor task exited");
    }

    async fn serve_conn(mut stream: TcpStream, status: Arc<GlobalStatus>) {
        let mut read_buf = BytesMut::new();
        loop {
            let req: BinlogRequest =
                match frame_read(&mut read_buf, &mut stream).await {
                    Ok(req) => req,
                    Err(e) => {
                        pf_trace!("binlog time connection ended: {}", e);
                        return;
                    }
                };
            let reply = match req {
                BinlogRequest::GetLastBinlogTime => BinlogReply::LastBinlogTime {
                    ret: 0,
                    time: status.binlog_time_last(),
                },
            };
            if let Err(e) = frame_write(&mut stream, &reply).await {
                pf_warn!("error replying binlog time: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod binlog_tests {
    use super::*;
    use crate::server::ServerType;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn query_through_service() -> Result<(), CacheSyncError> {
        let status = Arc::new(GlobalStatus::new(ServerType::Master));
        status.update_last_binlog_time(4242);
        let service = BinlogTimeService::new_and_setup(
            "127.0.0.1:0".parse()?,
            status.clone(),
        )
        .await?;

        let addr = service.local_addr().to_string();
        let mut peer = TcpBinlogConnector.open(&addr, Duration::from_secs(1));
        assert_eq!(peer.addr(), addr);
        assert_eq!(peer.get_last_binlog_time().await?, 4242);
        status.update_last_binlog_time(4300);
        assert_eq!(peer.get_last_binlog_time().await?, 4300);

        service.shutdown().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_peer() -> Result<(), CacheSyncError> {
        // grab a free port, then close it again
        let listener = tcp_bind("127.0.0.1:0".parse()?)?;
        let addr = listener.local_addr()?.to_string();
        drop(listener);

        let mut peer = TcpBinlogPeer::new(&addr, Duration::from_secs(1));
        let err = peer.get_last_binlog_time().await.unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)));
        assert!(!err.is_answered());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn silent_peer_times_out() -> Result<(), CacheSyncError> {
        // accepts connections but never replies
        let listener = tcp_bind("127.0.0.1:0".parse()?)?;
        let addr = listener.local_addr()?.to_string();
        let _holder = tokio::spawn(async move {
            let mut conns = vec![];
            while let Ok((stream, _)) = listener.accept().await {
                conns.push(stream);
            }
        });

        let mut peer = TcpBinlogPeer::new(&addr, Duration::from_millis(200));
        assert_eq!(
            peer.get_last_binlog_time().await,
            Err(RemoteError::Timeout)
        );
        Ok(())
    }
}
