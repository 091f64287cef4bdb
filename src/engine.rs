//! Request/acknowledge link to the engine process.
//!
//! Outbound requests use the lazy-pirate shape: write one JSON line, wait a
//! bounded time for an acknowledgment line, and on silence tear the
//! connection down, rebuild it, and resend, up to the retry limit. Failure
//! is always reported to the caller as a boolean; the rotation simply keeps
//! going with stale data and tries again next time.
//!
//! Inbound, the engine can initiate communication at any time (game
//! announcements, pause state, game lists), so a separate listener accepts
//! its connections, acks every request immediately, and applies the payload
//! to shared state.

use crate::config::LinkConfig;
use crate::protocol::{EngineInbound, EngineRequest};
use crate::state::RotationState;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("retry limit of {0} exhausted")]
    RetriesExhausted(u32),
}

pub struct EngineLink {
    /// Peer address as "host:port"; swapped on reconfiguration
    peer: RwLock<String>,
    ack_timeout: Duration,
    retries: u32,
    /// Cached outbound connection; dropped on any failed attempt
    conn: Mutex<Option<BufReader<TcpStream>>>,
    listen_port: watch::Sender<u16>,
}

impl EngineLink {
    pub fn new(config: &LinkConfig) -> Arc<Self> {
        let (listen_port, _) = watch::channel(config.listen_port);
        Arc::new(Self {
            peer: RwLock::new(config.peer_addr()),
            ack_timeout: config.ack_timeout,
            retries: config.retries,
            conn: Mutex::new(None),
            listen_port,
        })
    }

    /// Point outbound requests at a different peer. Only the outbound socket
    /// is affected; the listener keeps running.
    pub async fn set_peer(&self, host: &str, port: u16) {
        *self.peer.write().await = format!("{}:{}", host, port);
        // Next send reconnects
        self.conn.lock().await.take();
    }

    /// Move the inbound listener to a different port. Only the listener
    /// socket is rebuilt; in-flight sends are unaffected.
    pub fn set_listen_port(&self, port: u16) {
        let _ = self.listen_port.send(port);
    }

    /// Send one request and wait for its acknowledgment.
    ///
    /// Bounded by `ack_timeout` per attempt times the retry limit; never
    /// blocks indefinitely. Returns whether the peer acknowledged.
    pub async fn send(&self, request: &EngineRequest) -> bool {
        match self.send_inner(request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "engine send failed");
                false
            }
        }
    }

    async fn send_inner(&self, request: &EngineRequest) -> Result<(), LinkError> {
        let payload = serde_json::to_string(request)?;
        let mut conn = self.conn.lock().await;

        for attempt in 1..=self.retries {
            if attempt > 1 {
                tracing::debug!(attempt, "resending after rebuilding connection");
            }
            if conn.is_none() {
                let addr = self.peer.read().await.clone();
                match timeout(self.ack_timeout, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => *conn = Some(BufReader::new(stream)),
                    Ok(Err(e)) => {
                        tracing::debug!(addr = %addr, error = %e, "connect failed");
                        continue;
                    }
                    Err(_) => {
                        tracing::debug!(addr = %addr, "connect timed out");
                        continue;
                    }
                }
            }

            let Some(stream) = conn.as_mut() else {
                continue;
            };
            let exchange = async {
                stream.get_mut().write_all(payload.as_bytes()).await?;
                stream.get_mut().write_all(b"\n").await?;
                let mut ack = String::new();
                if stream.read_line(&mut ack).await? == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "peer closed before acknowledging",
                    ));
                }
                Ok::<(), std::io::Error>(())
            };
            match timeout(self.ack_timeout, exchange).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    tracing::debug!(attempt, error = %e, "exchange failed");
                    conn.take();
                }
                Err(_) => {
                    tracing::debug!(attempt, "no acknowledgment within timeout");
                    conn.take();
                }
            }
        }

        // Connection stays torn down so the next send starts fresh
        Err(LinkError::RetriesExhausted(self.retries))
    }
}

/// Spawn the worker that owns the outbound side of the link. The scheduler
/// hands requests over an mpsc so the bounded-but-blocking retry loop never
/// runs on the tick path.
pub fn spawn_sender_worker(
    link: Arc<EngineLink>,
    state: RotationState,
    mut requests: mpsc::UnboundedReceiver<EngineRequest>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = state.shutdown_rx();
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let acked = link.send(&request).await;
                    state.rotation.write().await.engine_connected = acked;
                    if !acked {
                        tracing::warn!("engine unreachable, rotation proceeds with stale data");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("engine sender worker exited");
    })
}

/// Spawn the inbound listener. Rebinds whenever the configured listen port
/// changes; exits when the shutdown flag flips.
pub fn spawn_listener(link: Arc<EngineLink>, state: RotationState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown = state.shutdown_rx();
        let mut port_rx = link.listen_port.subscribe();
        loop {
            let port = *port_rx.borrow_and_update();
            let listener = match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!(port, error = %e, "engine listener bind failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() { return; }
                            continue;
                        }
                    }
                }
            };
            tracing::info!(port, "listening for engine requests");

            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                tracing::debug!(%addr, "engine peer connected");
                                tokio::spawn(handle_peer(stream, state.clone()));
                            }
                            Err(e) => tracing::warn!(error = %e, "accept failed"),
                        }
                    }
                    changed = port_rx.changed() => {
                        if changed.is_err() { return; }
                        tracing::info!("listen port changed, rebinding");
                        break;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() { return; }
                    }
                }
            }
        }
    })
}

/// Serve one inbound engine connection: ack every line immediately, then
/// apply the payload to shared state.
async fn handle_peer(stream: TcpStream, state: RotationState) {
    let mut shutdown = state.shutdown_rx();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                // Ack first; the peer must never wait on our processing
                if write_half.write_all(b"{}\n").await.is_err() {
                    break;
                }
                match serde_json::from_str::<EngineInbound>(&line) {
                    Ok(message) => state.apply_engine_inbound(message).await,
                    Err(e) => tracing::warn!(error = %e, "unparseable engine request"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() { break; }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RotationConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_link(peer_port: u16, retries: u32) -> Arc<EngineLink> {
        let mut config = LinkConfig::default();
        config.peer_host = "127.0.0.1".to_string();
        config.peer_port = peer_port;
        config.retries = retries;
        config.ack_timeout = Duration::from_millis(100);
        EngineLink::new(&config)
    }

    /// A peer that accepts but never acknowledges must produce failure
    /// after exactly the retry limit, without blocking.
    #[tokio::test]
    async fn test_send_fails_after_exact_retry_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicU32::new(0));
        let counter = connections.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                // Hold the socket open, read nothing, say nothing
                held.push(stream);
            }
        });

        let link = test_link(port, 3);
        let start = std::time::Instant::now();
        let acked = link
            .send(&EngineRequest::GameInfo { game: true })
            .await;
        assert!(!acked);
        assert_eq!(connections.load(Ordering::SeqCst), 3);
        // 3 attempts at 100ms each, plus slack; nowhere near unbounded
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_send_succeeds_when_peer_acks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let value: serde_json::Value = serde_json::from_str(&line).unwrap();
                assert_eq!(value["winner"], "Moon Gravity");
                write_half.write_all(b"{}\n").await.unwrap();
            }
        });

        let link = test_link(port, 3);
        let acked = link
            .send(&EngineRequest::Winner {
                winner: "Moon Gravity".to_string(),
                time: 180.0,
            })
            .await;
        assert!(acked);

        // Cached connection is reused for the next request
        let acked = link
            .send(&EngineRequest::Winner {
                winner: "Moon Gravity".to_string(),
                time: 180.0,
            })
            .await;
        assert!(acked);
    }

    #[tokio::test]
    async fn test_send_fails_fast_with_no_peer() {
        // Nothing listens on this port
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let link = test_link(port, 2);
        assert!(!link.send(&EngineRequest::GameInfo { game: true }).await);
    }

    #[tokio::test]
    async fn test_set_peer_redirects_next_send() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            if let Ok(Some(_)) = lines.next_line().await {
                write_half.write_all(b"{}\n").await.unwrap();
            }
        });

        let link = test_link(dead_port, 1);
        assert!(!link.send(&EngineRequest::GameInfo { game: true }).await);

        link.set_peer("127.0.0.1", live_port).await;
        assert!(link.send(&EngineRequest::GameInfo { game: true }).await);
    }

    #[tokio::test]
    async fn test_listener_rebinds_on_port_change() {
        let (state, _admin_rx) = RotationState::new(RotationConfig::default());

        // Two free ports, found by binding and releasing
        let probe1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port1 = probe1.local_addr().unwrap().port();
        let probe2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port2 = probe2.local_addr().unwrap().port();
        drop(probe1);
        drop(probe2);

        let mut config = LinkConfig::default();
        config.listen_port = port1;
        let link = EngineLink::new(&config);
        spawn_listener(link.clone(), state.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The engine reaches us on the first port
        let stream = TcpStream::connect(("127.0.0.1", port1)).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut first_conn = BufReader::new(read_half).lines();
        write_half.write_all(b"{\"pause\": true}\n").await.unwrap();
        assert_eq!(first_conn.next_line().await.unwrap().unwrap(), "{}");

        link.set_listen_port(port2);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The established connection keeps being served across the rebind
        write_half.write_all(b"{\"pause\": false}\n").await.unwrap();
        assert_eq!(first_conn.next_line().await.unwrap().unwrap(), "{}");

        // And new connections land on the new port
        let stream = TcpStream::connect(("127.0.0.1", port2)).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut second_conn = BufReader::new(read_half).lines();
        write_half.write_all(b"{\"pause\": true}\n").await.unwrap();
        assert_eq!(second_conn.next_line().await.unwrap().unwrap(), "{}");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.rotation.read().await.paused);

        state.request_shutdown();
    }

    #[tokio::test]
    async fn test_inbound_peer_is_acked_and_applied() {
        let (state, _admin_rx) = RotationState::new(RotationConfig::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_state = state.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_peer(stream, server_state).await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"{\"pause\": true}\n").await.unwrap();
        let ack = lines.next_line().await.unwrap().unwrap();
        assert_eq!(ack, "{}");

        // The ack came back; give the state write a moment to land
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.rotation.read().await.paused);

        // Garbage is acked too, and does not kill the connection
        write_half.write_all(b"not json\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "{}");
        write_half.write_all(b"{\"pause\": false}\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "{}");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!state.rotation.read().await.paused);
    }
}
