use crate::distance::DistanceTable;
use crate::neighbor::NeighborTable;
use crate::wire::{self, Message};
use crate::NodeId;
use anyhow::Context;
use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;

pub const PROTOCOL_PORT: u16 = 5555;
pub const HELLO_INTERVAL: Duration = Duration::from_secs(5);
pub const NEIGHBOR_TIMEOUT: Duration = Duration::from_secs(10);

const RECV_BUF_LEN: usize = 512;
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The running protocol instance: one broadcast socket shared by a
/// periodic sender task and a blocking receiver task, plus the two
/// tables they cooperate through.
pub struct Daemon {
    local_ip: NodeId,
    socket: Arc<UdpSocket>,
    broadcast_addr: SocketAddr,
    neighbors: Arc<Mutex<NeighborTable>>,
    routes: Arc<Mutex<DistanceTable>>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
    /// Bind the shared socket on the protocol port and build both tables.
    /// Fails when the socket cannot be created, configured, or bound.
    pub fn bind(local_ip: NodeId) -> anyhow::Result<Self> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, PROTOCOL_PORT);
        let broadcast_addr = SocketAddrV4::new(Ipv4Addr::BROADCAST, PROTOCOL_PORT);
        Self::bind_to(local_ip, bind_addr, broadcast_addr.into())
    }

    fn bind_to(
        local_ip: NodeId,
        bind_addr: SocketAddrV4,
        broadcast_addr: SocketAddr,
    ) -> anyhow::Result<Self> {
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("failed to create UDP socket")?;
        raw.set_reuse_address(true)?;
        #[cfg(unix)]
        raw.set_reuse_port(true)?;
        raw.set_broadcast(true)
            .context("failed to enable SO_BROADCAST")?;
        raw.set_nonblocking(true)?;
        raw.bind(&bind_addr.into())
            .with_context(|| format!("failed to bind {}", bind_addr))?;

        let socket = UdpSocket::from_std(raw.into())?;
        info!("✓ Socket bound to {}", socket.local_addr()?);

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            local_ip: local_ip.clone(),
            socket: Arc::new(socket),
            broadcast_addr,
            neighbors: Arc::new(Mutex::new(NeighborTable::new(
                local_ip.clone(),
                NEIGHBOR_TIMEOUT,
            ))),
            routes: Arc::new(Mutex::new(DistanceTable::new(local_ip))),
            running: Arc::new(AtomicBool::new(true)),
            shutdown_tx,
        })
    }

    pub fn local_ip(&self) -> &str {
        &self.local_ip
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawn the sender and receiver tasks and wait for both to stop.
    pub async fn run(&self) {
        let periodic = {
            let local_ip = self.local_ip.clone();
            let socket = self.socket.clone();
            let broadcast_addr = self.broadcast_addr;
            let neighbors = self.neighbors.clone();
            let routes = self.routes.clone();
            let running = self.running.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                periodic_task(
                    local_ip,
                    socket,
                    broadcast_addr,
                    neighbors,
                    routes,
                    running,
                    &mut shutdown_rx,
                )
                .await;
            })
        };

        let receive = {
            let socket = self.socket.clone();
            let neighbors = self.neighbors.clone();
            let routes = self.routes.clone();
            let running = self.running.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                receive_task(socket, neighbors, routes, running, &mut shutdown_rx).await;
            })
        };

        let _ = tokio::join!(periodic, receive);
        info!("Protocol tasks stopped");
    }

    /// Cooperative stop: both tasks exit at their next wakeup and the
    /// blocked receive is cancelled.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(());
    }

    pub fn neighbors(&self) -> &Arc<Mutex<NeighborTable>> {
        &self.neighbors
    }

    pub fn routes(&self) -> &Arc<Mutex<DistanceTable>> {
        &self.routes
    }
}

async fn periodic_task(
    local_ip: NodeId,
    socket: Arc<UdpSocket>,
    broadcast_addr: SocketAddr,
    neighbors: Arc<Mutex<NeighborTable>>,
    routes: Arc<Mutex<DistanceTable>>,
    running: Arc<AtomicBool>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let mut ticker = interval(HELLO_INTERVAL);
    let mut seq: u16 = 0;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Periodic task shutting down");
                break;
            }
            _ = ticker.tick() => {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                run_tick(&local_ip, &socket, broadcast_addr, &neighbors, &routes, &mut seq).await;
            }
        }
    }
}

// One beacon cycle: HELLO out, stale sweep, DV broadcast when dirty.
async fn run_tick(
    local_ip: &str,
    socket: &UdpSocket,
    broadcast_addr: SocketAddr,
    neighbors: &Mutex<NeighborTable>,
    routes: &Mutex<DistanceTable>,
    seq: &mut u16,
) {
    let hello = wire::encode_hello(local_ip, *seq);
    match socket.send_to(hello.as_bytes(), broadcast_addr).await {
        Ok(_) => debug!("Sent HELLO: {}", hello),
        Err(e) => warn!("Failed to send HELLO: {}", e),
    }
    *seq = seq.wrapping_add(1);

    let (expired, neighbor_count) = {
        let mut neighbors_guard = neighbors.lock().await;
        (neighbors_guard.remove_stale(Instant::now()), neighbors_guard.len())
    };

    // The dirty flag, serialization, and the flag reset all happen under
    // the route-table lock; a send failure leaves the flag set so the DV
    // is retried on the next tick.
    let mut routes_guard = routes.lock().await;
    if !expired.is_empty() {
        routes_guard.purge_via(&expired);
    }

    if routes_guard.is_updated() {
        let dv = routes_guard.encode();
        match socket.send_to(dv.as_bytes(), broadcast_addr).await {
            Ok(_) => {
                routes_guard.mark_sent();
                info!("✓ Broadcast DV: {}", dv);
            }
            Err(e) => warn!("Failed to broadcast DV, retrying next tick: {}", e),
        }
    }

    debug!(
        "Tick complete: {} neighbors, {} routes",
        neighbor_count,
        routes_guard.len()
    );
}

async fn receive_task(
    socket: Arc<UdpSocket>,
    neighbors: Arc<Mutex<NeighborTable>>,
    routes: Arc<Mutex<DistanceTable>>,
    running: Arc<AtomicBool>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    let mut buf = [0u8; RECV_BUF_LEN];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Receive task shutting down");
                break;
            }
            result = socket.recv_from(&mut buf) => {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                match result {
                    Ok((len, addr)) => {
                        let data = String::from_utf8_lossy(&buf[..len]);
                        debug!("Received {} bytes from {}: {}", len, addr, data);
                        handle_datagram(&data, &neighbors, &routes).await;
                    }
                    Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {
                        debug!("Receive interrupted, retrying: {}", e);
                        tokio::time::sleep(RECV_RETRY_DELAY).await;
                    }
                    Err(e) => {
                        error!("Socket receive failed, stopping receive task: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_datagram(
    data: &str,
    neighbors: &Mutex<NeighborTable>,
    routes: &Mutex<DistanceTable>,
) {
    match wire::parse(data) {
        Ok(Message::Hello { sender, seq }) => {
            neighbors
                .lock()
                .await
                .process_hello(&sender, seq, Instant::now());
        }
        Ok(Message::DistanceVector { sender, entries }) => {
            routes.lock().await.apply_update(&sender, &entries);
        }
        Err(e) => debug!("Dropping malformed datagram: {}", e),
    }
}
