//! Single-task UDP event loop: bind the socket, decode each datagram, route
//! by packet type, fan out audio/heartbeat traffic, and service a periodic
//! stale-participant sweep.

use std::net::SocketAddr;
use std::time::Instant;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{self, admin_response, control_cmd, Packet, PacketType, FLAG_ADMIN, FLAG_VOX};
use crate::config::ServerConfig;
use crate::registry::ChannelRegistry;

const RECV_BUFFER_LEN: usize = 65536;

/// Counters the dispatcher maintains across its lifetime; logged, not
/// load-bearing for any routing decision.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub total_received: u64,
    pub total_malformed: u64,
}

pub struct Dispatcher {
    socket: UdpSocket,
    registry: ChannelRegistry,
    config: ServerConfig,
    stats: Stats,
}

impl Dispatcher {
    /// Bind the socket with address-reuse set (so a restarted server doesn't
    /// have to wait out TIME_WAIT) and construct the dispatcher around it.
    pub fn bind(addr: SocketAddr, config: ServerConfig) -> anyhow::Result<Self> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(Self {
            socket,
            registry: ChannelRegistry::new(config),
            config,
            stats: Stats::default(),
        })
    }

    #[cfg(test)]
    fn from_tokio_socket(socket: UdpSocket, config: ServerConfig) -> Self {
        Self {
            socket,
            registry: ChannelRegistry::new(config),
            config,
            stats: Stats::default(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Run until a termination/interrupt signal arrives.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut sweep = tokio::time::interval(self.config.heartbeat_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep.tick().await; // consume the immediate first tick; sweeps start after heartbeat_interval
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        #[cfg(unix)]
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        loop {
            #[cfg(unix)]
            let terminated = sigterm.recv();
            #[cfg(not(unix))]
            let terminated = std::future::pending::<()>();

            tokio::select! {
                res = self.socket.recv_from(&mut buf) => {
                    match res {
                        Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                        Err(e) => error!(error = %e, "udp recv error"),
                    }
                }
                _ = sweep.tick() => {
                    self.registry.cleanup_stale_participants(Instant::now());
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received interrupt, shutting down");
                    break;
                }
                _ = terminated => {
                    info!("received termination signal, shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_datagram(&mut self, buf: &[u8], from: SocketAddr) {
        self.stats.total_received += 1;
        let packet = match codec::decode(buf) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.total_malformed += 1;
                warn!(error = %e, from = %from, "malformed packet dropped");
                return;
            }
        };
        let now = Instant::now();
        match packet.packet_type {
            PacketType::Audio => self.handle_audio(packet, from, now).await,
            PacketType::Heartbeat => self.handle_heartbeat(packet, from, now).await,
            PacketType::Control => self.handle_control(packet, from, now).await,
        }
    }

    async fn handle_audio(&mut self, packet: Packet, from: SocketAddr, now: Instant) {
        if packet.flags & FLAG_VOX == 0 {
            return; // silence suppression at the edge
        }
        self.registry
            .handle_join(packet.channel_id, packet.participant_id, from, now);
        if !self
            .registry
            .check_rate_limit(&packet.channel_id, &packet.participant_id, now)
        {
            debug!(participant_id = %packet.participant_id, "rate limit exceeded, dropping audio packet");
            return;
        }
        self.forward_and_send(&packet, packet.participant_id).await;
    }

    async fn handle_heartbeat(&mut self, packet: Packet, from: SocketAddr, now: Instant) {
        self.registry
            .handle_join(packet.channel_id, packet.participant_id, from, now);
        self.registry.update_participant(
            &packet.channel_id,
            &packet.participant_id,
            from,
            Some(packet.flags),
            now,
        );
        self.forward_and_send(&packet, packet.participant_id).await;
    }

    async fn handle_control(&mut self, packet: Packet, _from: SocketAddr, _now: Instant) {
        if packet.payload.is_empty() {
            return;
        }
        let cmd = packet.payload[0];
        if cmd == control_cmd::LEAVE {
            self.registry
                .handle_leave(packet.channel_id, packet.participant_id);
            return;
        }
        if !self
            .registry
            .is_admin(&packet.channel_id, &packet.participant_id)
        {
            warn!(participant_id = %packet.participant_id, "control command from non-admin dropped");
            return;
        }
        if packet.payload.len() < 17 {
            return;
        }
        let target_id = Uuid::from_bytes(packet.payload[1..17].try_into().unwrap());
        let response_byte = match cmd {
            control_cmd::MUTE => admin_response::MUTE_NOTICE,
            control_cmd::UNMUTE => admin_response::UNMUTE_NOTICE,
            control_cmd::KICK => admin_response::KICK_NOTICE,
            _ => {
                debug!(cmd, "unknown control command dropped");
                return;
            }
        };
        let Some(target_addr) = self
            .registry
            .participant_address(&packet.channel_id, &target_id)
        else {
            return;
        };

        let mut response_payload = Vec::with_capacity(17);
        response_payload.push(response_byte);
        response_payload.extend_from_slice(target_id.as_bytes());
        let response = Packet {
            version: codec::VERSION,
            packet_type: PacketType::Control,
            sequence_number: 0,
            timestamp: 0,
            channel_id: packet.channel_id,
            participant_id: packet.participant_id,
            flags: FLAG_ADMIN,
            reserved: 0,
            payload: response_payload,
        };
        let buf = codec::encode_to_vec(&response);
        self.send_to(target_addr, &buf).await;

        if cmd == control_cmd::KICK {
            self.registry.handle_leave(packet.channel_id, target_id);
        }
    }

    async fn forward_and_send(&mut self, packet: &Packet, sender_id: Uuid) {
        match self.registry.forward(packet, sender_id) {
            Some((buf, recipients)) => {
                for addr in recipients {
                    self.send_to(addr, &buf).await;
                }
            }
            None => warn!(channel_id = %packet.channel_id, "forward to unknown channel dropped"),
        }
    }

    async fn send_to(&self, addr: SocketAddr, buf: &[u8]) {
        if let Err(e) = self.socket.send_to(buf, addr).await {
            error!(error = %e, to = %addr, "udp send error");
        }
    }
}
