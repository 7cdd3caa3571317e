//! Cache host auto-discovery
//!
//! Hosts announce themselves on a multicast group with UTF-16LE beacons:
//! `HELO <address> <port>` when they come up, `BYE <address> <port>` when
//! they leave. The listener translates those into routing-fabric changes:
//! a discovered host fills the last bucket while it has free width,
//! otherwise it starts a new bucket; a departed host is evicted outright.

use crate::error::Result;
use crate::routing::table::RoutingTable;
use crate::transport::framing::utf16le_to_string;
use crate::transport::{
    HostConnection, HostEndpoint, HostEvent, HostTransportFactory, TransportOptions,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECEIVE_BUFFER_BYTES: usize = 8192;

/// Parsed discovery beacon
#[derive(Debug, PartialEq, Eq)]
enum Beacon {
    Hello(HostEndpoint),
    Bye(HostEndpoint),
}

/// Running multicast listener
pub struct HostDiscovery {
    stop_tx: mpsc::Sender<()>,
    listener: JoinHandle<()>,
}

impl HostDiscovery {
    /// Join the multicast group and start the listener task
    pub(crate) fn start(
        group: Ipv4Addr,
        port: u16,
        table: Arc<RoutingTable>,
        factory: Arc<dyn HostTransportFactory>,
        options: TransportOptions,
        host_events: mpsc::Sender<HostEvent>,
    ) -> Result<Self> {
        let socket = bind_multicast(group, port)?;
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let listener = tokio::spawn(run_listener(
            socket,
            stop_rx,
            table,
            factory,
            options,
            host_events,
        ));
        info!(%group, port, "cache host auto-discovery listening");

        Ok(Self { stop_tx, listener })
    }

    /// Stop the listener and wait for it to wind down
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.listener.await;
    }
}

fn bind_multicast(group: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    let bind_address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&bind_address.into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;

    Ok(UdpSocket::from_std(socket.into())?)
}

async fn run_listener(
    socket: UdpSocket,
    mut stop: mpsc::Receiver<()>,
    table: Arc<RoutingTable>,
    factory: Arc<dyn HostTransportFactory>,
    options: TransportOptions,
    host_events: mpsc::Sender<HostEvent>,
) {
    let mut buffer = vec![0u8; RECEIVE_BUFFER_BYTES];

    loop {
        tokio::select! {
            _ = stop.recv() => break,

            received = socket.recv_from(&mut buffer) => {
                let (length, sender) = match received {
                    Ok(received) => received,
                    Err(error) => {
                        warn!(%error, "discovery receive failed");
                        continue;
                    }
                };

                let Ok(message) = utf16le_to_string(&buffer[..length]) else {
                    debug!(%sender, "ignoring non-UTF-16 discovery datagram");
                    continue;
                };

                match parse_beacon(&message) {
                    Some(Beacon::Hello(endpoint)) => {
                        if table.contains_endpoint(&endpoint) {
                            continue;
                        }
                        let transport =
                            factory.create(endpoint.clone(), &options, host_events.clone());
                        let connection = HostConnection::new(transport);
                        if table.add_host(connection.clone()) {
                            info!(%endpoint, "discovered new cache host");
                            if let Err(error) = connection.connect().await {
                                warn!(
                                    %endpoint,
                                    %error,
                                    "connect to discovered host failed; transport keeps retrying"
                                );
                            }
                        }
                    }
                    Some(Beacon::Bye(endpoint)) => {
                        if let Some(connection) = table.remove_host(&endpoint) {
                            warn!(%endpoint, "cache host announced departure");
                            if let Err(error) = connection.disconnect().await {
                                debug!(%endpoint, %error, "disconnect of departed host failed");
                            }
                        }
                    }
                    None => debug!(%sender, "ignoring unrecognized discovery beacon"),
                }
            }
        }
    }
}

fn parse_beacon(message: &str) -> Option<Beacon> {
    let mut parts = message.split(' ');
    let verb = parts.next()?;
    let address = parts.next()?;
    let port = parts.next()?.parse::<u16>().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let endpoint = HostEndpoint::new(address, port);
    match verb {
        "HELO" => Some(Beacon::Hello(endpoint)),
        "BYE" => Some(Beacon::Bye(endpoint)),
        _ => None,
    }
}
