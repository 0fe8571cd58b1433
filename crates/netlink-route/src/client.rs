//! Netlink socket handling for kernel route manipulation
//!
//! Mutations (`RTM_NEWROUTE`/`RTM_DELROUTE`) and lookups (`RTM_GETROUTE`) use
//! a short-lived request socket per call so concurrent callers never
//! interleave acknowledgements. The event subscription binds a long-lived
//! socket to the IPv4 route multicast group and forwards parsed events from a
//! dedicated thread.

#[cfg(target_os = "linux")]
mod linux {
    use std::net::Ipv4Addr;

    use ipnetwork::Ipv4Network;
    use netlink_packet_core::{
        NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL,
        NLM_F_REQUEST,
    };
    use netlink_packet_route::route::{
        RouteAddress, RouteAttribute, RouteMessage, RouteProtocol, RouteScope, RouteType,
    };
    use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
    use netlink_sys::protocols::NETLINK_ROUTE;
    use netlink_sys::{Socket, SocketAddr};
    use tokio::sync::mpsc;
    use tracing::{trace, warn};

    use crate::error::NetlinkError;
    use crate::route_trait::RouteNetlink;
    use crate::types::{Route, RouteEvent, RouteEventKind};

    /// Netlink group for IPv4 route notifications (RTNLGRP_IPV4_ROUTE = 7)
    const RTNLGRP_IPV4_ROUTE: u32 = 7;

    const RECV_BUFFER_SIZE: usize = 65536;
    const EVENT_CHANNEL_SIZE: usize = 64;

    /// Production adapter speaking rtnetlink to the kernel.
    #[derive(Debug, Default)]
    pub struct NetlinkRouteClient;

    impl NetlinkRouteClient {
        pub fn new() -> Self {
            Self
        }

        /// Send one request and collect the kernel's reply messages.
        ///
        /// An `NLMSG_ERROR` with code zero is the acknowledgement; EEXIST and
        /// ESRCH map to their distinguished variants.
        fn transact(
            payload: RouteNetlinkMessage,
            flags: u16,
        ) -> Result<Vec<NetlinkMessage<RouteNetlinkMessage>>, NetlinkError> {
            let mut socket = Socket::new(NETLINK_ROUTE)?;
            socket.bind_auto()?;
            socket.connect(&SocketAddr::new(0, 0))?;

            let mut header = NetlinkHeader::default();
            header.flags = flags;
            header.sequence_number = 1;
            let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(payload));
            packet.finalize();

            let mut request = vec![0u8; packet.header.length as usize];
            packet.serialize(&mut request[..]);
            socket.send(&request, 0)?;

            let mut responses = Vec::new();
            let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
            loop {
                let len = socket.recv(&mut &mut buffer[..], 0)?;
                let mut offset = 0;
                while offset < len {
                    let message =
                        NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buffer[offset..len])
                            .map_err(|e| NetlinkError::Decode(e.to_string()))?;
                    let length = message.header.length as usize;
                    if length == 0 {
                        break;
                    }

                    match &message.payload {
                        NetlinkPayload::Error(err) => {
                            let code = err.code.map(|c| c.get()).unwrap_or(0);
                            return match code {
                                0 => Ok(responses),
                                c if c == -libc::EEXIST => Err(NetlinkError::AlreadyExists),
                                c if c == -libc::ESRCH => Err(NetlinkError::NotFound),
                                c => Err(NetlinkError::Errno(-c)),
                            };
                        }
                        NetlinkPayload::Done(_) => return Ok(responses),
                        _ => {}
                    }
                    responses.push(message);

                    // align to 4 bytes
                    offset += (length + 3) & !3;
                }

                // without NLM_F_ACK the kernel answers with data only
                if flags & NLM_F_ACK == 0 && !responses.is_empty() {
                    return Ok(responses);
                }
            }
        }

        fn route_message(route: &Route) -> RouteMessage {
            let mut message = RouteMessage::default();
            message.header.address_family = AddressFamily::Inet;
            message.header.destination_prefix_length = route.dst.prefix();
            message.header.table = route.table;
            message.header.protocol = RouteProtocol::Static;
            message.header.scope = RouteScope::Universe;
            message.header.kind = RouteType::Unicast;
            message
                .attributes
                .push(RouteAttribute::Destination(RouteAddress::Inet(
                    route.dst.network(),
                )));
            message
                .attributes
                .push(RouteAttribute::Gateway(RouteAddress::Inet(route.gw)));
            message
        }
    }

    impl RouteNetlink for NetlinkRouteClient {
        fn add_route(&self, route: &Route) -> Result<(), NetlinkError> {
            let message = Self::route_message(route);
            Self::transact(
                RouteNetlinkMessage::NewRoute(message),
                NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
            )?;
            trace!(%route, "kernel route added");
            Ok(())
        }

        fn del_route(&self, route: &Route) -> Result<(), NetlinkError> {
            let message = Self::route_message(route);
            Self::transact(RouteNetlinkMessage::DelRoute(message), NLM_F_REQUEST | NLM_F_ACK)?;
            trace!(%route, "kernel route deleted");
            Ok(())
        }

        fn subscribe(&self) -> Result<mpsc::Receiver<RouteEvent>, NetlinkError> {
            let mut socket = Socket::new(NETLINK_ROUTE)?;
            let groups = 1 << (RTNLGRP_IPV4_ROUTE - 1);
            socket.bind(&SocketAddr::new(0, groups))?;

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
            std::thread::Builder::new()
                .name("route-monitor".to_string())
                .spawn(move || monitor_loop(socket, tx))?;
            Ok(rx)
        }

        fn lookup_gateway(&self, dest: Ipv4Addr) -> Result<Option<Ipv4Addr>, NetlinkError> {
            let mut message = RouteMessage::default();
            message.header.address_family = AddressFamily::Inet;
            message.header.destination_prefix_length = 32;
            message
                .attributes
                .push(RouteAttribute::Destination(RouteAddress::Inet(dest)));

            let responses =
                Self::transact(RouteNetlinkMessage::GetRoute(message), NLM_F_REQUEST)?;
            for response in &responses {
                let NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(route)) =
                    &response.payload
                else {
                    continue;
                };
                for attribute in &route.attributes {
                    if let RouteAttribute::Gateway(RouteAddress::Inet(gw)) = attribute {
                        return Ok(Some(*gw));
                    }
                }
            }
            Ok(None)
        }
    }

    /// Receive loop for the subscription socket. Exits when the receiver is
    /// dropped or the socket fails.
    fn monitor_loop(socket: Socket, tx: mpsc::Sender<RouteEvent>) {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let len = match socket.recv(&mut &mut buffer[..], 0) {
                Ok(len) => len,
                Err(e) => {
                    warn!("route monitor socket failed: {}", e);
                    return;
                }
            };

            let mut offset = 0;
            while offset < len {
                let message =
                    match NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buffer[offset..len]) {
                        Ok(message) => message,
                        Err(e) => {
                            trace!("skipping undecodable route message: {}", e);
                            break;
                        }
                    };
                let length = message.header.length as usize;
                if length == 0 {
                    break;
                }

                if let Some(event) = parse_route_event(&message) {
                    if tx.blocking_send(event).is_err() {
                        // subscriber is gone
                        return;
                    }
                }

                offset += (length + 3) & !3;
            }
        }
    }

    /// Parse a kernel message into a normalized route event, keeping only the
    /// fields this operator manages.
    fn parse_route_event(message: &NetlinkMessage<RouteNetlinkMessage>) -> Option<RouteEvent> {
        let (kind, route_msg) = match &message.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(m)) => {
                (RouteEventKind::Added, m)
            }
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelRoute(m)) => {
                (RouteEventKind::Deleted, m)
            }
            _ => return None,
        };

        if route_msg.header.address_family != AddressFamily::Inet {
            return None;
        }

        let mut dst = Ipv4Addr::UNSPECIFIED;
        let mut gw = Ipv4Addr::UNSPECIFIED;
        let mut table = u32::from(route_msg.header.table);
        for attribute in &route_msg.attributes {
            match attribute {
                RouteAttribute::Destination(RouteAddress::Inet(addr)) => dst = *addr,
                RouteAttribute::Gateway(RouteAddress::Inet(addr)) => gw = *addr,
                RouteAttribute::Table(t) => table = *t,
                _ => {}
            }
        }

        // tables above the u8 range can never hold one of our routes
        let table = u8::try_from(table).ok()?;
        let dst = Ipv4Network::new(dst, route_msg.header.destination_prefix_length).ok()?;
        Some(RouteEvent {
            kind,
            route: Route::new(dst, gw, table),
        })
    }
}

#[cfg(target_os = "linux")]
pub use linux::NetlinkRouteClient;

/// Stub for non-Linux build hosts; every operation reports `Unsupported`.
#[cfg(not(target_os = "linux"))]
mod other {
    use std::net::Ipv4Addr;

    use tokio::sync::mpsc;

    use crate::error::NetlinkError;
    use crate::route_trait::RouteNetlink;
    use crate::types::{Route, RouteEvent};

    #[derive(Debug, Default)]
    pub struct NetlinkRouteClient;

    impl NetlinkRouteClient {
        pub fn new() -> Self {
            Self
        }
    }

    impl RouteNetlink for NetlinkRouteClient {
        fn add_route(&self, _route: &Route) -> Result<(), NetlinkError> {
            Err(NetlinkError::Unsupported)
        }

        fn del_route(&self, _route: &Route) -> Result<(), NetlinkError> {
            Err(NetlinkError::Unsupported)
        }

        fn subscribe(&self) -> Result<mpsc::Receiver<RouteEvent>, NetlinkError> {
            Err(NetlinkError::Unsupported)
        }

        fn lookup_gateway(&self, _dest: Ipv4Addr) -> Result<Option<Ipv4Addr>, NetlinkError> {
            Err(NetlinkError::Unsupported)
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use other::NetlinkRouteClient;
