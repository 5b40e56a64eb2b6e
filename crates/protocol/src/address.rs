use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use codec::{encode, CodecError, Reader};

use crate::unix_time;

/// A peer address as gossiped in `addr` messages and the version handshake.
///
/// IPv4 addresses are carried IPv4-mapped (`::ffff:a.b.c.d`). The full wire
/// form includes the last-seen time and stream; the short form used inside
/// `version` omits both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkAddress {
    pub time: i64,
    pub stream: u64,
    pub services: u64,
    pub ipv6: [u8; 16],
    pub port: u16,
}

impl NetworkAddress {
    pub const NODE_NETWORK: u64 = 1;

    pub fn new(socket: SocketAddr, stream: u64) -> Self {
        let ipv6 = match socket.ip() {
            IpAddr::V4(ip) => ip.to_ipv6_mapped().octets(),
            IpAddr::V6(ip) => ip.octets(),
        };
        Self {
            time: unix_time::now(),
            stream,
            services: Self::NODE_NETWORK,
            ipv6,
            port: socket.port(),
        }
    }

    /// The unspecified local placeholder advertised as `addr_from`.
    pub fn any_local() -> Self {
        Self {
            time: unix_time::now(),
            stream: 0,
            services: Self::NODE_NETWORK,
            ipv6: [0u8; 16],
            port: 0,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let ip = Ipv6Addr::from(self.ipv6);
        match ip.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), self.port),
            None => SocketAddr::new(IpAddr::V6(ip), self.port),
        }
    }

    /// Identity of the host independent of last-seen time.
    pub fn host_key(&self) -> ([u8; 16], u16) {
        (self.ipv6, self.port)
    }

    pub fn is_loopback(&self) -> bool {
        match Ipv6Addr::from(self.ipv6).to_ipv4_mapped() {
            Some(v4) => v4 == Ipv4Addr::LOCALHOST,
            None => Ipv6Addr::from(self.ipv6).is_loopback(),
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        encode::i64(self.time, out);
        encode::u32(self.stream as u32, out);
        self.write_short(out);
    }

    /// The 26-byte form embedded in `version` messages.
    pub fn write_short(&self, out: &mut Vec<u8>) {
        encode::u64(self.services, out);
        out.extend_from_slice(&self.ipv6);
        encode::u16(self.port, out);
    }

    pub fn read(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let time = reader.i64()?;
        let stream = u64::from(reader.u32()?);
        let mut address = Self::read_short(reader)?;
        address.time = time;
        address.stream = stream;
        Ok(address)
    }

    pub fn read_short(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            time: 0,
            stream: 0,
            services: reader.u64()?,
            ipv6: reader.array()?,
            port: reader.u16()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_form_round_trips() {
        let address = NetworkAddress::new("10.1.2.3:8444".parse().expect("addr"), 2);
        let mut buf = Vec::new();
        address.write(&mut buf);
        assert_eq!(buf.len(), 8 + 4 + 26);
        let mut reader = Reader::new(&buf);
        assert_eq!(NetworkAddress::read(&mut reader).expect("read"), address);
    }

    #[test]
    fn short_form_drops_time_and_stream() {
        let address = NetworkAddress::new("[2001:db8::1]:8444".parse().expect("addr"), 3);
        let mut buf = Vec::new();
        address.write_short(&mut buf);
        assert_eq!(buf.len(), 26);
        let mut reader = Reader::new(&buf);
        let decoded = NetworkAddress::read_short(&mut reader).expect("read");
        assert_eq!(decoded.time, 0);
        assert_eq!(decoded.stream, 0);
        assert_eq!(decoded.ipv6, address.ipv6);
        assert_eq!(decoded.port, address.port);
    }

    #[test]
    fn ipv4_maps_through_socket_addr() {
        let socket: SocketAddr = "127.0.0.1:9000".parse().expect("addr");
        let address = NetworkAddress::new(socket, 1);
        assert_eq!(address.socket_addr(), socket);
        assert!(address.is_loopback());
    }
}
