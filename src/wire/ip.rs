use core::fmt;

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub enum Protocol(u8) {
        Icmp = 0x01,
        Tcp  = 0x06,
        Udp  = 0x11
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Unknown(id) => write!(f, "0x{id:02x}"),
        }
    }
}

pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::Protocol;
    use crate::wire::Ipv4Address;

    /// Accumulate RFC 1071 16-bit one's-complement words over `data` into a
    /// 32-bit running sum. A trailing odd byte is taken as the high byte of a
    /// final network-order word. Operates bytewise, so unaligned buffers are
    /// fine.
    pub fn partial(mut sum: u32, mut data: &[u8]) -> u32 {
        while data.len() >= 2 {
            sum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }
        if let Some(&byte) = data.first() {
            sum += (byte as u32) << 8;
        }
        sum
    }

    /// Fold a running sum down to 16 bits and complement it.
    pub const fn fold(sum: u32) -> u16 {
        let sum = (sum >> 16) + (sum & 0xffff);
        let sum = sum + (sum >> 16);
        !(sum as u16)
    }

    /// One-shot checksum of a contiguous region. Over a region whose checksum
    /// field holds a correct checksum, this returns zero.
    pub fn checksum(data: &[u8]) -> u16 {
        fold(partial(0, data))
    }

    /// Partial sum of the 12-byte UDP pseudo-header: source address,
    /// destination address, a zero byte, the IP protocol, and the UDP length.
    pub fn pseudo_header_v4(
        src_addr: &Ipv4Address,
        dst_addr: &Ipv4Address,
        protocol: Protocol,
        length: u16,
    ) -> u32 {
        let mut block = [0u8; 12];
        block[0..4].copy_from_slice(&src_addr.octets());
        block[4..8].copy_from_slice(&dst_addr.octets());
        block[9] = protocol.into();
        NetworkEndian::write_u16(&mut block[10..12], length);
        partial(0, &block)
    }
}
