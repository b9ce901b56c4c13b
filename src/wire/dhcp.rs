//! DHCPv4 link-layer framing.
//!
//! The client talks to servers it has no address for yet, so messages bypass
//! the kernel UDP stack entirely: the state machine renders a DHCP message
//! body into a [Buffer] with headroom, [build_header] prepends the UDP and
//! IPv4 headers in place and fills both checksums, and the result goes out
//! through a raw packet socket. On the way in, [check_header] re-validates
//! what the kernel classifier let through and strips the headers off.

use super::{Error, Result};
use crate::storage::Buffer;
use crate::wire::{ip::checksum, ipv4, udp, IpProtocol, Ipv4Address};

pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;

/// Headroom a payload buffer must reserve for [build_header].
pub const HEADER_ROOM: usize = ipv4::HEADER_LEN + udp::HEADER_LEN;

/// Prepend UDP and IPv4 headers over the payload held in `buf`.
///
/// An unspecified destination is coerced to the limited broadcast address.
/// On return the buffer's readable region is the complete IP packet, both
/// checksums filled, ready for a link-layer send.
pub fn build_header(buf: &mut Buffer, src_addr: Ipv4Address, dst_addr: Ipv4Address) -> Result<()> {
    let dst_addr = if dst_addr.is_unspecified() {
        Ipv4Address::BROADCAST
    } else {
        dst_addr
    };

    let udp_len = buf.len() + udp::HEADER_LEN;
    buf.push_head(udp::HEADER_LEN)?;
    {
        let mut packet = udp::Packet::new_unchecked(buf.as_mut_slice());
        packet.set_src_port(CLIENT_PORT);
        packet.set_dst_port(SERVER_PORT);
        packet.set_len(udp_len as u16);
        packet.set_checksum(0);
    }

    let total_len = udp_len + ipv4::HEADER_LEN;
    buf.push_head(ipv4::HEADER_LEN)?;
    {
        let mut packet = ipv4::Packet::new_unchecked(buf.as_mut_slice());
        packet.set_version(4);
        packet.set_header_len(ipv4::HEADER_LEN as u8);
        packet.set_tos(ipv4::TOS_LOWDELAY);
        packet.set_total_len(total_len as u16);
        packet.set_ident(0);
        packet.clear_flags();
        packet.set_dont_frag(true);
        packet.set_frag_offset(0);
        packet.set_ttl(ipv4::DEFAULT_TTL);
        packet.set_next_header(IpProtocol::Udp);
        packet.set_src_addr(src_addr);
        packet.set_dst_addr(dst_addr);
        packet.fill_checksum();
    }

    let mut packet = udp::Packet::new_unchecked(&mut buf.as_mut_slice()[ipv4::HEADER_LEN..]);
    packet.fill_checksum(&src_addr, &dst_addr);

    Ok(())
}

/// Validate the IP and UDP headers of a received frame and strip them.
///
/// Returns the UDP payload, bounded by the IP total-length field rather than
/// the capture length, which may include link padding. Any malformed frame is
/// dropped with a debug log; nothing here ever reaches the state machine.
pub fn check_header(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < ipv4::HEADER_LEN {
        net_debug!("truncated IP header, ignoring");
        return Err(Error);
    }

    let packet = ipv4::Packet::new_unchecked(frame);
    let ihl = packet.header_len() as usize;
    if packet.version() != 4 || ihl < ipv4::HEADER_LEN {
        net_debug!("bad IP header, ignoring");
        return Err(Error);
    }
    if frame.len() < ihl {
        net_debug!("truncated IP header, ignoring");
        return Err(Error);
    }
    if checksum::checksum(&frame[..ihl]) != 0 {
        net_debug!("bad IP header checksum, ignoring");
        return Err(Error);
    }
    let total_len = packet.total_len() as usize;
    if frame.len() < total_len || total_len < ihl {
        net_debug!("truncated IP packet, ignoring");
        return Err(Error);
    }
    if packet.next_header() != IpProtocol::Udp {
        net_debug!("unexpected IP protocol, ignoring");
        return Err(Error);
    }

    let datagram = &frame[ihl..total_len];
    let udp = match udp::Packet::new_checked(datagram) {
        Ok(udp) => udp,
        Err(_) => {
            net_debug!("truncated UDP packet, ignoring");
            return Err(Error);
        }
    };
    if !udp.verify_checksum(&packet.src_addr(), &packet.dst_addr()) {
        net_debug!("bad UDP checksum, ignoring");
        return Err(Error);
    }

    Ok(&datagram[udp::HEADER_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Address = Ipv4Address::new(192, 0, 2, 1);
    const DST: Ipv4Address = Ipv4Address::new(255, 255, 255, 255);

    fn frame_for(payload: &[u8], src: Ipv4Address, dst: Ipv4Address) -> Vec<u8> {
        let mut buf = Buffer::new(HEADER_ROOM, payload.len());
        buf.put(payload).unwrap();
        build_header(&mut buf, src, dst).unwrap();
        buf.as_slice().to_vec()
    }

    #[test]
    fn roundtrip() {
        let payload: Vec<u8> = (0..300u16).map(|b| b as u8).collect();
        let frame = frame_for(&payload, SRC, DST);
        assert_eq!(frame.len(), payload.len() + HEADER_ROOM);
        assert_eq!(check_header(&frame).unwrap(), &payload[..]);
    }

    #[test]
    fn roundtrip_random_payloads() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x6c696e6b);
        for _ in 0..64 {
            let len = rng.gen_range(0..=1472);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let frame = frame_for(&payload, SRC, Ipv4Address::new(192, 0, 2, 99));
            assert_eq!(check_header(&frame).unwrap(), &payload[..]);
        }
    }

    #[test]
    fn unspecified_destination_becomes_limited_broadcast() {
        let frame = frame_for(b"discover", Ipv4Address::UNSPECIFIED, Ipv4Address::UNSPECIFIED);
        let packet = ipv4::Packet::new_unchecked(&frame[..]);
        assert_eq!(packet.dst_addr(), Ipv4Address::BROADCAST);
        assert!(check_header(&frame).is_ok());
    }

    #[test]
    fn discover_frame_layout() {
        // A 300-byte DISCOVER body yields a 328-byte frame with the expected
        // header fields.
        let payload = vec![0x63u8; 300];
        let frame = frame_for(&payload, Ipv4Address::UNSPECIFIED, Ipv4Address::UNSPECIFIED);
        assert_eq!(frame.len(), 328);

        let ip = ipv4::Packet::new_checked(&frame[..]).unwrap();
        assert_eq!(ip.version(), 4);
        assert_eq!(ip.header_len(), 20);
        assert_eq!(ip.tos(), ipv4::TOS_LOWDELAY);
        assert_eq!(ip.total_len(), 328);
        assert_eq!(ip.ident(), 0);
        assert!(ip.dont_frag());
        assert!(!ip.more_frags());
        assert_eq!(ip.frag_offset(), 0);
        assert_eq!(ip.ttl(), ipv4::DEFAULT_TTL);
        assert_eq!(ip.next_header(), IpProtocol::Udp);
        assert_eq!(ip.dst_addr(), Ipv4Address::BROADCAST);
        assert!(ip.verify_checksum());

        let udp = udp::Packet::new_checked(ip.payload()).unwrap();
        assert_eq!(udp.src_port(), CLIENT_PORT);
        assert_eq!(udp.dst_port(), SERVER_PORT);
        assert_eq!(udp.len(), 308);
        assert!(udp.verify_checksum(&ip.src_addr(), &ip.dst_addr()));
    }

    #[test]
    fn link_padding_is_ignored() {
        let mut frame = frame_for(b"offer body", SRC, DST);
        let total = frame.len();
        frame.extend_from_slice(&[0u8; 18]);
        let payload = check_header(&frame).unwrap();
        assert_eq!(payload, b"offer body");
        assert_eq!(payload.len(), total - HEADER_ROOM);
    }

    #[test]
    fn single_bit_corruption_drops() {
        let clean = frame_for(b"lease please", SRC, DST);
        // Any bit flip in either header must fail validation.
        for byte in 0..HEADER_ROOM {
            for bit in 0..8 {
                let mut frame = clean.clone();
                frame[byte] ^= 1 << bit;
                assert!(
                    check_header(&frame).is_err(),
                    "bit {bit} of byte {byte} accepted"
                );
            }
        }
    }

    #[test]
    fn non_udp_protocol_drops() {
        let mut frame = frame_for(b"x", SRC, DST);
        {
            let mut packet = ipv4::Packet::new_unchecked(&mut frame[..]);
            packet.set_next_header(IpProtocol::Tcp);
            packet.fill_checksum();
        }
        assert!(check_header(&frame).is_err());
    }

    #[test]
    fn truncated_total_length_drops() {
        let frame = frame_for(b"truncate me", SRC, DST);
        assert!(check_header(&frame[..frame.len() - 4]).is_err());
    }

    #[test]
    fn non_ipv4_version_drops() {
        let mut frame = frame_for(b"x", SRC, DST);
        frame[0] = 0x65;
        assert!(check_header(&frame).is_err());
    }
}
