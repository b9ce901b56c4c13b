//! Kernel classifier programs.
//!
//! Two classic-BPF programs, attached with `SO_ATTACH_FILTER` so the raw
//! socket only wakes the process for frames the client can use. The classic
//! texts of these filters are written against a link-level view with the
//! 14-byte Ethernet header in front; a `SOCK_DGRAM` packet socket delivers
//! cooked frames starting at the network header, so the programs here carry
//! the offsets already shifted and the EtherType test already dropped (the
//! socket is bound to a single EtherType, the kernel has done that match).

use libc::sock_filter;

use super::sys::linux::*;
use crate::wire::dhcp;

const fn stmt(code: u16, k: u32) -> sock_filter {
    sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> sock_filter {
    sock_filter { code, jt, jf, k }
}

static DHCP_FILTER: [sock_filter; 9] = [
    // Make sure it's a UDP packet...
    stmt(BPF_LD | BPF_B | BPF_ABS, 9),
    jump(BPF_JMP | BPF_JEQ | BPF_K, libc::IPPROTO_UDP as u32, 0, 6),
    // Make sure this isn't a fragment...
    stmt(BPF_LD | BPF_H | BPF_ABS, 6),
    jump(BPF_JMP | BPF_JSET | BPF_K, 0x3fff, 4, 0),
    // Get the IP header length...
    stmt(BPF_LDX | BPF_B | BPF_MSH, 0),
    // Make sure it's to the right port...
    stmt(BPF_LD | BPF_H | BPF_IND, 2),
    jump(BPF_JMP | BPF_JEQ | BPF_K, dhcp::CLIENT_PORT as u32, 0, 1),
    // If we passed all the tests, ask for the whole packet.
    stmt(BPF_RET | BPF_K, u32::MAX),
    // Otherwise, drop it.
    stmt(BPF_RET | BPF_K, 0),
];

static ARP_FILTER: [sock_filter; 4] = [
    // Make sure this is an ARP REPLY...
    stmt(BPF_LD | BPF_H | BPF_ABS, 6),
    jump(BPF_JMP | BPF_JEQ | BPF_K, 2, 0, 1),
    // If we passed all the tests, ask for the whole packet.
    stmt(BPF_RET | BPF_K, u32::MAX),
    // Otherwise, drop it.
    stmt(BPF_RET | BPF_K, 0),
];

/// Classifier for the DHCP capture: UDP to the client port, unfragmented.
pub fn dhcp_filter() -> &'static [sock_filter] {
    &DHCP_FILTER
}

/// Classifier for the ARP capture: REPLY operations only.
pub fn arp_filter() -> &'static [sock_filter] {
    &ARP_FILTER
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Buffer;
    use crate::wire::{
        dhcp, ipv4, ArpHardware, ArpOperation, ArpPacket, EthernetAddress, Ipv4Address,
        ARP_PACKET_LEN,
    };

    /// Interpret a classic-BPF program over a packet, the way the kernel
    /// would. Only the opcodes the programs above use are implemented; an
    /// out-of-bounds load drops the packet.
    fn run(prog: &[sock_filter], packet: &[u8]) -> u32 {
        let mut acc: u32 = 0;
        let mut idx: u32 = 0;
        let mut pc = 0usize;
        loop {
            let insn = &prog[pc];
            pc += 1;
            match insn.code {
                code if code == (BPF_LD | BPF_H | BPF_ABS) => {
                    let off = insn.k as usize;
                    match packet.get(off..off + 2) {
                        Some(bytes) => acc = u16::from_be_bytes([bytes[0], bytes[1]]) as u32,
                        None => return 0,
                    }
                }
                code if code == (BPF_LD | BPF_B | BPF_ABS) => match packet.get(insn.k as usize) {
                    Some(&byte) => acc = byte as u32,
                    None => return 0,
                },
                code if code == (BPF_LD | BPF_H | BPF_IND) => {
                    let off = idx as usize + insn.k as usize;
                    match packet.get(off..off + 2) {
                        Some(bytes) => acc = u16::from_be_bytes([bytes[0], bytes[1]]) as u32,
                        None => return 0,
                    }
                }
                code if code == (BPF_LDX | BPF_B | BPF_MSH) => {
                    match packet.get(insn.k as usize) {
                        Some(&byte) => idx = ((byte & 0x0f) as u32) * 4,
                        None => return 0,
                    }
                }
                code if code == (BPF_JMP | BPF_JEQ | BPF_K) => {
                    pc += if acc == insn.k {
                        insn.jt as usize
                    } else {
                        insn.jf as usize
                    };
                }
                code if code == (BPF_JMP | BPF_JSET | BPF_K) => {
                    pc += if acc & insn.k != 0 {
                        insn.jt as usize
                    } else {
                        insn.jf as usize
                    };
                }
                code if code == (BPF_RET | BPF_K) => return insn.k,
                code => unreachable!("unhandled opcode 0x{code:02x}"),
            }
        }
    }

    fn dhcp_frame(dst_port: u16, frag_off: u16) -> Vec<u8> {
        let payload = vec![0x63u8; 300];
        let mut buf = Buffer::new(dhcp::HEADER_ROOM, payload.len());
        buf.put(&payload).unwrap();
        dhcp::build_header(
            &mut buf,
            Ipv4Address::new(192, 0, 2, 1),
            Ipv4Address::UNSPECIFIED,
        )
        .unwrap();
        let mut frame = buf.as_slice().to_vec();
        {
            let mut packet = crate::wire::UdpPacket::new_unchecked(&mut frame[ipv4::HEADER_LEN..]);
            packet.set_dst_port(dst_port);
        }
        frame[6..8].copy_from_slice(&frag_off.to_be_bytes());
        frame
    }

    #[test]
    fn dhcp_accepts_client_port() {
        let frame = dhcp_frame(dhcp::CLIENT_PORT, 0x4000);
        assert_eq!(run(dhcp_filter(), &frame), u32::MAX);
    }

    #[test]
    fn dhcp_rejects_other_ports() {
        let frame = dhcp_frame(dhcp::SERVER_PORT, 0x4000);
        assert_eq!(run(dhcp_filter(), &frame), 0);
        let frame = dhcp_frame(12345, 0x4000);
        assert_eq!(run(dhcp_filter(), &frame), 0);
    }

    #[test]
    fn dhcp_rejects_fragments() {
        // Nonzero fragment offset.
        let frame = dhcp_frame(dhcp::CLIENT_PORT, 0x0001);
        assert_eq!(run(dhcp_filter(), &frame), 0);
        // First fragment: offset zero, more-fragments set.
        let frame = dhcp_frame(dhcp::CLIENT_PORT, 0x2000);
        assert_eq!(run(dhcp_filter(), &frame), 0);
    }

    #[test]
    fn dhcp_rejects_tcp() {
        let mut frame = dhcp_frame(dhcp::CLIENT_PORT, 0x4000);
        frame[9] = 0x06;
        assert_eq!(run(dhcp_filter(), &frame), 0);
    }

    #[test]
    fn dhcp_rejects_ipv6() {
        // A cooked IPv6/UDP datagram: byte 9 falls inside the source
        // address, not on a protocol number.
        let mut frame = vec![0u8; 48 + 8];
        frame[0] = 0x60;
        frame[6] = 0x11; // next header: UDP
        frame[7] = 0x40; // hop limit
        frame[9] = 0xfe;
        assert_eq!(run(dhcp_filter(), &frame), 0);
    }

    fn arp_frame(operation: ArpOperation) -> [u8; ARP_PACKET_LEN] {
        let mut bytes = [0u8; ARP_PACKET_LEN];
        let mut packet = ArpPacket::new_unchecked(&mut bytes[..]);
        packet.set_hardware_type(ArpHardware::Ethernet);
        packet.set_protocol_type(0x0800);
        packet.set_hardware_len(6);
        packet.set_protocol_len(4);
        packet.set_operation(operation);
        packet.set_source_hardware_addr(EthernetAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]));
        packet.set_source_protocol_addr(Ipv4Address::new(192, 0, 2, 2));
        packet.set_target_hardware_addr(EthernetAddress([0x52, 0x54, 0x00, 0x65, 0x43, 0x21]));
        packet.set_target_protocol_addr(Ipv4Address::new(192, 0, 2, 1));
        bytes
    }

    #[test]
    fn arp_accepts_reply_only() {
        assert_eq!(run(arp_filter(), &arp_frame(ArpOperation::Reply)), u32::MAX);
        assert_eq!(run(arp_filter(), &arp_frame(ArpOperation::Request)), 0);
    }

    #[test]
    fn arp_rejects_non_arp() {
        // An IPv4 frame pushed through the ARP program: offset 6 holds the
        // fragment field, not an ARP operation.
        let frame = dhcp_frame(dhcp::CLIENT_PORT, 0x4000);
        assert_eq!(run(arp_filter(), &frame), 0);
    }

    #[test]
    fn dhcp_rejects_truncated() {
        let frame = dhcp_frame(dhcp::CLIENT_PORT, 0x4000);
        assert_eq!(run(dhcp_filter(), &frame[..8]), 0);
    }
}
