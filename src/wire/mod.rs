/*! Low-level packet access and construction.

The `wire` module deals with the packet *representation*: extracting fields
from sequences of octets and inserting fields into sequences of octets. This
happens through the `Packet` family of structures, e.g. [Ipv4Packet] or
[UdpPacket], which are untyped views over a byte buffer.

The `Packet` family of data structures guarantees that, if the
`Packet::check_len()` method returned `Ok(())`, then no accessor or setter
method will panic. `Packet::new_checked` is a shorthand for a combination of
`Packet::new_unchecked` and `Packet::check_len`. When parsing untrusted
input, it is *necessary* to use `Packet::new_checked()`. When emitting
output, it is *incorrect*: the buffer is filled in place and the length
check would be judging leftover bytes.

On top of the raw views, [dhcp] implements the DHCP client framing: building
an IPv4+UDP envelope around an outbound message and validating and stripping
the envelope of an inbound one.

[Ipv4Packet]: struct.Ipv4Packet.html
[UdpPacket]: struct.UdpPacket.html
[dhcp]: dhcp/index.html
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
}

use core::fmt;

mod ethernet;
pub use self::ethernet::{
    Address as EthernetAddress, EtherType as EthernetProtocol, HEADER_LEN as ETHERNET_HEADER_LEN,
};

mod arp;
pub use self::arp::{
    Hardware as ArpHardware, Operation as ArpOperation, Packet as ArpPacket,
    PACKET_LEN as ARP_PACKET_LEN,
};

pub(crate) mod ip;
pub use self::ip::Protocol as IpProtocol;

pub(crate) mod ipv4;
pub use self::ipv4::{
    Address as Ipv4Address, Packet as Ipv4Packet, HEADER_LEN as IPV4_HEADER_LEN,
};
pub(crate) use self::ipv4::AddressExt as Ipv4AddressExt;

pub(crate) mod udp;
pub use self::udp::{Packet as UdpPacket, HEADER_LEN as UDP_HEADER_LEN};

pub mod dhcp;

/// Parsing a packet failed.
///
/// Either it is malformed, or it is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
