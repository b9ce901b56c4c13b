/*! Link-layer DHCPv4 client transport.

A DHCP client has to talk before it has an address, so this crate moves
whole IPv4/UDP packets through cooked `AF_PACKET` sockets: kernel-side BPF
classification, userspace header synthesis and validation, and broadcast
injection, one capture handle per interface. An ARP probe/announce transport
shares the same machinery. Retransmission deadlines held on the device
record are bridged into a single-threaded readiness loop.

The protocol state machine itself (DISCOVER/OFFER/REQUEST/ACK and lease
bookkeeping) is a collaborator behind the [client::Fsm] trait, not part of
this crate.
*/

#[macro_use]
mod macros;

pub mod capture;
pub mod client;
pub mod poll;
pub mod storage;
pub mod time;
pub mod wire;
