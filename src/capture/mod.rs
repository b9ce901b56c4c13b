/*! Per-interface raw packet capture and injection.

A [Capture] owns one cooked `AF_PACKET` socket bound to a single EtherType on
a single interface, with a kernel classifier attached so only frames the
client can use ever reach userspace. The same handle carries the prefilled
link-layer broadcast destination used by every outbound send, and the receive
buffer sized to the interface MTU.
*/

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::wire::{ArpHardware, EthernetProtocol};

mod filter;
pub(crate) mod sys;

/// Fallback receive-buffer size when the device does not report an MTU.
pub const MTU_MAX: usize = 1500;

/// Resolved link-layer identity of an interface. Discovery (netlink) happens
/// elsewhere; the capture layer only consumes the result.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub name: String,
    pub ifindex: libc::c_int,
    pub hardware: ArpHardware,
    pub mtu: usize,
}

/// A raw capture handle bound to one interface and EtherType.
///
/// Closing the handle closes the socket, which also removes it from the
/// event loop.
pub struct Capture {
    fd: RawFd,
    protocol: EthernetProtocol,
    sll: libc::sockaddr_ll,
    buffer: Vec<u8>,
    mtu: usize,
    error: bool,
}

fn link_sockaddr(link: &LinkInfo, protocol: EthernetProtocol) -> io::Result<libc::sockaddr_ll> {
    let Some(broadcast) = link.hardware.broadcast() else {
        log::error!(
            "cannot get broadcast address for {} (bad hardware type)",
            link.name
        );
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no broadcast address for hardware type",
        ));
    };

    let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
    sll.sll_family = libc::AF_PACKET as libc::sa_family_t;
    sll.sll_protocol = u16::from(protocol).to_be();
    sll.sll_ifindex = link.ifindex;
    sll.sll_hatype = link.hardware.into();
    sll.sll_halen = broadcast.as_bytes().len() as u8;
    sll.sll_addr[..broadcast.as_bytes().len()].copy_from_slice(broadcast.as_bytes());
    Ok(sll)
}

impl Capture {
    /// Open a capture on `link` for one EtherType.
    ///
    /// Fails if the interface index is unresolved, if no broadcast address
    /// can be derived for the hardware type, or on any syscall failure; a
    /// partially constructed handle releases its descriptor on the way out.
    pub fn open(link: &LinkInfo, protocol: EthernetProtocol) -> io::Result<Capture> {
        if link.ifindex == 0 {
            log::error!("no ifindex for interface `{}`", link.name);
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interface index not resolved",
            ));
        }
        let classifier = match protocol {
            EthernetProtocol::Ipv4 => filter::dhcp_filter(),
            EthernetProtocol::Arp => filter::arp_filter(),
            EthernetProtocol::Unknown(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no classifier for EtherType",
                ))
            }
        };
        let sll = link_sockaddr(link, protocol)?;

        let fd = sys::packet_socket(protocol.into())?;
        // The handle owns the descriptor from here on; early returns close it.
        let mut capture = Capture {
            fd,
            protocol,
            sll,
            buffer: Vec::new(),
            mtu: if link.mtu == 0 { MTU_MAX } else { link.mtu },
            error: false,
        };

        sys::attach_filter(capture.fd, classifier)?;
        sys::bind_link(capture.fd, protocol.into(), link.ifindex)?;
        capture.buffer = vec![0; capture.mtu];

        Ok(capture)
    }

    /// The EtherType this capture classifies.
    pub fn protocol(&self) -> EthernetProtocol {
        self.protocol
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sticky error flag, set by the event loop when the descriptor reports
    /// an error condition. A flagged handle is replaced on the next open.
    pub fn error(&self) -> bool {
        self.error
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    /// Read one frame into the handle's buffer, returning the byte count.
    pub fn recv(&mut self) -> io::Result<usize> {
        sys::recv(self.fd, &mut self.buffer)
    }

    /// The receive buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    // The buffer can be detached around a callback dispatch, so the callback
    // is free to transmit through this same handle while it still holds the
    // received bytes.
    pub(crate) fn take_buffer(&mut self) -> Vec<u8> {
        mem::take(&mut self.buffer)
    }

    pub(crate) fn put_buffer(&mut self, buffer: Vec<u8>) {
        self.buffer = buffer;
    }

    /// Send a frame to the interface's link-layer broadcast address.
    pub fn broadcast(&self, data: &[u8]) -> io::Result<usize> {
        sys::send_link(self.fd, data, &self.sll).map_err(|err| {
            log::error!("unable to send dhcp packet: {err}");
            err
        })
    }

    #[cfg(test)]
    pub(crate) fn with_fd(fd: RawFd, protocol: EthernetProtocol) -> Capture {
        Capture {
            fd,
            protocol,
            sll: unsafe { mem::zeroed() },
            buffer: vec![0; MTU_MAX],
            mtu: MTU_MAX,
            error: false,
        }
    }
}

impl AsRawFd for Capture {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        sys::close(self.fd);
    }
}
