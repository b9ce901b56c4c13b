/*! DHCP and ARP client transports.

This module wires a [Capture] into the event loop on behalf of the protocol
state machine. The state machine owns a [Client]; the transport owns nothing
but the capture handle installed on the [Device] record and a registered
event-loop source holding weak back-references. Dropping the capture (or the
whole client) deregisters everything.

Opening is idempotent: a healthy capture already bound to the requested
EtherType is left untouched, anything else is torn down and replaced.
*/

use std::cell::RefCell;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};

use crate::capture::{sys, Capture, LinkInfo};
use crate::poll::{Source, Sources};
use crate::storage::Reader;
use crate::time::Instant;
use crate::wire::{dhcp, EthernetProtocol};

/// Retransmission state: the absolute instant at which the outstanding
/// message should be resent. Written by the state machine, consulted by the
/// event-loop deadline hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Retransmit {
    pub deadline: Option<Instant>,
}

/// Per-interface client state the transport reads and writes.
pub struct Device {
    pub link: LinkInfo,
    pub retrans: Retransmit,
    listen_fd: Option<RawFd>,
    capture: Option<Rc<RefCell<Capture>>>,
    source: Option<Rc<RefCell<dyn Source>>>,
}

impl Device {
    pub fn new(link: LinkInfo) -> Device {
        Device {
            link,
            retrans: Retransmit::default(),
            listen_fd: None,
            capture: None,
            source: None,
        }
    }

    /// The installed capture, if any.
    pub fn capture(&self) -> Option<&Rc<RefCell<Capture>>> {
        self.capture.as_ref()
    }

    /// Send a frame to the link-layer broadcast address through the
    /// installed capture.
    pub fn broadcast(&self, data: &[u8]) -> io::Result<usize> {
        match &self.capture {
            Some(capture) => capture.borrow().broadcast(data),
            None => {
                log::error!("{}: no capture handle", self.link.name);
                Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no capture handle",
                ))
            }
        }
    }

    /// Tear down the installed capture. The socket closes and the event
    /// loop forgets the registration on its next pass.
    pub fn close_capture(&mut self) {
        self.capture = None;
        self.source = None;
    }

    fn install(&mut self, capture: Rc<RefCell<Capture>>, source: Rc<RefCell<dyn Source>>) {
        self.capture = Some(capture);
        self.source = Some(source);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(fd) = self.listen_fd.take() {
            sys::close(fd);
        }
    }
}

/// The protocol state machine the transport feeds.
pub trait Fsm {
    /// A validated DHCP payload arrived.
    fn dhcp_packet(&mut self, dev: &mut Device, frame: Reader<'_>);

    /// An ARP REPLY frame arrived.
    fn arp_packet(&mut self, dev: &mut Device, frame: Reader<'_>);

    /// The retransmission deadline expired.
    fn retransmit(&mut self, dev: &mut Device);
}

/// A device paired with its state machine. The transport callbacks need
/// both halves at once, so they live in one cell.
pub struct Client {
    pub device: Device,
    pub fsm: Box<dyn Fsm>,
}

impl Client {
    pub fn new(device: Device, fsm: Box<dyn Fsm>) -> Rc<RefCell<Client>> {
        Rc::new(RefCell::new(Client { device, fsm }))
    }
}

/// The event-loop source for an installed capture. Holds only weak
/// back-references: the device record keeps both the capture and this
/// source alive, and the hooks go quiet once either is gone.
struct CaptureSource {
    protocol: EthernetProtocol,
    client: Weak<RefCell<Client>>,
    capture: Weak<RefCell<Capture>>,
}

impl Source for CaptureSource {
    fn fd(&self) -> RawFd {
        self.capture
            .upgrade()
            .map_or(-1, |capture| capture.borrow().as_raw_fd())
    }

    fn ready(&mut self) {
        let Some(capture) = self.capture.upgrade() else {
            return;
        };
        let (bytes, buffer) = {
            let mut capture = capture.borrow_mut();
            let bytes = match capture.recv() {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    log::error!("cannot read from capture socket: {err}");
                    return;
                }
            };
            // Detach the buffer while the state machine runs: it may
            // transmit through this same capture from inside the callback.
            (bytes, capture.take_buffer())
        };

        if let Some(client) = self.client.upgrade() {
            let mut guard = client.borrow_mut();
            let Client { device, fsm } = &mut *guard;
            match self.protocol {
                EthernetProtocol::Ipv4 => match dhcp::check_header(&buffer[..bytes]) {
                    Ok(payload) => {
                        net_debug!("{}: incoming DHCP packet", device.link.name);
                        fsm.dhcp_packet(device, Reader::new(payload));
                    }
                    Err(_) => net_debug!("bad IP/UDP packet header"),
                },
                _ => {
                    net_debug!("{}: incoming ARP packet", device.link.name);
                    fsm.arp_packet(device, Reader::new(&buffer[..bytes]));
                }
            }
        }

        capture.borrow_mut().put_buffer(buffer);
    }

    fn next_deadline(&self) -> Option<Instant> {
        let client = self.client.upgrade()?;
        let deadline = client.borrow().device.retrans.deadline;
        deadline
    }

    fn on_deadline(&mut self, now: Instant) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        let mut guard = client.borrow_mut();
        let Client { device, fsm } = &mut *guard;
        match device.retrans.deadline {
            Some(deadline) if deadline < now => fsm.retransmit(device),
            _ => {}
        }
    }

    fn set_error(&mut self) {
        if let Some(capture) = self.capture.upgrade() {
            capture.borrow_mut().set_error();
        }
    }
}

/// Open the DHCP transport on a device.
///
/// Side effect: the first open binds a dummy UDP socket to the client port
/// on this interface, held for the lifetime of the device and never read.
/// Without it the kernel answers every server unicast with an ICMP
/// port-unreachable. Failure to bind it is logged and tolerated.
pub fn dhcp_open(client: &Rc<RefCell<Client>>, sources: &mut Sources) -> io::Result<()> {
    {
        let device = &mut client.borrow_mut().device;
        if device.listen_fd.is_none() {
            match sys::udp_listener(&device.link.name, dhcp::CLIENT_PORT) {
                Ok(fd) => device.listen_fd = Some(fd),
                Err(err) => {
                    log::error!("{}: cannot bind DHCP listen port: {err}", device.link.name)
                }
            }
        }
    }
    common_open(client, EthernetProtocol::Ipv4, sources)
}

/// Open the ARP transport on a device.
pub fn arp_open(client: &Rc<RefCell<Client>>, sources: &mut Sources) -> io::Result<()> {
    common_open(client, EthernetProtocol::Arp, sources)
}

fn common_open(
    client: &Rc<RefCell<Client>>,
    protocol: EthernetProtocol,
    sources: &mut Sources,
) -> io::Result<()> {
    {
        let device = &mut client.borrow_mut().device;
        let reusable = match &device.capture {
            Some(capture) => {
                let capture = capture.borrow();
                !capture.error() && capture.protocol() == protocol
            }
            None => false,
        };
        if reusable {
            return Ok(());
        }
        device.close_capture();
    }

    let capture = {
        let guard = client.borrow();
        Capture::open(&guard.device.link, protocol)?
    };
    let capture = Rc::new(RefCell::new(capture));
    let source: Rc<RefCell<dyn Source>> = Rc::new(RefCell::new(CaptureSource {
        protocol,
        client: Rc::downgrade(client),
        capture: Rc::downgrade(&capture),
    }));
    sources.register(&source);
    client.borrow_mut().device.install(capture, source);
    Ok(())
}
