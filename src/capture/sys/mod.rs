#![allow(unsafe_code)]

//! Thin wrappers around the socket calls the capture layer needs. Every
//! function performs exactly one syscall sequence and reports failure as
//! `io::Error::last_os_error()`.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

pub mod linux;

/// Open a cooked packet socket bound to one EtherType. The descriptor is
/// close-on-exec and non-blocking.
pub fn packet_socket(protocol: u16) -> io::Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_DGRAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            protocol.to_be() as libc::c_int,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Bind a packet socket to (EtherType, interface).
pub fn bind_link(fd: RawFd, protocol: u16, ifindex: libc::c_int) -> io::Result<()> {
    let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
    sll.sll_family = libc::AF_PACKET as libc::sa_family_t;
    sll.sll_protocol = protocol.to_be();
    sll.sll_ifindex = ifindex;

    let res = unsafe {
        libc::bind(
            fd,
            &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if res == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Attach a classic-BPF classifier to a socket.
pub fn attach_filter(fd: RawFd, filter: &[libc::sock_filter]) -> io::Result<()> {
    let prog = libc::sock_fprog {
        len: filter.len() as libc::c_ushort,
        filter: filter.as_ptr() as *mut libc::sock_filter,
    };
    let res = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &prog as *const libc::sock_fprog as *const libc::c_void,
            mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )
    };
    if res == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Send one frame to a link-layer destination.
pub fn send_link(fd: RawFd, data: &[u8], dst: &libc::sockaddr_ll) -> io::Result<usize> {
    let res = unsafe {
        libc::sendto(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            0,
            dst as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if res == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(res as usize)
}

/// Read one frame into `buffer`.
pub fn recv(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let res = unsafe {
        libc::read(
            fd,
            buffer.as_mut_ptr() as *mut libc::c_void,
            buffer.len(),
        )
    };
    if res == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(res as usize)
}

pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Bind the dummy DHCP listen socket: a close-on-exec UDP socket tied to the
/// interface and bound to the client port. Its only purpose is to stop the
/// kernel from answering servers with ICMP port-unreachable; nothing ever
/// reads from it. Socket-option failures are logged and tolerated, a failed
/// bind is not.
pub fn udp_listener(ifname: &str, port: u16) -> io::Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
            libc::IPPROTO_UDP,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    let on: libc::c_int = 1;
    for option in [libc::SO_REUSEADDR, libc::SO_RCVBUF] {
        let res = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                &on as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if res == -1 {
            log::error!("setsockopt: {}", io::Error::last_os_error());
        }
    }

    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    for (dst, byte) in ifr
        .ifr_name
        .iter_mut()
        .zip(ifname.as_bytes().iter().take(libc::IFNAMSIZ - 1))
    {
        *dst = *byte as libc::c_char;
    }
    let res = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            &ifr as *const libc::ifreq as *const libc::c_void,
            mem::size_of::<libc::ifreq>() as libc::socklen_t,
        )
    };
    if res == -1 {
        log::error!("SO_BINDTODEVICE: {}", io::Error::last_os_error());
    }

    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = port.to_be();
    let res = unsafe {
        libc::bind(
            fd,
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if res == -1 {
        let err = io::Error::last_os_error();
        close(fd);
        return Err(err);
    }

    Ok(fd)
}
