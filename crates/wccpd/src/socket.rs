//! WCCP UDP socket setup.
//!
//! One IPv4 datagram socket carries every message. Path MTU discovery is
//! turned off on Linux so routers receive unfragmented datagrams with DF
//! clear, as they expect.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Bind the WCCP socket on `addr:port`.
pub fn bind(addr: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    disable_pmtu_discovery(&socket)?;

    let bind_addr = SocketAddrV4::new(addr, port);
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("bind({bind_addr})"))?;

    UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")
}

#[cfg(target_os = "linux")]
fn disable_pmtu_discovery(socket: &Socket) -> Result<()> {
    use std::os::fd::AsRawFd;

    let value: libc::c_int = libc::IP_PMTUDISC_DONT;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("IP_MTU_DISCOVER");
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn disable_pmtu_discovery(_socket: &Socket) -> Result<()> {
    Ok(())
}

/// Local address the kernel would use to reach `peer`. Nothing is sent.
pub fn probe_local_addr(peer: Ipv4Addr, port: u16) -> Result<Ipv4Addr> {
    let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).context("probe bind")?;
    probe
        .connect(SocketAddrV4::new(peer, port))
        .with_context(|| format!("no route to {peer}"))?;
    match probe.local_addr()? {
        std::net::SocketAddr::V4(v4) => Ok(*v4.ip()),
        std::net::SocketAddr::V6(_) => anyhow::bail!("expected IPv4 local address"),
    }
}
