use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::address::translate_bind_address;
use crate::config::Config;
use crate::error::ChannelError;

/// Bind/connect/disconnect/close, active/connected flags, address
/// translation, error translation (§4.1).
///
/// Every operation here reports failure through its `Result`, never
/// mutates state partway through, and never throws across the boundary —
/// flags flip only after the underlying syscall has already succeeded.
pub struct ChannelLifecycle {
    socket: Socket,
    is_v6: bool,
    open: bool,
    connected: bool,
    active: bool,
    active_on_open: bool,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl ChannelLifecycle {
    /// Creates a fresh, unbound UDP socket.
    pub fn new(domain: Domain, config: &Config) -> io::Result<Self> {
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        let is_v6 = domain == Domain::IPV6;
        if is_v6 {
            // Dual-stack wildcard binding: an IPv4-ANY bind is rewritten
            // to IPv6-ANY (§4.1), so the same socket must still accept
            // v4-mapped peers.
            socket.set_only_v6(false)?;
        }
        if let Some(size) = config.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = config.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if config.udp_gro {
            enable_udp_gro(&socket)?;
        }
        Ok(Self {
            socket,
            is_v6,
            open: true,
            connected: false,
            active: false,
            active_on_open: config.active_on_open,
            local_addr: None,
            remote_addr: None,
        })
    }

    /// Wraps an already-bound fd (e.g. handed off by the event loop).
    /// `active` becomes `true` immediately, per §3's "or on inbound
    /// construction from an already-bound fd".
    pub fn from_bound_socket(socket: Socket, is_v6: bool, config: &Config) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?.as_socket();
        Ok(Self {
            socket,
            is_v6,
            open: true,
            connected: false,
            active: true,
            active_on_open: config.active_on_open,
            local_addr,
            remote_addr: None,
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn bind(&mut self, local: SocketAddr) -> Result<(), ChannelError> {
        let local = translate_bind_address(local, self.is_v6);
        self.socket.bind(&local.into())?;
        self.local_addr = Some(local);
        self.active = true;
        Ok(())
    }

    pub fn connect(&mut self, remote: SocketAddr) -> Result<(), ChannelError> {
        self.socket.connect(&remote.into())?;
        self.remote_addr = Some(remote);
        self.connected = true;
        Ok(())
    }

    /// `connect(AF_UNSPEC)` (§6): clears `connected`/`active` and
    /// invalidates cached addresses so the next query re-reads the kernel.
    pub fn disconnect(&mut self) -> Result<(), ChannelError> {
        disconnect_socket(&self.socket)?;
        self.connected = false;
        self.active = false;
        self.local_addr = None;
        self.remote_addr = None;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), ChannelError> {
        self.open = false;
        self.connected = false;
        Ok(())
    }

    /// `socket.open AND ((configActiveOnOpen AND registered) OR active)`.
    pub fn is_active(&self, registered: bool) -> bool {
        self.open && ((self.active_on_open && registered) || self.active)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

fn enable_udp_gro(socket: &Socket) -> io::Result<()> {
    let fd = socket.as_raw_fd();
    let one: libc::c_int = 1;
    // SAFETY: `fd` is a live socket owned by `socket`; `one` outlives the call.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_UDP,
            libc::UDP_GRO,
            &one as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn disconnect_socket(socket: &Socket) -> io::Result<()> {
    let fd = socket.as_raw_fd();
    // SAFETY: a minimal, zeroed `sockaddr` with `sa_family = AF_UNSPEC` is
    // the documented way to dissolve a UDP `connect()`.
    let addr = libc::sockaddr {
        sa_family: libc::AF_UNSPEC as libc::sa_family_t,
        sa_data: [0; 14],
    };
    let ret = unsafe {
        libc::connect(
            fd,
            &addr as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_sets_active_and_local_addr() {
        let mut lifecycle = ChannelLifecycle::new(Domain::IPV4, &Config::default()).unwrap();
        lifecycle.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(lifecycle.local_addr().is_some());
        assert!(lifecycle.is_active(false));
    }

    #[test]
    fn ipv4_any_bind_on_v6_socket_is_translated() {
        let mut lifecycle = ChannelLifecycle::new(Domain::IPV6, &Config::default()).unwrap();
        lifecycle.bind("0.0.0.0:0".parse().unwrap()).unwrap();
        assert!(lifecycle.local_addr().unwrap().is_ipv6());
    }

    #[test]
    fn disconnect_clears_connected_and_active() {
        let mut lifecycle = ChannelLifecycle::new(Domain::IPV4, &Config::default()).unwrap();
        lifecycle.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let peer = ChannelLifecycle::new(Domain::IPV4, &Config::default()).unwrap();
        let mut peer = peer;
        peer.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        lifecycle.connect(peer.local_addr().unwrap()).unwrap();
        assert!(lifecycle.is_connected());

        lifecycle.disconnect().unwrap();
        assert!(!lifecycle.is_connected());
        assert!(!lifecycle.is_active(false));
        assert!(lifecycle.remote_addr().is_none());
    }

    #[test]
    fn is_active_honours_active_on_open_when_registered() {
        let mut config = Config::default();
        config.active_on_open = true;
        let lifecycle = ChannelLifecycle::new(Domain::IPV4, &config).unwrap();
        assert!(lifecycle.is_active(true), "active_on_open should cover the registered-but-unbound case");
        assert!(!lifecycle.is_active(false));
    }
}
