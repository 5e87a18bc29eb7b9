//! A minimal raw-`epoll` reactor: the event loop this crate's channel
//! expects to be registered with (§1's "out of scope" event loop
//! collaborator). Readiness is edge-triggered and one-shot, matching the
//! re-arm discipline the distilled spec assumes throughout §4.4/§4.5.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Opaque per-registration identifier threaded through `epoll_event.u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub u64);

#[derive(Debug, Clone, Copy)]
pub struct ReadinessEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

pub struct EpollReactor {
    epoll_fd: RawFd,
    events_buf: Vec<libc::epoll_event>,
}

impl EpollReactor {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        // SAFETY: no preconditions; `epoll_create1` either returns a valid
        // fd or -1.
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll_fd,
            events_buf: vec![unsafe { std::mem::zeroed() }; event_capacity.max(1)],
        })
    }

    /// Registers `fd` for edge-triggered, one-shot readability (and,
    /// optionally, writability).
    pub fn register(&self, fd: RawFd, token: Token, writable: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, writable)
    }

    /// Arms or disarms `EPOLLOUT` for `fd` (§4.4 step 2: "if the queue is
    /// empty, clear EPOLLOUT; otherwise set EPOLLOUT"). `EPOLLIN` stays
    /// armed either way.
    pub fn set_writable_interest(&self, fd: RawFd, token: Token, writable: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, writable)
    }

    /// Re-arms the one-shot registration after the read path has drained
    /// the socket to `EAGAIN`, without touching the EPOLLOUT bit.
    pub fn rearm(&self, fd: RawFd, token: Token, writable: bool) -> io::Result<()> {
        self.set_writable_interest(fd, token, writable)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: `fd` was previously registered with this epoll instance.
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks for readiness, up to `timeout` (`None` blocks indefinitely).
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<impl Iterator<Item = ReadinessEvent> + '_> {
        let timeout_ms = timeout.map_or(-1, |d| d.as_millis().min(i32::MAX as u128) as i32);
        // SAFETY: `events_buf` is a live, appropriately-sized buffer for
        // the duration of this call.
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.events_buf.as_mut_ptr(),
                self.events_buf.len() as i32,
                timeout_ms,
            )
        };
        let n = if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                0
            } else {
                return Err(err);
            }
        } else {
            n
        };
        Ok(self.events_buf[..n as usize].iter().map(|raw| ReadinessEvent {
            token: Token(raw.u64),
            readable: raw.events & libc::EPOLLIN as u32 != 0,
            writable: raw.events & libc::EPOLLOUT as u32 != 0,
        }))
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: Token, writable: bool) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: Self::interest_mask(writable),
            u64: token.0,
        };
        // SAFETY: `event` is a valid, stack-local `epoll_event`; `epoll_ctl`
        // does not retain the pointer past the call.
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn interest_mask(writable: bool) -> u32 {
        let base = (libc::EPOLLIN | libc::EPOLLET | libc::EPOLLONESHOT) as u32;
        if writable {
            base | libc::EPOLLOUT as u32
        } else {
            base
        }
    }
}

impl Drop for EpollReactor {
    fn drop(&mut self) {
        // SAFETY: `epoll_fd` is owned exclusively by this reactor.
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn readable_event_is_reported_after_a_datagram_arrives() {
        let recv_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let send_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        recv_sock.set_nonblocking(true).unwrap();

        let mut reactor = EpollReactor::new(8).unwrap();
        let token = Token(42);
        reactor.register(recv_sock.as_raw_fd(), token, false).unwrap();

        send_sock.send_to(b"ping", recv_sock.local_addr().unwrap()).unwrap();

        let events: Vec<_> = reactor.wait(Some(Duration::from_secs(1))).unwrap().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, token);
        assert!(events[0].readable);
    }
}
