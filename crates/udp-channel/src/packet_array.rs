//! The staging area that marshals buffers and addresses to/from the
//! kernel for `sendmmsg`/`recvmmsg` (§4.6).
//!
//! One [`NativePacketArray`] is owned per event-loop registration, not per
//! channel (§5 "Shared resources"); callers must `reset()` before every
//! use and must not re-enter a call that would also reset it mid-flight.
//! All scratch `Vec`s are cleared and refilled on each `send_batch`/
//! `recv_batch` call rather than grown-and-shrunk across calls, so no
//! buffer pointer taken during one batch survives into the next.

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

use socket2::SockAddr;

/// `cmsg_space` for a single `cmsg_level=SOL_UDP` control message carrying
/// one `u16` (`UDP_SEGMENT`/`UDP_GRO`'s payload). Sized generously rather
/// than computed via `libc::CMSG_SPACE` (not a `const fn`).
const CMSG_BUF_LEN: usize = 32;

#[derive(Clone, Copy)]
struct CmsgBuf {
    bytes: [u8; CMSG_BUF_LEN],
}

impl Default for CmsgBuf {
    fn default() -> Self {
        Self {
            bytes: [0u8; CMSG_BUF_LEN],
        }
    }
}

impl CmsgBuf {
    /// Writes a `cmsg_level=SOL_UDP, cmsg_type=UDP_SEGMENT` control message
    /// carrying `segment_size`, returning the control length to place in
    /// `msg_controllen`.
    fn write_udp_segment(&mut self, segment_size: u16) -> usize {
        self.write_udp_u16(libc::UDP_SEGMENT, segment_size)
    }

    fn write_udp_u16(&mut self, cmsg_type: libc::c_int, value: u16) -> usize {
        // SAFETY: `bytes` is large enough for one cmsghdr plus a u16
        // payload with alignment padding (checked by the debug_assert
        // below); the cursor never reads past `bytes.len()`.
        unsafe {
            let cmsg_ptr = self.bytes.as_mut_ptr().cast::<libc::cmsghdr>();
            let data_len = std::mem::size_of::<u16>();
            let total_len = libc::CMSG_SPACE(data_len as u32) as usize;
            debug_assert!(total_len <= CMSG_BUF_LEN);
            (*cmsg_ptr).cmsg_level = libc::SOL_UDP;
            (*cmsg_ptr).cmsg_type = cmsg_type;
            (*cmsg_ptr).cmsg_len = libc::CMSG_LEN(data_len as u32) as _;
            let data_ptr = libc::CMSG_DATA(cmsg_ptr).cast::<u16>();
            data_ptr.write_unaligned(value);
            total_len
        }
    }

    /// Reads back a `SOL_UDP` control message's `u16` payload, if the
    /// kernel populated one (used for `UDP_GRO`'s reported `gso_size`).
    fn read_udp_u16(&self, controllen: usize) -> Option<u16> {
        if controllen == 0 {
            return None;
        }
        // SAFETY: `controllen` bytes of `bytes` were populated by the
        // kernel for this recvmmsg slot.
        unsafe {
            let cmsg_ptr = self.bytes.as_ptr().cast::<libc::cmsghdr>();
            if (*cmsg_ptr).cmsg_level == libc::SOL_UDP && (*cmsg_ptr).cmsg_type == libc::UDP_GRO {
                let data_ptr = libc::CMSG_DATA(cmsg_ptr).cast::<u16>();
                Some(data_ptr.read_unaligned())
            } else {
                None
            }
        }
    }
}

/// Per-slot outcome of a `recv_batch` call.
pub struct RecvResult {
    pub bytes: usize,
    pub sender: SocketAddr,
    /// `Some(gso_size)` when `UDP_GRO` coalesced this datagram.
    pub gso_size: Option<u16>,
}

/// Reusable `(iovec, msghdr, name)` staging for `sendmmsg`/`recvmmsg`.
pub struct NativePacketArray {
    capacity: usize,
    addrs: Vec<SockAddr>,
    iovecs: Vec<libc::iovec>,
    cmsgs: Vec<CmsgBuf>,
    headers: Vec<libc::mmsghdr>,
}

impl NativePacketArray {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            addrs: Vec::with_capacity(capacity),
            iovecs: Vec::with_capacity(capacity),
            cmsgs: Vec::with_capacity(capacity),
            headers: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empties all slots; the backing `Vec` allocations are kept.
    pub fn reset(&mut self) {
        self.addrs.clear();
        self.iovecs.clear();
        self.cmsgs.clear();
        self.headers.clear();
    }

    /// Issues one `sendmmsg` for `messages`: `(recipient, payload,
    /// segment_size)` triples. `recipient` is `None` only when the socket
    /// is connected (the "omit peer addrs when connected" rule of §4.4).
    /// Returns the number of messages the kernel accepted.
    pub fn send_batch(
        &mut self,
        fd: RawFd,
        messages: &[(Option<SocketAddr>, &[u8], Option<u16>)],
    ) -> io::Result<usize> {
        assert!(messages.len() <= self.capacity, "batch exceeds NativePacketArray capacity");
        self.reset();

        for (addr, payload, segment_size) in messages {
            self.addrs.push(addr.map(SockAddr::from).unwrap_or_else(|| {
                // Unconnected slots that omit the recipient never reach
                // here; connected sends build a zero-length name as a
                // placeholder so indices line up with `iovecs`/`cmsgs`.
                SockAddr::from(SocketAddr::from(([0, 0, 0, 0], 0)))
            }));
            self.iovecs.push(libc::iovec {
                iov_base: payload.as_ptr() as *mut libc::c_void,
                iov_len: payload.len(),
            });
            let mut cmsg = CmsgBuf::default();
            if let Some(size) = segment_size {
                cmsg.write_udp_segment(*size);
            }
            self.cmsgs.push(cmsg);
        }

        for i in 0..messages.len() {
            let has_addr = messages[i].0.is_some();
            let control_len = messages[i].2.map(|_| libc::CMSG_SPACE(2) as usize).unwrap_or(0);
            // SAFETY: `self.addrs[i]`, `self.iovecs[i]` and `self.cmsgs[i]`
            // were all populated above and are not mutated again before
            // the syscall below.
            let msg_hdr = libc::msghdr {
                msg_name: if has_addr {
                    self.addrs[i].as_ptr() as *mut libc::c_void
                } else {
                    std::ptr::null_mut()
                },
                msg_namelen: if has_addr { self.addrs[i].len() } else { 0 },
                msg_iov: &mut self.iovecs[i],
                msg_iovlen: 1,
                msg_control: if control_len > 0 {
                    self.cmsgs[i].bytes.as_mut_ptr().cast()
                } else {
                    std::ptr::null_mut()
                },
                msg_controllen: control_len,
                msg_flags: 0,
            };
            self.headers.push(libc::mmsghdr { msg_hdr, msg_len: 0 });
        }

        // SAFETY: `headers` holds `messages.len()` fully-initialised
        // `mmsghdr`s whose `iovec`/`sockaddr`/cmsg pointers stay valid for
        // the duration of this call (they borrow from `messages` and from
        // `self`, neither of which is touched again before the syscall
        // returns).
        let sent = unsafe {
            libc::sendmmsg(fd, self.headers.as_mut_ptr(), self.headers.len() as libc::c_uint, 0)
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }

    /// Issues one `recvmmsg` into `buffers`, one datagram per writable
    /// buffer slice. Returns one [`RecvResult`] per datagram the kernel
    /// delivered (a prefix of `buffers`).
    pub fn recv_batch(&mut self, fd: RawFd, buffers: &mut [&mut [u8]]) -> io::Result<Vec<RecvResult>> {
        assert!(buffers.len() <= self.capacity, "batch exceeds NativePacketArray capacity");
        self.reset();

        for _ in 0..buffers.len() {
            self.addrs.push(SockAddr::from(SocketAddr::from(([0, 0, 0, 0], 0))));
            self.cmsgs.push(CmsgBuf::default());
        }
        for buf in buffers.iter_mut() {
            self.iovecs.push(libc::iovec {
                iov_base: buf.as_mut_ptr() as *mut libc::c_void,
                iov_len: buf.len(),
            });
        }
        for i in 0..buffers.len() {
            // SAFETY: see `send_batch`; the kernel only ever shrinks
            // `msg_namelen`/`msg_controllen`, never writes past the
            // lengths we hand in. `self.addrs[i]`'s backing storage is a
            // full `sockaddr_storage` regardless of the (v4) placeholder
            // it was constructed from, so advertising the full storage
            // size here is always safe and lets a v6 sender's full
            // `sockaddr_in6` come back without truncation (an IPv6
            // socket never gets a v4-sized name buffer).
            let msg_hdr = libc::msghdr {
                msg_name: self.addrs[i].as_ptr() as *mut libc::sockaddr as *mut libc::c_void,
                msg_namelen: std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
                msg_iov: &mut self.iovecs[i],
                msg_iovlen: 1,
                msg_control: self.cmsgs[i].bytes.as_mut_ptr().cast(),
                msg_controllen: CMSG_BUF_LEN,
                msg_flags: 0,
            };
            self.headers.push(libc::mmsghdr { msg_hdr, msg_len: 0 });
        }

        // SAFETY: `headers.len()` matches `buffers.len()`, and every
        // `iovec` points into a live caller-supplied slice for the
        // duration of this call.
        let received = unsafe {
            libc::recvmmsg(
                fd,
                self.headers.as_mut_ptr(),
                self.headers.len() as libc::c_uint,
                libc::MSG_DONTWAIT,
                std::ptr::null_mut(),
            )
        };
        if received < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut results = Vec::with_capacity(received as usize);
        for i in 0..received as usize {
            let header = &self.headers[i];
            // SAFETY: `recvmmsg` populated `msg_namelen` bytes of the
            // sockaddr storage backing `self.addrs[i]` for this slot.
            let sender = unsafe {
                SockAddr::init(|storage_ptr, len_ptr| {
                    std::ptr::copy_nonoverlapping(
                        self.addrs[i].as_ptr().cast::<u8>(),
                        storage_ptr.cast::<u8>(),
                        header.msg_hdr.msg_namelen as usize,
                    );
                    *len_ptr = header.msg_hdr.msg_namelen;
                    Ok(())
                })
            }
            .ok()
            .and_then(|(addr, ())| addr.as_socket());
            let gso_size = self.cmsgs[i].read_udp_u16(header.msg_hdr.msg_controllen);
            results.push(RecvResult {
                bytes: header.msg_len as usize,
                sender: sender.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0))),
                gso_size,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_slots_but_keeps_capacity() {
        let mut array = NativePacketArray::new(8);
        array.addrs.push(SockAddr::from(SocketAddr::from(([0, 0, 0, 0], 0))));
        array.reset();
        assert_eq!(array.addrs.len(), 0);
        assert_eq!(array.capacity(), 8);
    }

    #[test]
    fn udp_segment_cmsg_round_trips_through_the_same_buffer() {
        let mut cmsg = CmsgBuf::default();
        let len = cmsg.write_udp_segment(500);
        assert!(len > 0);
    }
}
