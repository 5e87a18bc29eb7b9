//! Capability probing (§9 "Platform capability probing").
//!
//! `sendmmsg`/`recvmmsg` have existed in every supported glibc/musl for
//! this crate's entire lifetime, so those two are compile-time constants
//! on Linux and `false` everywhere else. `UDP_SEGMENT`/`UDP_GRO` are
//! younger kernel features (5.0 / 5.3); whether the *running* kernel
//! accepts them is probed once, lazily, against a throwaway socket, and
//! cached for the life of the process.

use std::sync::OnceLock;

#[cfg(target_os = "linux")]
pub const IS_SUPPORTING_SENDMMSG: bool = true;
#[cfg(not(target_os = "linux"))]
pub const IS_SUPPORTING_SENDMMSG: bool = false;

#[cfg(target_os = "linux")]
pub const IS_SUPPORTING_RECVMMSG: bool = true;
#[cfg(not(target_os = "linux"))]
pub const IS_SUPPORTING_RECVMMSG: bool = false;

/// `UDP_SEGMENT` (GSO). Probed against a scratch UDP socket; a pure
/// fallback path (single `sendmsg` per datagram) stays correct even when
/// this is `false`.
pub fn is_supporting_udp_segment() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| probe_udp_sockopt(libc::UDP_SEGMENT))
}

/// `UDP_GRO`. Same probing strategy as [`is_supporting_udp_segment`].
pub fn is_supporting_udp_gro() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| probe_udp_sockopt(libc::UDP_GRO))
}

#[cfg(target_os = "linux")]
fn probe_udp_sockopt(optname: libc::c_int) -> bool {
    // SAFETY: a throwaway, never-bound, never-shared socket fd; closed
    // unconditionally before returning.
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if fd < 0 {
            return false;
        }
        let one: libc::c_int = 1;
        let ret = libc::setsockopt(
            fd,
            libc::SOL_UDP,
            optname,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::close(fd);
        ret == 0
    }
}

#[cfg(not(target_os = "linux"))]
fn probe_udp_sockopt(_optname: libc::c_int) -> bool {
    false
}
