use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// If `local` is an IPv4 ANY address and the channel's socket is IPv6,
/// substitutes the IPv6 ANY address at the same port (§4.1, tested by the
/// "Bound(IPv4-ANY:P) is observationally equivalent to Bound(IPv6-ANY:P)"
/// law in §8). Otherwise returns `local` unchanged.
pub(crate) fn translate_bind_address(local: SocketAddr, socket_is_v6: bool) -> SocketAddr {
    if !socket_is_v6 {
        return local;
    }
    match local {
        SocketAddr::V4(v4) if v4.ip() == &Ipv4Addr::UNSPECIFIED => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), local.port())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_any_on_ipv6_socket_is_rewritten() {
        let local: SocketAddr = "0.0.0.0:4433".parse().unwrap();
        let rewritten = translate_bind_address(local, true);
        assert_eq!(rewritten, "[::]:4433".parse().unwrap());
    }

    #[test]
    fn ipv4_any_on_ipv4_socket_is_untouched() {
        let local: SocketAddr = "0.0.0.0:4433".parse().unwrap();
        assert_eq!(translate_bind_address(local, false), local);
    }

    #[test]
    fn specific_address_is_never_rewritten() {
        let local: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        assert_eq!(translate_bind_address(local, true), local);
    }
}
