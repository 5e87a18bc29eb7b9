/// Recognised configuration options (§6).
///
/// Options are all optional in the builder; defaults are chosen to match
/// common Netty-style datagram channel defaults (a handful of messages per
/// write pass, a small write-spin budget).
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) max_messages_per_write: usize,
    pub(crate) write_spin_count: usize,
    pub(crate) max_datagram_payload_size: usize,
    pub(crate) udp_gro: bool,
    pub(crate) active_on_open: bool,
    pub(crate) auto_read: bool,
    pub(crate) network_interface: Option<String>,
    pub(crate) recv_buffer_size: Option<usize>,
    pub(crate) send_buffer_size: Option<usize>,
    pub(crate) batch_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_messages_per_write: 16,
            write_spin_count: 16,
            max_datagram_payload_size: 0,
            udp_gro: false,
            active_on_open: true,
            auto_read: true,
            network_interface: None,
            recv_buffer_size: None,
            send_buffer_size: None,
            batch_capacity: 64,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder(Config::default())
    }
}

/// Builds a [`Config`]. Every setter returns `&mut Self` so calls chain.
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn max_messages_per_write(&mut self, n: usize) -> &mut Self {
        self.0.max_messages_per_write = n;
        self
    }

    pub fn write_spin_count(&mut self, n: usize) -> &mut Self {
        self.0.write_spin_count = n;
        self
    }

    /// `0` means one datagram per buffer (no scattering reads).
    pub fn max_datagram_payload_size(&mut self, n: usize) -> &mut Self {
        self.0.max_datagram_payload_size = n;
        self
    }

    pub fn udp_gro(&mut self, enabled: bool) -> &mut Self {
        self.0.udp_gro = enabled;
        self
    }

    pub fn active_on_open(&mut self, active: bool) -> &mut Self {
        self.0.active_on_open = active;
        self
    }

    /// When `false`, the read path only runs when a read has been
    /// explicitly requested via `DatagramChannel::read` (§4.5's
    /// `autoRead`/`readPending` gate). Defaults to `true`.
    pub fn auto_read(&mut self, enabled: bool) -> &mut Self {
        self.0.auto_read = enabled;
        self
    }

    pub fn network_interface(&mut self, iface: impl Into<String>) -> &mut Self {
        self.0.network_interface = Some(iface.into());
        self
    }

    pub fn recv_buffer_size(&mut self, bytes: usize) -> &mut Self {
        self.0.recv_buffer_size = Some(bytes);
        self
    }

    pub fn send_buffer_size(&mut self, bytes: usize) -> &mut Self {
        self.0.send_buffer_size = Some(bytes);
        self
    }

    /// NativePacketArray slot cap (K in §3), typically 16-1024.
    pub fn batch_capacity(&mut self, n: usize) -> &mut Self {
        self.0.batch_capacity = n.max(1);
        self
    }

    pub fn build(&self) -> Config {
        self.0.clone()
    }
}
