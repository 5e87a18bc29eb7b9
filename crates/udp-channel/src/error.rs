use std::io;

/// The one error type every fallible public operation on [`crate::DatagramChannel`]
/// returns.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error")]
    Io(#[from] io::Error),

    /// A connected socket's peer refused the datagram (`ECONNREFUSED`
    /// surfaced on a later read, per ICMP Port Unreachable).
    #[error("port unreachable")]
    PortUnreachable,

    /// A message shape or offload the platform does not support.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// `Buffer`/`Addressed{recipient: None}` submitted on a socket that
    /// has never been `connect`ed.
    #[error("channel is not connected")]
    NotConnected,

    /// Operation attempted after `close()`.
    #[error("channel is closed")]
    Closed,
}

impl ChannelError {
    /// Translates a raw I/O error observed on a connected socket's data
    /// path per §4.5/§7: `ECONNREFUSED` becomes [`ChannelError::PortUnreachable`],
    /// everything else passes through as [`ChannelError::Io`].
    pub(crate) fn from_connected_io(err: io::Error) -> Self {
        if err.raw_os_error() == Some(libc::ECONNREFUSED) {
            ChannelError::PortUnreachable
        } else {
            ChannelError::Io(err)
        }
    }
}
