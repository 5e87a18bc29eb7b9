use std::net::SocketAddr;

use bytes::Bytes;

use crate::buffer::Payload;
use crate::error::ChannelError;

/// Outbound message shapes accepted by the write queue (§3).
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Bare payload; requires a prior `connect` (remote implicit).
    Buffer(Payload),
    /// Explicit peer per packet; `recipient` may be `None` only if connected.
    Addressed {
        payload: Payload,
        recipient: Option<SocketAddr>,
    },
    /// A single payload the kernel splits into `segment_size`-byte
    /// datagrams via `UDP_SEGMENT` (GSO).
    Segmented {
        payload: Payload,
        segment_size: usize,
        recipient: Option<SocketAddr>,
    },
}

impl Outbound {
    pub(crate) fn recipient(&self) -> Option<SocketAddr> {
        match self {
            Outbound::Buffer(_) => None,
            Outbound::Addressed { recipient, .. } | Outbound::Segmented { recipient, .. } => {
                *recipient
            }
        }
    }

    pub(crate) fn payload(&self) -> &Payload {
        match self {
            Outbound::Buffer(p) => p,
            Outbound::Addressed { payload, .. } => payload,
            Outbound::Segmented { payload, .. } => payload,
        }
    }
}

/// Inbound datagrams are always fully addressed (§3); a `Segmented`
/// inbound shape only ever exists transiently inside the read path, which
/// fans it out into one `Inbound` per sub-datagram before anything reaches
/// the pipeline (§4.5 "Fan-out").
#[derive(Debug, Clone)]
pub struct Inbound {
    pub payload: Bytes,
    pub sender: SocketAddr,
    pub recipient: SocketAddr,
}

/// Called exactly once when the write path finishes with a queued message,
/// whether by success, per-message I/O error, or filter rejection.
pub type WriteCompletion = Box<dyn FnOnce(Result<(), ChannelError>) + Send>;

/// An outbound message paired with the promise the caller is waiting on.
pub struct QueuedMessage {
    pub message: Outbound,
    pub completion: Option<WriteCompletion>,
}

impl QueuedMessage {
    pub fn new(message: Outbound, completion: WriteCompletion) -> Self {
        Self {
            message,
            completion: Some(completion),
        }
    }

    pub(crate) fn complete(&mut self, result: Result<(), ChannelError>) {
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }
}
