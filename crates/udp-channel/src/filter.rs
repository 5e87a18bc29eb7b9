use bufferpool::BufferPool;
use bytes::BytesMut;

use crate::buffer::Payload;
use crate::error::ChannelError;
use crate::message::Outbound;
use crate::platform;

/// Normalises inbound messages into the channel's accepted shapes and
/// copies non-direct payloads into a direct buffer (§4.3).
///
/// The decision table's "anything else -> fail" row has no counterpart
/// here: [`Outbound`] is a closed, exhaustively-matched enum, so the type
/// system already rejects any other shape at the call site.
pub struct OutboundFilter {
    pool: BufferPool<BytesMut>,
}

impl OutboundFilter {
    pub fn new(pool: BufferPool<BytesMut>) -> Self {
        Self { pool }
    }

    pub fn normalize(&self, message: Outbound) -> Result<Outbound, ChannelError> {
        match message {
            Outbound::Segmented {
                payload,
                segment_size,
                recipient,
            } => {
                if !platform::is_supporting_udp_segment() {
                    return Err(ChannelError::Unsupported(
                        "UDP_SEGMENT is not supported by this platform",
                    ));
                }
                if segment_size == 0 {
                    return Err(ChannelError::Unsupported("segment_size must be > 0"));
                }
                Ok(Outbound::Segmented {
                    payload: self.ensure_direct(payload),
                    segment_size,
                    recipient,
                })
            }
            Outbound::Addressed { payload, recipient } => Ok(Outbound::Addressed {
                payload: self.ensure_direct(payload),
                recipient,
            }),
            Outbound::Buffer(payload) => Ok(Outbound::Buffer(self.ensure_direct(payload))),
        }
    }

    fn ensure_direct(&self, payload: Payload) -> Payload {
        if payload.is_direct() {
            return payload;
        }
        tracing::trace!(target: "udp_channel::write", bytes = payload.len(), "copying non-direct payload into pool buffer");
        Payload::Direct(payload.into_direct(&self.pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn filter() -> OutboundFilter {
        OutboundFilter::new(BufferPool::new(8, 2048))
    }

    #[test]
    fn owned_buffer_is_replaced_with_a_direct_copy() {
        let filter = filter();
        let msg = Outbound::Buffer(Payload::Owned(vec![1, 2, 3]));
        let normalized = filter.normalize(msg).unwrap();
        assert!(normalized.payload().is_direct());
        assert_eq!(normalized.payload().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn direct_payload_passes_through_unchanged() {
        let filter = filter();
        let payload = Payload::Direct(bytes::Bytes::from_static(b"hi"));
        let msg = Outbound::Addressed {
            payload,
            recipient: Some("127.0.0.1:9".parse::<SocketAddr>().unwrap()),
        };
        let normalized = filter.normalize(msg).unwrap();
        assert_eq!(normalized.payload().as_slice(), b"hi");
    }

    #[test]
    fn zero_segment_size_is_rejected() {
        let filter = filter();
        let msg = Outbound::Segmented {
            payload: Payload::Owned(vec![1, 2, 3, 4]),
            segment_size: 0,
            recipient: None,
        };
        assert!(matches!(filter.normalize(msg), Err(ChannelError::Unsupported(_))));
    }
}
