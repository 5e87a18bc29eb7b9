use bufferpool::BufferPool;
use bytes::{Bytes, BytesMut};

/// A payload handed to the write path, or produced by the read path.
///
/// `Direct` payloads are already backed by this crate's pool (a contiguous,
/// reference-counted allocation the kernel can be pointed at without an
/// intermediate copy — the "direct buffer" predicate of §4.3). `Owned`
/// payloads are whatever the caller had lying around; [`OutboundFilter`](crate::filter::OutboundFilter)
/// copies them into a direct buffer before they reach [`crate::packet_array::NativePacketArray`].
#[derive(Debug, Clone)]
pub enum Payload {
    Direct(Bytes),
    Owned(Vec<u8>),
}

impl Payload {
    pub fn is_direct(&self) -> bool {
        matches!(self, Payload::Direct(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Direct(b) => b.len(),
            Payload::Owned(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Direct(b) => b,
            Payload::Owned(v) => v,
        }
    }

    /// An owned, independent handle to the payload bytes: cheap (refcount
    /// bump) for `Direct` payloads, a copy for `Owned` ones. Used by the
    /// write path to let go of its borrow on the queued message before
    /// completing its promise.
    pub(crate) fn to_bytes(&self) -> Bytes {
        match self {
            Payload::Direct(b) => b.clone(),
            Payload::Owned(v) => Bytes::copy_from_slice(v),
        }
    }

    /// Returns the payload as a direct buffer, copying through the pool
    /// if it wasn't one already. This is the OutboundFilter's "replace the
    /// payload with a direct copy" action (§4.3's decision table).
    pub(crate) fn into_direct(self, pool: &BufferPool<BytesMut>) -> Bytes {
        match self {
            Payload::Direct(bytes) => bytes,
            Payload::Owned(owned) => {
                let mut buf = pool.pull_with_capacity(owned.len());
                buf.copy_from_slice(&owned);
                buf.freeze()
            }
        }
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Direct(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Owned(v)
    }
}
