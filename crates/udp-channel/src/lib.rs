//! A Linux epoll edge-triggered UDP datagram channel: a single-socket
//! datagram endpoint meant to be driven by an external event loop.
//!
//! [`DatagramChannel`] owns the lifecycle, outbound filtering, batched
//! write path and allocator-guided read path described in this crate's
//! design documents. The event loop, byte-buffer pool, channel pipeline,
//! receive allocator and configuration object are all named collaborators
//! with their own small trait contracts ([`reactor::EpollReactor`],
//! [`bufferpool::BufferPool`], [`pipeline::ChannelPipeline`],
//! [`allocator::RecvAllocatorHandle`], [`config::Config`]).

pub mod address;
pub mod allocator;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod message;
pub mod multicast;
pub mod packet_array;
pub mod pipeline;
pub mod platform;
pub mod reactor;
pub mod read_path;
pub mod write_path;

pub use allocator::{AdaptiveRecvAllocatorHandle, RecvAllocatorHandle};
pub use buffer::Payload;
pub use channel::DatagramChannel;
pub use config::Config;
pub use error::ChannelError;
pub use message::{Inbound, Outbound, QueuedMessage, WriteCompletion};
pub use pipeline::{ChannelPipeline, NoopPipeline, RecordingPipeline};
pub use reactor::{EpollReactor, ReadinessEvent, Token};
