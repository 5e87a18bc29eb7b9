use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::fd::RawFd;

use bufferpool::BufferPool;
use bytes::BytesMut;
use socket2::Domain;

use crate::allocator::RecvAllocatorHandle;
use crate::config::Config;
use crate::error::ChannelError;
use crate::filter::OutboundFilter;
use crate::lifecycle::ChannelLifecycle;
use crate::message::{Outbound, QueuedMessage, WriteCompletion};
use crate::multicast::Multicast;
use crate::packet_array::NativePacketArray;
use crate::pipeline::ChannelPipeline;
use crate::read_path::ReadPath;
use crate::write_path::WritePath;

/// A single-socket datagram endpoint integrated into an event-loop-driven
/// I/O runtime (§1). Every method that touches I/O state is expected to
/// run on the owning event-loop thread (§5); this type does not assert
/// that itself — the embedding event loop is responsible for the
/// single-threaded discipline.
pub struct DatagramChannel {
    lifecycle: ChannelLifecycle,
    pool: BufferPool<BytesMut>,
    filter: OutboundFilter,
    write_path: WritePath,
    read_path: ReadPath,
    queue: VecDeque<QueuedMessage>,
    array: NativePacketArray,
    registered: bool,
    auto_read: bool,
    read_pending: bool,
}

impl DatagramChannel {
    pub fn new(domain: Domain, config: Config) -> io::Result<Self> {
        let lifecycle = ChannelLifecycle::new(domain, &config)?;
        Self::from_lifecycle(lifecycle, config)
    }

    fn from_lifecycle(lifecycle: ChannelLifecycle, config: Config) -> io::Result<Self> {
        let buffer_capacity = if config.max_datagram_payload_size > 0 {
            config.max_datagram_payload_size
        } else {
            2048
        };
        let pool = BufferPool::new(config.batch_capacity, buffer_capacity);
        Ok(Self {
            filter: OutboundFilter::new(pool.clone()),
            write_path: WritePath::new(config.max_messages_per_write, config.write_spin_count),
            read_path: ReadPath::new(config.udp_gro, config.max_datagram_payload_size),
            array: NativePacketArray::new(config.batch_capacity),
            queue: VecDeque::new(),
            pool,
            lifecycle,
            registered: false,
            auto_read: config.auto_read,
            // A freshly constructed channel is readable on its first
            // invocation even with `auto_read` disabled, mirroring a
            // pending read requested at registration time.
            read_pending: true,
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.lifecycle.as_raw_fd()
    }

    /// Marks the channel as registered with the event loop's reactor.
    /// Affects `is_active` per the `activeOnOpen` rule (§4.1).
    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    pub fn bind(&mut self, local: SocketAddr) -> Result<(), ChannelError> {
        self.lifecycle.bind(local)
    }

    pub fn connect(&mut self, remote: SocketAddr) -> Result<(), ChannelError> {
        self.lifecycle.connect(remote)
    }

    pub fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.lifecycle.disconnect()
    }

    /// Closes the channel, failing every still-queued write with
    /// [`ChannelError::Closed`] first (every outbound payload is released
    /// exactly once, per §8).
    pub fn close(&mut self) -> Result<(), ChannelError> {
        while let Some(mut msg) = self.queue.pop_front() {
            msg.complete(Err(ChannelError::Closed));
        }
        self.lifecycle.close()
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active(self.registered)
    }

    pub fn is_connected(&self) -> bool {
        self.lifecycle.is_connected()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.remote_addr()
    }

    pub fn multicast(&self) -> Multicast<'_> {
        Multicast::new(self.lifecycle.socket())
    }

    /// Enqueues an outbound message. The filter runs synchronously: an
    /// unsupported shape is rejected right here, before anything is
    /// queued, instead of failing later on the write path (§7's
    /// "unsupported messages... thrown synchronously to the submitter").
    pub fn write(&mut self, message: Outbound, completion: WriteCompletion) -> Result<(), ChannelError> {
        if !self.lifecycle.is_open() {
            return Err(ChannelError::Closed);
        }
        if !self.lifecycle.is_connected() && needs_connection(&message) {
            return Err(ChannelError::NotConnected);
        }
        let normalized = self.filter.normalize(message)?;
        self.queue.push_back(QueuedMessage::new(normalized, completion));
        Ok(())
    }

    /// Drives the write path for one EPOLLOUT invocation. Returns `true`
    /// if the caller should now clear EPOLLOUT (queue empty), `false` if
    /// it should stay armed (§4.4 step 2).
    pub fn on_writable(&mut self) -> bool {
        self.write_path.drain(
            self.lifecycle.as_raw_fd(),
            self.lifecycle.is_connected(),
            &mut self.queue,
            &mut self.array,
        )
    }

    /// Requests a read explicitly (Netty's `Channel#read()`). Only matters
    /// when `auto_read` is disabled: the next `on_readable` invocation
    /// will perform exactly one read-loop pass and then go quiet again.
    pub fn read(&mut self) {
        self.read_pending = true;
    }

    /// Drives the read path for one EPOLLIN invocation.
    ///
    /// Returns `true` if a read was actually attempted. `false` means
    /// `auto_read` is disabled and no read is pending (§4.5's
    /// `autoRead || readPending` gate) — the caller should treat this as
    /// "nothing to do" and may stop re-arming `EPOLLIN` until `read()` is
    /// called again.
    pub fn on_readable(&mut self, allocator: &mut dyn RecvAllocatorHandle, pipeline: &mut dyn ChannelPipeline) -> bool {
        let read_requested = self.auto_read || self.read_pending;
        if !read_requested {
            return false;
        }

        let local = self
            .lifecycle
            .local_addr()
            .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
        let remote = self.lifecycle.remote_addr();
        self.read_path.read_ready(
            self.lifecycle.as_raw_fd(),
            self.lifecycle.is_connected(),
            local,
            remote,
            &self.pool,
            &mut self.array,
            allocator,
            pipeline,
            read_requested,
        );
        if !self.auto_read {
            self.read_pending = false;
        }
        true
    }
}

fn needs_connection(message: &Outbound) -> bool {
    match message {
        Outbound::Buffer(_) => true,
        Outbound::Addressed { recipient, .. } | Outbound::Segmented { recipient, .. } => recipient.is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AdaptiveRecvAllocatorHandle;
    use crate::buffer::Payload;
    use crate::pipeline::{PipelineEvent, RecordingPipeline};
    use std::sync::mpsc;

    #[test]
    fn buffer_message_without_connect_is_rejected_synchronously() {
        let mut channel = DatagramChannel::new(Domain::IPV4, Config::default()).unwrap();
        channel.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (tx, _rx) = mpsc::channel();
        let result = channel.write(Outbound::Buffer(Payload::Owned(vec![1])), Box::new(move |r| {
            let _ = tx.send(r);
        }));
        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    #[test]
    fn end_to_end_send_and_receive_over_loopback() {
        let mut sender = DatagramChannel::new(Domain::IPV4, Config::default()).unwrap();
        sender.bind("127.0.0.1:0".parse().unwrap()).unwrap();

        let mut receiver = DatagramChannel::new(Domain::IPV4, Config::default()).unwrap();
        receiver.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let (tx, rx) = mpsc::channel();
        sender
            .write(
                Outbound::Addressed {
                    payload: Payload::Owned(b"hello".to_vec()),
                    recipient: Some(receiver_addr),
                },
                Box::new(move |r| {
                    let _ = tx.send(r);
                }),
            )
            .unwrap();

        let cleared = sender.on_writable();
        assert!(cleared);
        assert!(rx.recv().unwrap().is_ok());

        let mut allocator = AdaptiveRecvAllocatorHandle::new();
        let mut pipeline = RecordingPipeline::default();
        receiver.on_readable(&mut allocator, &mut pipeline);

        assert!(matches!(
            pipeline.events.first(),
            Some(PipelineEvent::Read(inbound)) if inbound.payload.as_ref() == b"hello"
        ));
    }

    #[test]
    fn auto_read_disabled_gates_on_readable_until_read_is_called() {
        let config = Config::builder().auto_read(false).build();
        let mut receiver = DatagramChannel::new(Domain::IPV4, config).unwrap();
        receiver.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let mut sender = DatagramChannel::new(Domain::IPV4, Config::default()).unwrap();
        sender.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (tx, rx) = mpsc::channel();
        sender
            .write(
                Outbound::Addressed {
                    payload: Payload::Owned(b"hi".to_vec()),
                    recipient: Some(receiver_addr),
                },
                Box::new(move |r| {
                    let _ = tx.send(r);
                }),
            )
            .unwrap();
        sender.on_writable();
        assert!(rx.recv().unwrap().is_ok());

        // The constructor's initial pending read consumes the first pass.
        let mut allocator = AdaptiveRecvAllocatorHandle::new();
        let mut pipeline = RecordingPipeline::default();
        assert!(receiver.on_readable(&mut allocator, &mut pipeline));
        assert!(!pipeline.events.is_empty());

        // With no further read() call, subsequent invocations are no-ops.
        let mut pipeline = RecordingPipeline::default();
        assert!(!receiver.on_readable(&mut allocator, &mut pipeline));
        assert!(pipeline.events.is_empty());

        receiver.read();
        let mut pipeline = RecordingPipeline::default();
        assert!(receiver.on_readable(&mut allocator, &mut pipeline));
    }
}
