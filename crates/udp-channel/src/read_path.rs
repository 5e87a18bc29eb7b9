use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

use bufferpool::BufferPool;
use bytes::{Bytes, BytesMut};

use crate::allocator::RecvAllocatorHandle;
use crate::error::ChannelError;
use crate::message::Inbound;
use crate::packet_array::NativePacketArray;
use crate::pipeline::ChannelPipeline;
use crate::platform;

/// Allocator-guided receive: single `read`/`recvmsg` or scattering
/// `recvmmsg`; GRO segmentation fan-out; pipeline delivery (§4.5).
pub struct ReadPath {
    udp_gro: bool,
    max_datagram_payload_size: usize,
}

impl ReadPath {
    pub fn new(udp_gro: bool, max_datagram_payload_size: usize) -> Self {
        Self {
            udp_gro,
            max_datagram_payload_size,
        }
    }

    /// Runs one epoll-in invocation to completion: loops strategy calls
    /// until `allocHandle.continueReading` says stop, then fires
    /// `readComplete` and, if a native error was captured, `exceptionCaught`
    /// (in that order, per §8).
    ///
    /// `read_requested` is the `autoRead || readPending` gate (§4.5): when
    /// `false`, this is a no-op — no syscall, no pipeline event, nothing
    /// for the caller to undo. The caller is expected to stop re-arming
    /// `EPOLLIN` for this channel until the next explicit read request;
    /// the reactor registration itself lives outside `ReadPath`.
    #[allow(clippy::too_many_arguments)]
    pub fn read_ready(
        &self,
        fd: RawFd,
        connected: bool,
        local: SocketAddr,
        remote: Option<SocketAddr>,
        pool: &BufferPool<BytesMut>,
        array: &mut NativePacketArray,
        allocator: &mut dyn RecvAllocatorHandle,
        pipeline: &mut dyn ChannelPipeline,
        read_requested: bool,
    ) {
        if !read_requested {
            return;
        }
        let mut captured_error = None;

        loop {
            let datagram_size = self.max_datagram_payload_size;
            let num_datagram = if platform::IS_SUPPORTING_RECVMMSG {
                if datagram_size == 0 {
                    1
                } else {
                    (allocator.guess() / datagram_size).max(1).min(array.capacity())
                }
            } else {
                0
            };

            let outcome = if connected && !self.udp_gro && num_datagram <= 1 {
                self.connected_single_read(fd, local, remote, pool, allocator, pipeline)
            } else if num_datagram <= 1 {
                self.unconnected_or_gro_single_read(fd, connected, local, pool, array, allocator, pipeline)
            } else {
                self.scattering_batch_read(
                    fd,
                    connected,
                    local,
                    num_datagram,
                    datagram_size,
                    pool,
                    array,
                    allocator,
                    pipeline,
                )
            };

            if let Err(err) = outcome {
                captured_error = Some(err);
                break;
            }
            if !allocator.continue_reading(true) {
                break;
            }
        }

        allocator.read_complete();
        pipeline.fire_channel_read_complete();
        if let Some(err) = captured_error {
            tracing::warn!(target: "udp_channel::read", error = %err, "read path raised an exception");
            pipeline.fire_exception_caught(err);
        }
    }

    fn connected_single_read(
        &self,
        fd: RawFd,
        local: SocketAddr,
        remote: Option<SocketAddr>,
        pool: &BufferPool<BytesMut>,
        allocator: &mut dyn RecvAllocatorHandle,
        pipeline: &mut dyn ChannelPipeline,
    ) -> Result<(), ChannelError> {
        let guess = allocator.guess();
        let mut buf = pool.pull_with_capacity(guess);
        match recv_once(fd, &mut buf) {
            Ok(n) if n > 0 => {
                let n = n as usize;
                allocator.record_bytes_read(n.min(guess) as isize);
                let payload = buf.freeze().slice(0..n);
                let sender = remote.expect("connected_single_read requires a connected peer");
                pipeline.fire_channel_read(Inbound {
                    payload,
                    sender,
                    recipient: local,
                });
                Ok(())
            }
            Ok(n) => {
                allocator.record_bytes_read(n);
                Ok(())
            }
            Err(err) => Err(ChannelError::from_connected_io(err)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn unconnected_or_gro_single_read(
        &self,
        fd: RawFd,
        connected: bool,
        local: SocketAddr,
        pool: &BufferPool<BytesMut>,
        array: &mut NativePacketArray,
        allocator: &mut dyn RecvAllocatorHandle,
        pipeline: &mut dyn ChannelPipeline,
    ) -> Result<(), ChannelError> {
        let guess = allocator.guess();
        let mut buf = pool.pull_with_capacity(guess);
        let results = {
            let mut slices: [&mut [u8]; 1] = [&mut buf[..]];
            array.recv_batch(fd, &mut slices).map_err(|err| translate(connected, err))?
        };
        let Some(result) = results.into_iter().next() else {
            allocator.record_bytes_read(-1);
            return Ok(());
        };

        allocator.record_bytes_read(result.bytes as isize);
        let payload = buf.freeze().slice(0..result.bytes);
        for packet in fan_out_if_segmented(payload, local, result.sender, result.gso_size) {
            pipeline.fire_channel_read(packet);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn scattering_batch_read(
        &self,
        fd: RawFd,
        connected: bool,
        local: SocketAddr,
        num_datagram: usize,
        datagram_size: usize,
        pool: &BufferPool<BytesMut>,
        array: &mut NativePacketArray,
        allocator: &mut dyn RecvAllocatorHandle,
        pipeline: &mut dyn ChannelPipeline,
    ) -> Result<(), ChannelError> {
        let mut buf = pool.pull_with_capacity(num_datagram * datagram_size);
        let results = {
            let mut slices: Vec<&mut [u8]> = buf.chunks_mut(datagram_size).collect();
            array.recv_batch(fd, &mut slices).map_err(|err| translate(connected, err))?
        };
        if results.is_empty() {
            allocator.record_bytes_read(-1);
            return Ok(());
        }

        let total_bytes: usize = results.iter().map(|r| r.bytes).sum();
        allocator.record_bytes_read(total_bytes as isize);

        let frozen = buf.freeze();
        for (index, result) in results.into_iter().enumerate() {
            let start = index * datagram_size;
            let payload = frozen.slice(start..start + result.bytes);
            for packet in fan_out_if_segmented(payload, local, result.sender, result.gso_size) {
                pipeline.fire_channel_read(packet);
            }
        }
        Ok(())
    }
}

fn translate(connected: bool, err: io::Error) -> ChannelError {
    if connected {
        ChannelError::from_connected_io(err)
    } else {
        ChannelError::Io(err)
    }
}

/// Fans a GRO-coalesced datagram out into one `Inbound` per `gso_size`-byte
/// segment (§4.5 "Fan-out"), in order, all sharing `sender`/`recipient`.
/// Packets the kernel did not coalesce pass through untouched.
fn fan_out_if_segmented(payload: Bytes, local: SocketAddr, sender: SocketAddr, gso_size: Option<u16>) -> Vec<Inbound> {
    let Some(segment_size) = gso_size.filter(|size| *size > 0).map(usize::from) else {
        return vec![Inbound {
            payload,
            sender,
            recipient: local,
        }];
    };

    let mut out = Vec::with_capacity(payload.len().div_ceil(segment_size));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + segment_size).min(payload.len());
        out.push(Inbound {
            payload: payload.slice(offset..end),
            sender,
            recipient: local,
        });
        offset = end;
    }
    out
}

fn recv_once(fd: RawFd, buf: &mut [u8]) -> io::Result<isize> {
    // SAFETY: `buf` is a live, writable slice for the duration of this call.
    let ret = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), libc::MSG_DONTWAIT) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(-1);
        }
        return Err(err);
    }
    Ok(ret as isize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::test_support::FixedAllocator;
    use crate::pipeline::{PipelineEvent, RecordingPipeline};
    use std::os::fd::AsRawFd;

    #[test]
    fn gro_fan_out_yields_equal_sized_segments_sharing_sender() {
        let payload = Bytes::from(vec![0u8; 1500]);
        let sender: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let local: SocketAddr = "10.0.0.2:4000".parse().unwrap();

        let packets = fan_out_if_segmented(payload, local, sender, Some(500));

        assert_eq!(packets.len(), 3);
        for packet in &packets {
            assert_eq!(packet.payload.len(), 500);
            assert_eq!(packet.sender, sender);
            assert_eq!(packet.recipient, local);
        }
    }

    #[test]
    fn non_coalesced_datagram_passes_through_as_one_packet() {
        let payload = Bytes::from(vec![1u8; 64]);
        let sender: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let local: SocketAddr = "10.0.0.2:4000".parse().unwrap();

        let packets = fan_out_if_segmented(payload, local, sender, None);

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload.len(), 64);
    }

    #[test]
    fn unconnected_single_read_delivers_one_packet_and_fires_complete() {
        let recv_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let send_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        recv_sock.set_nonblocking(true).unwrap();
        let local = recv_sock.local_addr().unwrap();
        send_sock.send_to(b"hello", local).unwrap();

        let pool = BufferPool::new(4, 2048);
        let mut array = NativePacketArray::new(8);
        let mut allocator = FixedAllocator::new(2048, 1);
        let mut pipeline = RecordingPipeline::default();
        let read_path = ReadPath::new(false, 0);

        read_path.read_ready(
            recv_sock.as_raw_fd(),
            false,
            local,
            None,
            &pool,
            &mut array,
            &mut allocator,
            &mut pipeline,
            true,
        );

        assert!(matches!(pipeline.events.first(), Some(PipelineEvent::Read(inbound)) if inbound.payload.as_ref() == b"hello"));
        assert!(matches!(pipeline.events.last(), Some(PipelineEvent::ReadComplete)));
    }

    #[test]
    fn read_not_requested_is_a_complete_no_op() {
        let recv_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let send_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        recv_sock.set_nonblocking(true).unwrap();
        let local = recv_sock.local_addr().unwrap();
        send_sock.send_to(b"hello", local).unwrap();

        let pool = BufferPool::new(4, 2048);
        let mut array = NativePacketArray::new(8);
        let mut allocator = FixedAllocator::new(2048, 1);
        let mut pipeline = RecordingPipeline::default();
        let read_path = ReadPath::new(false, 0);

        read_path.read_ready(
            recv_sock.as_raw_fd(),
            false,
            local,
            None,
            &pool,
            &mut array,
            &mut allocator,
            &mut pipeline,
            false,
        );

        assert!(pipeline.events.is_empty(), "auto_read disabled with no pending read must not touch the socket");
    }

    #[test]
    fn scattering_read_clamps_datagram_count_to_array_capacity() {
        // `guess() / datagram_size` alone would ask for far more slots
        // than the array holds; `read_ready` must clamp it before it
        // ever reaches `NativePacketArray::recv_batch`'s capacity assert.
        let recv_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let send_sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        recv_sock.set_nonblocking(true).unwrap();
        let local = recv_sock.local_addr().unwrap();
        send_sock.send_to(b"hello", local).unwrap();

        let pool = BufferPool::new(4, 65536);
        let mut array = NativePacketArray::new(4);
        let mut allocator = FixedAllocator::new(65536, 1);
        let mut pipeline = RecordingPipeline::default();
        let read_path = ReadPath::new(false, 512);

        read_path.read_ready(
            recv_sock.as_raw_fd(),
            false,
            local,
            None,
            &pool,
            &mut array,
            &mut allocator,
            &mut pipeline,
            true,
        );

        assert!(matches!(pipeline.events.first(), Some(PipelineEvent::Read(_))));
    }
}
