use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

use socket2::SockAddr;

use crate::error::ChannelError;
use crate::message::{Outbound, QueuedMessage};
use crate::packet_array::NativePacketArray;
use crate::platform;

/// Drains the outbound queue: batched `sendmmsg` when profitable,
/// per-message spin writes otherwise (§4.4).
pub struct WritePath {
    max_messages_per_write: usize,
    write_spin_count: usize,
}

enum PassOutcome {
    /// `n` messages completed successfully and were removed.
    Sent(usize),
    /// One message was removed because it failed; the batch continues.
    ErrorRemoved,
    /// No progress; the invocation stops, leaving the queue as-is.
    WouldBlock,
}

impl WritePath {
    pub fn new(max_messages_per_write: usize, write_spin_count: usize) -> Self {
        Self {
            max_messages_per_write,
            write_spin_count,
        }
    }

    /// Runs one event-loop invocation of the write path. Returns `true` if
    /// the queue is empty afterwards — the caller should clear EPOLLOUT in
    /// that case, and set it otherwise (§4.4 step 2).
    pub fn drain(
        &self,
        fd: RawFd,
        connected: bool,
        queue: &mut VecDeque<QueuedMessage>,
        array: &mut NativePacketArray,
    ) -> bool {
        let mut budget = self.max_messages_per_write;
        while budget > 0 {
            let Some(head) = queue.front() else { break };
            let use_batch = (platform::IS_SUPPORTING_SENDMMSG && queue.len() > 1)
                || matches!(head.message, Outbound::Segmented { .. });

            let outcome = if use_batch {
                self.batch_pass(fd, connected, queue, array, budget)
            } else {
                self.spin_pass(fd, connected, queue)
            };

            match outcome {
                PassOutcome::Sent(0) | PassOutcome::WouldBlock => break,
                PassOutcome::Sent(n) => budget = budget.saturating_sub(n),
                PassOutcome::ErrorRemoved => budget = budget.saturating_sub(1),
            }
        }
        queue.is_empty()
    }

    fn batch_pass(
        &self,
        fd: RawFd,
        connected: bool,
        queue: &mut VecDeque<QueuedMessage>,
        array: &mut NativePacketArray,
        budget: usize,
    ) -> PassOutcome {
        let want = budget.min(array.capacity()).min(queue.len());
        let bytes: Vec<bytes::Bytes> = queue.iter().take(want).map(|q| q.message.payload().to_bytes()).collect();
        let triples: Vec<(Option<SocketAddr>, &[u8], Option<u16>)> = queue
            .iter()
            .take(want)
            .zip(bytes.iter())
            .map(|(q, payload)| {
                let recipient = if connected { None } else { q.message.recipient() };
                let segment_size = match &q.message {
                    Outbound::Segmented { segment_size, .. } => Some(*segment_size as u16),
                    _ => None,
                };
                (recipient, payload.as_ref(), segment_size)
            })
            .collect();

        match array.send_batch(fd, &triples) {
            Ok(0) => PassOutcome::WouldBlock,
            Ok(sent) => {
                tracing::trace!(target: "udp_channel::write", sent, "sendmmsg batch");
                for _ in 0..sent {
                    let mut msg = queue.pop_front().expect("sent count bounded by queue length");
                    msg.complete(Ok(()));
                }
                PassOutcome::Sent(sent)
            }
            Err(err) => self.fail_head(connected, queue, err),
        }
    }

    fn spin_pass(&self, fd: RawFd, connected: bool, queue: &mut VecDeque<QueuedMessage>) -> PassOutcome {
        let mut msg = queue.pop_front().expect("spin_pass requires a non-empty queue");
        let recipient = if connected { None } else { msg.message.recipient() };
        let payload = msg.message.payload().to_bytes();

        if payload.is_empty() {
            // "A zero-length payload counts as done without syscall" (§4.4b).
            msg.complete(Ok(()));
            return PassOutcome::Sent(1);
        }

        for _ in 0..self.write_spin_count {
            match send_once(fd, &payload, recipient) {
                Ok(0) => continue,
                Ok(_) => {
                    msg.complete(Ok(()));
                    return PassOutcome::Sent(1);
                }
                Err(err) => {
                    let translated = if connected {
                        ChannelError::from_connected_io(err)
                    } else {
                        ChannelError::Io(err)
                    };
                    tracing::debug!(target: "udp_channel::write", peer = ?recipient, error = %translated, "per-message send error");
                    msg.complete(Err(translated));
                    return PassOutcome::ErrorRemoved;
                }
            }
        }
        queue.push_front(msg);
        PassOutcome::WouldBlock
    }

    fn fail_head(&self, connected: bool, queue: &mut VecDeque<QueuedMessage>, err: io::Error) -> PassOutcome {
        let mut msg = queue.pop_front().expect("head message exists for a failed batch pass");
        let translated = if connected {
            ChannelError::from_connected_io(err)
        } else {
            ChannelError::Io(err)
        };
        tracing::debug!(target: "udp_channel::write", error = %translated, "per-message send error, continuing batch");
        msg.complete(Err(translated));
        PassOutcome::ErrorRemoved
    }
}

fn send_once(fd: RawFd, payload: &[u8], recipient: Option<SocketAddr>) -> io::Result<isize> {
    let sockaddr = recipient.map(SockAddr::from);
    let (addr_ptr, addr_len) = match &sockaddr {
        Some(a) => (a.as_ptr(), a.len()),
        None => (std::ptr::null(), 0),
    };
    // SAFETY: `addr_ptr`/`addr_len` come from a `SockAddr` that outlives
    // this call, or are a null/zero pair when there is no recipient
    // (connected-socket send).
    let ret = unsafe {
        libc::sendto(
            fd,
            payload.as_ptr().cast::<libc::c_void>(),
            payload.len(),
            libc::MSG_DONTWAIT,
            addr_ptr,
            addr_len,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(ret as isize)
}
