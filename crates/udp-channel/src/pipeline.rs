use crate::error::ChannelError;
use crate::message::Inbound;

/// The user-supplied chain that receives read events, read-complete
/// signals, and exceptions (§1 "out of scope" collaborators).
///
/// Ordering is guaranteed by the read path, not by implementations of this
/// trait: `fire_channel_read` is called exactly once per delivered
/// datagram, always before the matching `fire_channel_read_complete`, and
/// `fire_exception_caught` (if any) always fires after it (§8).
pub trait ChannelPipeline {
    fn fire_channel_read(&mut self, datagram: Inbound);
    fn fire_channel_read_complete(&mut self);
    fn fire_exception_caught(&mut self, error: ChannelError);
}

/// A pipeline that discards everything. Useful when a caller only wants
/// the channel's side effects (e.g. a pure sender).
#[derive(Debug, Default)]
pub struct NoopPipeline;

impl ChannelPipeline for NoopPipeline {
    fn fire_channel_read(&mut self, _datagram: Inbound) {}
    fn fire_channel_read_complete(&mut self) {}
    fn fire_exception_caught(&mut self, _error: ChannelError) {}
}

/// A pipeline that records every call it received, in order. Used by the
/// read-path unit tests to assert the call ordering invariants in §8.
#[derive(Debug, Default)]
pub struct RecordingPipeline {
    pub events: Vec<PipelineEvent>,
}

#[derive(Debug)]
pub enum PipelineEvent {
    Read(Inbound),
    ReadComplete,
    ExceptionCaught(String),
}

impl ChannelPipeline for RecordingPipeline {
    fn fire_channel_read(&mut self, datagram: Inbound) {
        self.events.push(PipelineEvent::Read(datagram));
    }

    fn fire_channel_read_complete(&mut self) {
        self.events.push(PipelineEvent::ReadComplete);
    }

    fn fire_exception_caught(&mut self, error: ChannelError) {
        self.events.push(PipelineEvent::ExceptionCaught(error.to_string()));
    }
}
