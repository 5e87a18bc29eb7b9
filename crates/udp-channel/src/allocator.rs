/// Decides per-iteration receive-buffer size, whether the read loop should
/// continue, and records bytes-read statistics (§1, §4.5).
pub trait RecvAllocatorHandle {
    /// Suggested buffer size for the next read.
    fn guess(&self) -> usize;

    /// Records the outcome of the last read (`<= 0` means no data / EAGAIN).
    fn record_bytes_read(&mut self, bytes_read: isize);

    /// Whether the read-path loop should run another iteration.
    ///
    /// `more_data_expected` is the "always true" supplier of §4.5: for a
    /// datagram socket it is fine to keep reading even though the last
    /// read filled less than the full guessed buffer, as long as at least
    /// one byte arrived. The call site always passes `true`; the parameter
    /// exists so the trait matches the distilled contract and a different
    /// implementation could thread a real supplier through.
    fn continue_reading(&self, more_data_expected: bool) -> bool;

    /// Called once when the read-path loop exits for this invocation.
    fn read_complete(&mut self);
}

/// The default handle: grows the guessed buffer size when a read fills it
/// completely, shrinks it after two consecutive reads fill less than half
/// of it. A simplified analog of Netty's `AdaptiveRecvByteBufAllocator`
/// (that implementation walks a fixed table of buffer sizes; this one
/// doubles/halves within `[min, max]`, which is close enough for a
/// datagram socket where the guess only ever bounds a single read).
#[derive(Debug, Clone)]
pub struct AdaptiveRecvAllocatorHandle {
    min: usize,
    max: usize,
    guess: usize,
    last_bytes_read: isize,
    messages_read: usize,
    max_messages_per_read: usize,
    decrease_streak: u8,
}

impl AdaptiveRecvAllocatorHandle {
    pub fn new() -> Self {
        Self {
            min: 64,
            max: 65536,
            guess: 2048,
            last_bytes_read: 0,
            messages_read: 0,
            max_messages_per_read: 16,
            decrease_streak: 0,
        }
    }

    pub fn with_bounds(min: usize, initial: usize, max: usize) -> Self {
        Self {
            min,
            max,
            guess: initial.clamp(min, max),
            ..Self::new()
        }
    }
}

impl Default for AdaptiveRecvAllocatorHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvAllocatorHandle for AdaptiveRecvAllocatorHandle {
    fn guess(&self) -> usize {
        self.guess
    }

    fn record_bytes_read(&mut self, bytes_read: isize) {
        self.last_bytes_read = bytes_read;
        if bytes_read <= 0 {
            return;
        }
        self.messages_read += 1;
        let bytes_read = bytes_read as usize;
        if bytes_read >= self.guess {
            self.decrease_streak = 0;
            self.guess = (self.guess * 2).min(self.max);
        } else if bytes_read < self.guess / 2 {
            self.decrease_streak += 1;
            if self.decrease_streak >= 2 {
                self.guess = (self.guess / 2).max(self.min);
                self.decrease_streak = 0;
            }
        } else {
            self.decrease_streak = 0;
        }
    }

    fn continue_reading(&self, more_data_expected: bool) -> bool {
        more_data_expected && self.last_bytes_read > 0 && self.messages_read < self.max_messages_per_read
    }

    fn read_complete(&mut self) {
        self.messages_read = 0;
    }
}
