//! Paced playback queue (§4.5). Smooths bursty provider audio deltas into
//! fixed-size, fixed-cadence chunks toward the transport.
//!
//! The queue itself doesn't own a timer; callers drive it with `tick()` on
//! their own `tokio::time::interval`, the same way the server's websocket
//! audio task ticks its own queue.

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacerEvent {
    AudioChunk(Vec<u8>),
    PlaybackStopped,
    QueueCleared(usize),
    Interrupted,
}

pub struct PacedQueue {
    chunks: VecDeque<Vec<u8>>,
    residual: Vec<u8>,
    max_queue_size: usize,
    chunk_size: usize,
    playing: bool,
    pub chunks_processed: u64,
    pub chunks_dropped: u64,
    total_queued_bytes: u64,
    sample_rate_hz: u32,
}

impl PacedQueue {
    pub fn new(max_queue_size: usize, chunk_size: usize, sample_rate_hz: u32) -> Self {
        Self {
            chunks: VecDeque::new(),
            residual: Vec::new(),
            max_queue_size,
            chunk_size,
            playing: false,
            chunks_processed: 0,
            chunks_dropped: 0,
            total_queued_bytes: 0,
            sample_rate_hz,
        }
    }

    /// Ignores empty buffers; drops the oldest queued chunks to make room
    /// when at capacity, then starts playback if it was stopped.
    pub fn enqueue(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        while self.chunks.len() >= self.max_queue_size {
            match self.chunks.pop_front() {
                Some(dropped) => {
                    self.chunks_dropped += 1;
                    self.total_queued_bytes = self.total_queued_bytes.saturating_sub(dropped.len() as u64);
                }
                None => break,
            }
        }
        self.total_queued_bytes += bytes.len() as u64;
        self.chunks.push_back(bytes);
        self.playing = true;
    }

    /// Advance one tick: emit up to `chunk_size` bytes from the residual
    /// head buffer, refilling it from the queue as needed.
    pub fn tick(&mut self) -> Option<PacerEvent> {
        if !self.playing {
            return None;
        }

        if self.residual.is_empty() {
            match self.chunks.pop_front() {
                Some(next) => self.residual = next,
                None => {
                    self.playing = false;
                    return Some(PacerEvent::PlaybackStopped);
                },
            }
        }

        let take = self.chunk_size.min(self.residual.len());
        let chunk: Vec<u8> = self.residual.drain(0..take).collect();
        self.chunks_processed += 1;
        self.total_queued_bytes = self.total_queued_bytes.saturating_sub(take as u64);

        if self.residual.is_empty() && self.chunks.is_empty() {
            self.playing = false;
            // Emit this chunk now; the caller will see PlaybackStopped on
            // the next tick once truly drained, matching §4.5's semantics
            // ("if no more data, stop the timer and emit playbackStopped").
        }

        Some(PacerEvent::AudioChunk(chunk))
    }

    /// Drop all queued chunks (including the residual head); emits
    /// `QueueCleared` only if anything was actually dropped.
    pub fn clear(&mut self) -> Option<PacerEvent> {
        let count = self.chunks.len() + usize::from(!self.residual.is_empty());
        self.chunks.clear();
        self.residual.clear();
        self.total_queued_bytes = 0;
        if count == 0 {
            return None;
        }
        self.playing = false;
        Some(PacerEvent::QueueCleared(count))
    }

    pub fn interrupt(&mut self) -> PacerEvent {
        self.clear();
        PacerEvent::Interrupted
    }

    /// Duration of audio still buffered (not yet emitted by `tick()`), per
    /// §4.5's `queueDurationMs = totalQueuedBytes / (sampleRate * 2 / 1000)`.
    pub fn queue_duration_ms(&self) -> u64 {
        let bytes_per_ms = (self.sample_rate_hz as u64 * 2) / 1000;
        if bytes_per_ms == 0 {
            return 0;
        }
        self.total_queued_bytes / bytes_per_ms
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_enqueue_is_ignored() {
        let mut q = PacedQueue::new(10, 4, 16000);
        q.enqueue(Vec::new());
        assert!(!q.is_playing());
        assert_eq!(q.tick(), None);
    }

    #[test]
    fn tick_never_emits_more_than_chunk_size() {
        let mut q = PacedQueue::new(10, 4, 16000);
        q.enqueue(vec![1, 2, 3, 4, 5, 6, 7]);
        while let Some(event) = q.tick() {
            if let PacerEvent::AudioChunk(chunk) = event {
                assert!(chunk.len() <= 4);
            }
        }
    }

    #[test]
    fn byte_conservation_holds() {
        let mut q = PacedQueue::new(10, 4, 16000);
        let input = vec![1u8; 37];
        q.enqueue(input.clone());

        let mut emitted = 0usize;
        loop {
            match q.tick() {
                Some(PacerEvent::AudioChunk(chunk)) => emitted += chunk.len(),
                Some(PacerEvent::PlaybackStopped) => break,
                _ => break,
            }
        }
        assert_eq!(emitted, input.len());
    }

    #[test]
    fn double_interrupt_matches_single_interrupt() {
        let mut q = PacedQueue::new(10, 4, 16000);
        q.enqueue(vec![1, 2, 3, 4]);
        q.interrupt();
        let state_after_one = (q.is_playing(), q.chunks.len(), q.residual.clone());
        q.interrupt();
        let state_after_two = (q.is_playing(), q.chunks.len(), q.residual.clone());
        assert_eq!(state_after_one, state_after_two);
    }

    #[test]
    fn queue_duration_reflects_current_backlog_not_lifetime_total() {
        let mut q = PacedQueue::new(10, 32, 16000); // 32 bytes/ms at 16kHz mono PCM16
        q.enqueue(vec![0u8; 64]);
        assert_eq!(q.queue_duration_ms(), 2);

        q.tick();
        assert_eq!(q.queue_duration_ms(), 1);

        q.tick();
        assert_eq!(q.queue_duration_ms(), 0);

        q.enqueue(vec![0u8; 32]);
        assert_eq!(q.queue_duration_ms(), 1);
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut q = PacedQueue::new(2, 4, 16000);
        q.enqueue(vec![1; 4]);
        q.enqueue(vec![2; 4]);
        q.enqueue(vec![3; 4]); // queue full at 2 -> drops oldest (1s)
        assert_eq!(q.chunks_dropped, 1);
        assert_eq!(q.chunks.len(), 2);
    }
}
