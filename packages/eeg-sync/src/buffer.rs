// Rolling sample store with an append-only marker log
//
// One writer (the acquisition loop) appends samples, the protocol side records
// markers against the current tail, and renderers take point-in-time copies of
// the newest samples. Samples live in fixed-size chunks so growing the store never
// moves previously appended samples; the write lock is held only for the push
// itself. Channel values are reference counted, so a snapshot holds the read
// lock only long enough to copy pointers. Markers never touch the sample lock:
// they read a small tail record that the writer updates at the end of each append.

use crate::error::{BufferError, BufferResult};
use crate::types::{MarkerCode, MarkerEvent, RawSample, Sample};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Samples per arena chunk
const CHUNK_SAMPLES: usize = 4096;

/// Chunked, append-only sample storage
#[derive(Default)]
struct Arena {
    chunks: Vec<Vec<Sample>>,
    len: usize,
}

impl Arena {
    fn push(&mut self, sample: Sample) {
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < CHUNK_SAMPLES => chunk.push(sample),
            _ => {
                let mut chunk = Vec::with_capacity(CHUNK_SAMPLES);
                chunk.push(sample);
                self.chunks.push(chunk);
            }
        }
        self.len += 1;
    }

    fn get(&self, index: usize) -> Option<&Sample> {
        self.chunks
            .get(index / CHUNK_SAMPLES)
            .and_then(|chunk| chunk.get(index % CHUNK_SAMPLES))
    }

    fn tail(&self, n: usize) -> Vec<Sample> {
        let start = self.len.saturating_sub(n);
        (start..self.len).filter_map(|i| self.get(i).cloned()).collect()
    }

    fn take_all(&mut self) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(self.len);
        for chunk in self.chunks.drain(..) {
            samples.extend(chunk);
        }
        self.len = 0;
        samples
    }
}

/// Position of the most recently appended sample
#[derive(Debug, Default)]
struct Tail {
    next_index: u64,
    last_timestamp: Option<f64>,
    appended_at: Option<Instant>,
}

/// Everything the buffer captured, handed to persistence exactly once
#[derive(Debug, Clone, Default)]
pub struct BufferContents {
    pub samples: Vec<Sample>,
    pub markers: Vec<MarkerEvent>,
}

/// Thread-safe rolling store of timestamped multichannel samples
pub struct SampleBuffer {
    channel_count: usize,
    capacity: Option<usize>,
    arena: RwLock<Arena>,
    tail: Mutex<Tail>,
    markers: Mutex<Vec<MarkerEvent>>,

    // Lock-free view of the sample count for pollers
    appended: AtomicU64,
    sealed: AtomicBool,
    drained: AtomicBool,
}

impl SampleBuffer {
    /// Create an unbounded buffer for `channel_count` channels
    pub fn new(channel_count: usize) -> Self {
        Self::with_capacity(channel_count, None)
    }

    /// Create a buffer with an optional hard ceiling on the number of samples
    ///
    /// Reaching the ceiling is reported as `BufferError::Full`; samples are never
    /// evicted.
    pub fn with_capacity(channel_count: usize, capacity: Option<usize>) -> Self {
        Self {
            channel_count,
            capacity,
            arena: RwLock::new(Arena::default()),
            tail: Mutex::new(Tail::default()),
            markers: Mutex::new(Vec::new()),
            appended: AtomicU64::new(0),
            sealed: AtomicBool::new(false),
            drained: AtomicBool::new(false),
        }
    }

    /// Append one sample and return its sequence index
    pub fn append(&self, sample: RawSample) -> BufferResult<u64> {
        self.check_arity(&sample)?;
        let mut arena = self.arena.write();
        self.check_room(&arena)?;
        Ok(self.push_locked(&mut arena, sample))
    }

    /// Append samples in arrival order under a single lock acquisition
    ///
    /// Returns the number of samples appended. When a capacity ceiling is hit the
    /// samples that fit are kept and `BufferError::Full` is returned.
    pub fn append_batch(&self, samples: Vec<RawSample>) -> BufferResult<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        for sample in &samples {
            self.check_arity(sample)?;
        }

        let mut arena = self.arena.write();
        let mut appended = 0;
        for sample in samples {
            self.check_room(&arena)?;
            self.push_locked(&mut arena, sample);
            appended += 1;
        }
        Ok(appended)
    }

    fn check_arity(&self, sample: &RawSample) -> BufferResult<()> {
        if sample.channels.len() != self.channel_count {
            return Err(BufferError::ChannelMismatch {
                expected: self.channel_count,
                got: sample.channels.len(),
            });
        }
        Ok(())
    }

    fn check_room(&self, arena: &Arena) -> BufferResult<()> {
        // Checked under the write lock so seal() cannot interleave with an append
        if self.sealed.load(Ordering::Acquire) {
            return Err(BufferError::Sealed);
        }
        match self.capacity {
            Some(capacity) if arena.len >= capacity => Err(BufferError::Full { capacity }),
            _ => Ok(()),
        }
    }

    fn push_locked(&self, arena: &mut Arena, raw: RawSample) -> u64 {
        let index = arena.len as u64;
        let timestamp = raw.timestamp;
        arena.push(Sample {
            index,
            timestamp,
            channels: raw.channels.into(),
        });

        let mut tail = self.tail.lock();
        tail.next_index = index + 1;
        tail.last_timestamp = Some(timestamp);
        tail.appended_at = Some(Instant::now());
        // Published under the tail lock so len() and marker tails agree
        self.appended.store(index + 1, Ordering::Release);
        index
    }

    /// Record a marker correlated with the current tail sample
    ///
    /// Takes the marker log lock and the tail lock, never the sample lock. If no
    /// sample has been appended yet the marker points at index 0, the next sample
    /// to arrive.
    pub fn record_marker_at_tail(&self, code: MarkerCode) -> MarkerEvent {
        let mut markers = self.markers.lock();
        let event = {
            let tail = self.tail.lock();
            MarkerEvent {
                code,
                sample_index: tail.next_index.saturating_sub(1),
                timestamp: tail.last_timestamp,
                lag: tail
                    .appended_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO),
                inserted_at: chrono::Utc::now(),
            }
        };
        markers.push(event.clone());
        event
    }

    /// Record a marker at an explicit sample index
    ///
    /// The index must refer to an existing sample or the next one to be appended.
    pub fn record_marker(&self, code: MarkerCode, at_index: u64) -> BufferResult<MarkerEvent> {
        let mut markers = self.markers.lock();
        let next = self.appended.load(Ordering::Acquire);
        if at_index > next {
            return Err(BufferError::MarkerOutOfRange {
                index: at_index,
                next,
            });
        }

        let timestamp = self
            .arena
            .read()
            .get(at_index as usize)
            .map(|sample| sample.timestamp);

        let event = MarkerEvent {
            code,
            sample_index: at_index,
            timestamp,
            lag: Duration::ZERO,
            inserted_at: chrono::Utc::now(),
        };
        markers.push(event.clone());
        Ok(event)
    }

    /// Copy of the newest `n` samples, oldest first
    pub fn snapshot_tail(&self, n: usize) -> Vec<Sample> {
        self.arena.read().tail(n)
    }

    /// Copy of the marker log in insertion order
    pub fn markers(&self) -> Vec<MarkerEvent> {
        self.markers.lock().clone()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.lock().len()
    }

    /// Number of samples appended so far
    pub fn len(&self) -> u64 {
        self.appended.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence index of the most recently appended sample
    pub fn tail_index(&self) -> Option<u64> {
        self.len().checked_sub(1)
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Refuse further samples; required before `drain_all`
    pub fn seal(&self) {
        let _arena = self.arena.write();
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Hand over every sample and marker for persistence
    ///
    /// Only valid once the producer side is stopped and the buffer sealed, so a
    /// drain can never race a live append.
    pub fn drain_all(&self) -> BufferResult<BufferContents> {
        if !self.is_sealed() {
            return Err(BufferError::NotSealed);
        }
        if self.drained.swap(true, Ordering::AcqRel) {
            return Err(BufferError::AlreadyDrained);
        }

        let samples = self.arena.write().take_all();
        let markers = std::mem::take(&mut *self.markers.lock());
        Ok(BufferContents { samples, markers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn raw(value: f64, channels: usize) -> RawSample {
        RawSample::new(vec![value; channels], value / 250.0)
    }

    #[test]
    fn test_append_assigns_consecutive_indices() {
        let buffer = SampleBuffer::new(4);
        for expected in 0..10u64 {
            let index = buffer.append(raw(expected as f64, 4)).unwrap();
            assert_eq!(index, expected);
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.tail_index(), Some(9));
    }

    #[test]
    fn test_batch_append_spans_chunks() {
        let buffer = SampleBuffer::new(2);
        let batch: Vec<RawSample> = (0..(CHUNK_SAMPLES + 10))
            .map(|i| raw(i as f64, 2))
            .collect();
        assert_eq!(buffer.append_batch(batch).unwrap(), CHUNK_SAMPLES + 10);

        let tail = buffer.snapshot_tail(20);
        assert_eq!(tail.len(), 20);
        assert_eq!(tail[0].index, (CHUNK_SAMPLES - 10) as u64);
        assert!(tail.windows(2).all(|w| w[1].index == w[0].index + 1));
    }

    #[test]
    fn test_snapshot_shares_channel_storage() {
        let buffer = SampleBuffer::new(3);
        for i in 0..5 {
            buffer.append(raw(i as f64, 3)).unwrap();
        }
        let first = buffer.snapshot_tail(2);
        let second = buffer.snapshot_tail(2);
        assert_eq!(first, second);
        assert!(first
            .iter()
            .zip(&second)
            .all(|(a, b)| Arc::ptr_eq(&a.channels, &b.channels)));
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let buffer = SampleBuffer::new(4);
        let err = buffer.append(raw(1.0, 3)).unwrap_err();
        assert_eq!(err, BufferError::ChannelMismatch { expected: 4, got: 3 });
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_capacity_ceiling_reports_full() {
        let buffer = SampleBuffer::with_capacity(1, Some(3));
        let batch: Vec<RawSample> = (0..5).map(|i| raw(i as f64, 1)).collect();
        let err = buffer.append_batch(batch).unwrap_err();
        assert_eq!(err, BufferError::Full { capacity: 3 });
        // Samples that fit are kept, nothing is evicted
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.snapshot_tail(10)[0].index, 0);
    }

    #[test]
    fn test_marker_before_first_sample_points_at_next_index() {
        let buffer = SampleBuffer::new(1);
        let marker = buffer.record_marker_at_tail(MarkerCode::RestStart);
        assert_eq!(marker.sample_index, 0);
        assert_eq!(marker.timestamp, None);
    }

    #[test]
    fn test_marker_correlates_with_tail() {
        let buffer = SampleBuffer::new(1);
        for i in 0..5 {
            buffer.append(raw(i as f64, 1)).unwrap();
        }
        let marker = buffer.record_marker_at_tail(MarkerCode::TrialStart);
        assert_eq!(marker.sample_index, 4);
        assert_eq!(marker.timestamp, Some(4.0 / 250.0));
        assert_eq!(buffer.markers(), vec![marker]);
    }

    #[test]
    fn test_explicit_marker_index_validated() {
        let buffer = SampleBuffer::new(1);
        buffer.append(raw(0.0, 1)).unwrap();
        assert!(buffer.record_marker(MarkerCode::TrialEnd, 1).is_ok());
        assert_eq!(
            buffer.record_marker(MarkerCode::TrialEnd, 2).unwrap_err(),
            BufferError::MarkerOutOfRange { index: 2, next: 1 }
        );
    }

    #[test]
    fn test_drain_requires_seal_and_happens_once() {
        let buffer = SampleBuffer::new(1);
        buffer.append(raw(1.0, 1)).unwrap();
        buffer.record_marker_at_tail(MarkerCode::ExperimentEnd);

        assert_eq!(buffer.drain_all().unwrap_err(), BufferError::NotSealed);

        buffer.seal();
        assert_eq!(buffer.append(raw(2.0, 1)).unwrap_err(), BufferError::Sealed);

        let contents = buffer.drain_all().unwrap();
        assert_eq!(contents.samples.len(), 1);
        assert_eq!(contents.markers.len(), 1);
        assert_eq!(buffer.drain_all().unwrap_err(), BufferError::AlreadyDrained);
    }

    #[test]
    fn test_concurrent_snapshots_never_torn_or_decreasing() {
        let buffer = Arc::new(SampleBuffer::new(8));
        let total = 20_000u64;

        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..total {
                    buffer.append(raw(i as f64, 8)).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    let mut last_seen = 0u64;
                    while buffer.len() < total {
                        let snapshot = buffer.snapshot_tail(64);
                        for sample in &snapshot {
                            // Every channel carries the index, a torn sample would differ
                            assert!(sample.channels.iter().all(|&v| v == sample.index as f64));
                        }
                        assert!(snapshot.windows(2).all(|w| w[1].index > w[0].index));
                        if let Some(last) = snapshot.last() {
                            assert!(last.index >= last_seen);
                            last_seen = last.index;
                        }
                    }
                })
            })
            .collect();

        let marker_thread = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                let mut previous = 0;
                for _ in 0..200 {
                    let tail_before = buffer.len();
                    let marker = buffer.record_marker_at_tail(MarkerCode::TrialStart);
                    let tail_after = buffer.len();
                    assert!(marker.sample_index >= previous);
                    if tail_before > 0 {
                        assert!(marker.sample_index >= tail_before - 1);
                    }
                    assert!(marker.sample_index <= tail_after.saturating_sub(1));
                    previous = marker.sample_index;
                }
            })
        };

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        marker_thread.join().unwrap();
        assert_eq!(buffer.len(), total);
    }
}
