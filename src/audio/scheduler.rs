//! Gapless playback scheduling against the output device clock
//!
//! Buffers are placed back to back: each one starts where the previous one
//! ends, or at the device's current time if the queue has run dry. An
//! interruption stops everything that is queued and rewinds the cursor.

use std::collections::BTreeMap;

use crate::audio::buffer::PlaybackBuffer;
use crate::audio::playback::{BufferId, OutputHandle};
use crate::error::AudioError;

/// Placement of one buffer on the device timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Tracks the next start time and every buffer that is still playing or queued
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
    next_id: BufferId,
    live: BTreeMap<BufferId, ScheduledBuffer>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `buffer` right after everything already scheduled
    pub fn schedule(
        &mut self,
        buffer: &PlaybackBuffer,
        output: &mut dyn OutputHandle,
    ) -> Result<ScheduledBuffer, AudioError> {
        let start = self.cursor.max(output.now());
        let duration = buffer.duration_secs();
        let id = self.next_id;

        output.play_at(id, buffer, start)?;

        self.next_id += 1;
        self.cursor = start + duration;
        let scheduled = ScheduledBuffer {
            id,
            start,
            duration,
        };
        self.live.insert(id, scheduled);
        Ok(scheduled)
    }

    /// A buffer finished on its own; returns false for unknown ids
    pub fn complete(&mut self, id: BufferId) -> bool {
        self.live.remove(&id).is_some()
    }

    /// Stop every live buffer and rewind the cursor. Returns how many were stopped.
    pub fn cancel_all(&mut self, output: &mut dyn OutputHandle) -> usize {
        let ids: Vec<BufferId> = self.live.keys().copied().collect();
        output.stop_all(&ids);
        self.live.clear();
        self.cursor = 0.0;
        ids.len()
    }

    /// Forget all state without touching a device
    pub fn reset(&mut self) {
        self.live.clear();
        self.cursor = 0.0;
    }

    /// Device time at which the next buffer would start if the queue never drains
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[derive(Default)]
    struct ClockedOutput {
        now: f64,
        played: Vec<(BufferId, f64)>,
        stopped: Vec<BufferId>,
        stop_all_calls: usize,
        fail: bool,
    }

    impl OutputHandle for ClockedOutput {
        fn now(&self) -> f64 {
            self.now
        }

        fn play_at(
            &mut self,
            id: BufferId,
            _buffer: &PlaybackBuffer,
            start_secs: f64,
        ) -> Result<(), AudioError> {
            if self.fail {
                return Err(AudioError::Released);
            }
            self.played.push((id, start_secs));
            Ok(())
        }

        fn stop(&mut self, id: BufferId) {
            self.stopped.push(id);
        }

        fn stop_all(&mut self, ids: &[BufferId]) {
            self.stop_all_calls += 1;
            self.stopped.extend_from_slice(ids);
        }

        fn release(&mut self) {}
    }

    fn buffer(secs: f64) -> PlaybackBuffer {
        PlaybackBuffer::silence(secs, 1000)
    }

    #[test]
    fn test_back_to_back_schedule() {
        let mut output = ClockedOutput {
            now: 10.0,
            ..Default::default()
        };
        let mut scheduler = PlaybackScheduler::new();

        let a = scheduler.schedule(&buffer(0.5), &mut output).unwrap();
        let b = scheduler.schedule(&buffer(0.3), &mut output).unwrap();
        let c = scheduler.schedule(&buffer(0.4), &mut output).unwrap();

        assert_relative_eq!(a.start, 10.0);
        assert_relative_eq!(b.start, 10.5, epsilon = 1e-9);
        assert_relative_eq!(c.start, 10.8, epsilon = 1e-9);
        assert_relative_eq!(scheduler.cursor(), 11.2, epsilon = 1e-9);
        assert_eq!(scheduler.live_count(), 3);
    }

    #[test]
    fn test_drained_queue_restarts_at_device_time() {
        let mut output = ClockedOutput::default();
        let mut scheduler = PlaybackScheduler::new();

        let first = scheduler.schedule(&buffer(0.2), &mut output).unwrap();
        scheduler.complete(first.id);
        output.now = 5.0;
        let second = scheduler.schedule(&buffer(0.2), &mut output).unwrap();

        assert_relative_eq!(second.start, 5.0);
    }

    #[test]
    fn test_cancel_all_stops_live_and_rewinds() {
        let mut output = ClockedOutput {
            now: 1.0,
            ..Default::default()
        };
        let mut scheduler = PlaybackScheduler::new();
        for _ in 0..3 {
            scheduler.schedule(&buffer(0.5), &mut output).unwrap();
        }
        scheduler.complete(0);

        assert_eq!(scheduler.cancel_all(&mut output), 2);
        assert_eq!(output.stopped, vec![1, 2]);
        assert_eq!(output.stop_all_calls, 1);
        assert_eq!(scheduler.live_count(), 0);
        assert_eq!(scheduler.cursor(), 0.0);

        output.now = 1.2;
        let next = scheduler.schedule(&buffer(0.1), &mut output).unwrap();
        assert_relative_eq!(next.start, 1.2);
    }

    #[test]
    fn test_complete_unknown_id() {
        let mut scheduler = PlaybackScheduler::new();
        assert!(!scheduler.complete(42));
    }

    #[test]
    fn test_failed_play_leaves_state_untouched() {
        let mut output = ClockedOutput {
            fail: true,
            ..Default::default()
        };
        let mut scheduler = PlaybackScheduler::new();

        assert!(scheduler.schedule(&buffer(0.5), &mut output).is_err());
        assert_eq!(scheduler.live_count(), 0);
        assert_eq!(scheduler.cursor(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_schedules_never_overlap(
            durations in proptest::collection::vec(1u32..2000, 1..20),
            clock_steps in proptest::collection::vec(0u32..500, 1..20),
        ) {
            let mut output = ClockedOutput::default();
            let mut scheduler = PlaybackScheduler::new();
            let mut previous: Option<ScheduledBuffer> = None;

            for (i, ms) in durations.iter().enumerate() {
                output.now += clock_steps[i % clock_steps.len()] as f64 / 1000.0;
                let scheduled = scheduler
                    .schedule(&buffer(*ms as f64 / 1000.0), &mut output)
                    .unwrap();

                prop_assert!(scheduled.start >= output.now);
                if let Some(prev) = previous {
                    prop_assert!(scheduled.start >= prev.end() - 1e-9);
                }
                previous = Some(scheduled);
            }
        }
    }
}
