//! Sample buffering for the live session

use crate::{ArchiveError, ArchiveResult};
use clima_core::SensorSample;
use tokio::sync::Mutex;

pub const DEFAULT_MAX_SAMPLES: usize = 100_000;

#[derive(Debug, Default)]
struct BufferState {
    samples: Vec<SensorSample>,
    latest: Option<SensorSample>,
}

/// Bounded queue of live samples waiting for the next flush.
///
/// Pushes and the flush snapshot each take the lock once, so a sample lands
/// either in the snapshot or in the buffer left behind, never both or neither.
#[derive(Debug)]
pub struct LiveBuffer {
    state: Mutex<BufferState>,
    max_samples: usize,
}

impl LiveBuffer {
    pub fn new(max_samples: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            max_samples,
        }
    }

    /// Add a sample to the buffer
    pub async fn push(&self, sample: SensorSample) -> ArchiveResult<()> {
        let mut state = self.state.lock().await;
        if state.samples.len() >= self.max_samples {
            return Err(ArchiveError::BufferOverflow);
        }
        state.latest = Some(sample.clone());
        state.samples.push(sample);
        Ok(())
    }

    /// Take every buffered sample, leaving the buffer empty
    pub async fn snapshot_and_clear(&self) -> Vec<SensorSample> {
        let mut state = self.state.lock().await;
        std::mem::take(&mut state.samples)
    }

    /// Put samples from a failed flush back in front of anything pushed since.
    ///
    /// Requeued samples are not counted against the bound.
    pub async fn requeue(&self, samples: Vec<SensorSample>) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        let newer = std::mem::replace(&mut state.samples, samples);
        state.samples.extend(newer);
    }

    /// Most recent sample received, kept across flushes
    pub async fn latest(&self) -> Option<SensorSample> {
        self.state.lock().await.latest.clone()
    }

    /// Get current sample count
    pub async fn len(&self) -> usize {
        self.state.lock().await.samples.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for LiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn sample(minute: u32, temperature: f64) -> SensorSample {
        let ts = NaiveDate::from_ymd_opt(2025, 6, 8)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap();
        SensorSample {
            temperature: Some(temperature),
            ..SensorSample::at(ts)
        }
    }

    #[tokio::test]
    async fn test_snapshot_clears_buffer() {
        let buffer = LiveBuffer::default();
        buffer.push(sample(1, 20.0)).await.unwrap();
        buffer.push(sample(2, 21.0)).await.unwrap();
        assert_eq!(buffer.len().await, 2);

        let taken = buffer.snapshot_and_clear().await;
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[1].temperature, Some(21.0));
        assert!(buffer.is_empty().await);
        assert!(buffer.snapshot_and_clear().await.is_empty());

        // latest survives the flush
        assert_eq!(buffer.latest().await.unwrap().temperature, Some(21.0));
    }

    #[tokio::test]
    async fn test_requeue_keeps_arrival_order() {
        let buffer = LiveBuffer::new(2);
        buffer.push(sample(1, 20.0)).await.unwrap();
        buffer.push(sample(2, 21.0)).await.unwrap();
        let taken = buffer.snapshot_and_clear().await;

        buffer.push(sample(3, 22.0)).await.unwrap();
        buffer.push(sample(4, 23.0)).await.unwrap();
        buffer.requeue(taken).await;

        let all = buffer.snapshot_and_clear().await;
        let temps: Vec<_> = all.iter().map(|s| s.temperature.unwrap()).collect();
        assert_eq!(temps, vec![20.0, 21.0, 22.0, 23.0]);
    }

    #[tokio::test]
    async fn test_buffer_overflow() {
        let buffer = LiveBuffer::new(2);
        buffer.push(sample(1, 20.0)).await.unwrap();
        buffer.push(sample(2, 20.0)).await.unwrap();
        assert!(matches!(
            buffer.push(sample(3, 20.0)).await,
            Err(ArchiveError::BufferOverflow)
        ));

        buffer.snapshot_and_clear().await;
        buffer.push(sample(4, 20.0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_pushes_are_not_lost() {
        let buffer = Arc::new(LiveBuffer::default());
        let mut tasks = Vec::new();
        for worker in 0..4 {
            let buffer = Arc::clone(&buffer);
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    buffer.push(sample(i % 60, f64::from(worker))).await.unwrap();
                }
            }));
        }

        let mut collected = 0;
        for task in tasks {
            collected += buffer.snapshot_and_clear().await.len();
            task.await.unwrap();
        }
        collected += buffer.snapshot_and_clear().await.len();
        assert_eq!(collected, 200);
    }
}
