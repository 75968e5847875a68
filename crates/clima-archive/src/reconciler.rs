//! Reconciliation cycles: load, plan, fetch, merge, persist

use crate::{ArchiveResult, LiveBuffer};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use clima_core::{
    aggregate_hourly, discard_future, group_into_days, plan_range, Dataset, DatasetStore, DayBucket,
    HistoryProvider, Location, MergePolicy, MergeStats, PlannerConfig, RangePlan, RecordLog,
    SensorSample,
};
use clima_ingest::local_now;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Outcome of one cycle, including the dataset as persisted
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Set for backfills only
    pub plan: Option<RangePlan>,
    /// Last location reported by the provider, if any
    pub location: Option<Location>,
    /// Raw samples consumed by a live flush
    pub samples: usize,
    pub stats: MergeStats,
    /// Rows appended to the record log
    pub logged: usize,
    pub dataset: Dataset,
}

impl CycleReport {
    fn unchanged(dataset: Dataset, location: Option<Location>) -> Self {
        Self {
            plan: None,
            location,
            samples: 0,
            stats: MergeStats::default(),
            logged: 0,
            dataset,
        }
    }
}

/// Serializes every write to the dataset behind one cycle guard
pub struct Reconciler {
    store: Arc<dyn DatasetStore>,
    log: Arc<dyn RecordLog>,
    provider: Arc<dyn HistoryProvider>,
    planner: PlannerConfig,
    tz: Tz,
    location: RwLock<Option<Location>>,
    cycle: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DatasetStore>,
        log: Arc<dyn RecordLog>,
        provider: Arc<dyn HistoryProvider>,
        planner: PlannerConfig,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            log,
            provider,
            planner,
            tz,
            location: RwLock::new(None),
            cycle: Mutex::new(()),
        }
    }

    /// Last location the provider reported
    pub async fn location(&self) -> Option<Location> {
        self.location.read().await.clone()
    }

    /// Read the stored dataset without modifying it
    pub async fn load(&self) -> ArchiveResult<Dataset> {
        let _guard = self.cycle.lock().await;
        Ok(self.store.load().await?)
    }

    /// Bring the dataset up to date with the provider as of the current local time
    pub async fn backfill(&self) -> ArchiveResult<CycleReport> {
        self.backfill_at(local_now(&self.tz)).await
    }

    /// Backfill cycle with an explicit notion of "now" in the station timezone.
    ///
    /// On provider failure nothing is merged or written.
    #[instrument(skip(self))]
    pub async fn backfill_at(&self, now: NaiveDateTime) -> ArchiveResult<CycleReport> {
        let _guard = self.cycle.lock().await;

        let mut dataset = self.store.load().await?;
        let plan = plan_range(&dataset, now.date(), &self.planner);
        if plan.already_current {
            info!(latest = ?dataset.latest_date(), "dataset already current, skipping fetch");
            let mut report = CycleReport::unchanged(dataset, self.location().await);
            report.plan = Some(plan);
            return Ok(report);
        }

        debug!(from = %plan.fetch_from, to = %plan.fetch_to, "fetching provider history");
        let history = self
            .provider
            .fetch_history(plan.fetch_from, plan.fetch_to)
            .await
            .map_err(|e| {
                warn!(error = %e, "provider fetch failed, nothing persisted");
                e
            })?;

        if let Some(location) = history.location {
            *self.location.write().await = Some(location);
        }

        let incoming = discard_future(history.days, now);
        let stats = dataset.merge(incoming.iter().cloned(), MergePolicy::Replace);
        self.store.save(&dataset).await?;
        let logged = self.log.append(&incoming).await?;

        info!(
            new_days = stats.new_days,
            inserted = stats.inserted,
            replaced = stats.replaced,
            logged,
            "backfill merged"
        );

        Ok(CycleReport {
            plan: Some(plan),
            location: self.location().await,
            samples: 0,
            stats,
            logged,
            dataset,
        })
    }

    /// Drain the live buffer, aggregate the samples per hour and merge them
    /// with the combine policy. An empty buffer leaves storage untouched.
    ///
    /// The buffer is only drained once the stored dataset has loaded. If the
    /// merged dataset cannot be saved the samples go back into the buffer.
    #[instrument(skip(self, buffer))]
    pub async fn flush_live(&self, buffer: &LiveBuffer) -> ArchiveResult<CycleReport> {
        let _guard = self.cycle.lock().await;

        let mut dataset = self.store.load().await?;
        let samples = buffer.snapshot_and_clear().await;
        if samples.is_empty() {
            debug!("no live samples to flush");
            return Ok(CycleReport::unchanged(dataset, self.location().await));
        }

        let (days, stats) = fold_samples(&mut dataset, &samples);
        if let Err(e) = self.store.save(&dataset).await {
            warn!(error = %e, samples = samples.len(), "live flush not saved, samples requeued");
            buffer.requeue(samples).await;
            return Err(e.into());
        }
        // The dataset already holds these samples, so a log failure does not requeue
        let logged = self.log.append(&days).await?;
        self.live_report(samples.len(), stats, logged, dataset).await
    }

    async fn live_report(
        &self,
        samples: usize,
        stats: MergeStats,
        logged: usize,
        dataset: Dataset,
    ) -> ArchiveResult<CycleReport> {
        info!(
            hours = stats.touched(),
            combined = stats.combined,
            logged,
            "live samples merged"
        );
        Ok(CycleReport {
            plan: None,
            location: self.location().await,
            samples,
            stats,
            logged,
            dataset,
        })
    }
}

fn fold_samples(dataset: &mut Dataset, samples: &[SensorSample]) -> (Vec<DayBucket>, MergeStats) {
    let days = group_into_days(aggregate_hourly(samples));
    let stats = dataset.merge(days.iter().cloned(), MergePolicy::Combine);
    (days, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};
    use clima_core::{Measurements, ProviderHistory, Reading, StoreError, StoreResult, UpstreamError};
    use clima_store::{CsvRecordLog, JsonDocumentStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeProvider {
        calls: AtomicUsize,
        requested: StdMutex<Vec<(NaiveDate, NaiveDate)>>,
        fail: bool,
    }

    impl FakeProvider {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                requested: StdMutex::new(Vec::new()),
                fail,
            })
        }
    }

    fn reading(h: u32, temperature: f64) -> Reading {
        Reading::new(
            NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            Measurements {
                temperature,
                humidity: 80.0,
                pressure: 1020.0,
                wind_speed: 4.0,
                cloud_cover: 10.0,
            },
            false,
        )
        .unwrap()
    }

    #[async_trait]
    impl HistoryProvider for FakeProvider {
        async fn fetch_history(
            &self,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<ProviderHistory, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push((from, to));
            if self.fail {
                return Err(UpstreamError::Unavailable("connection refused".into()));
            }
            let days = from
                .iter_days()
                .take_while(|d| *d <= to)
                .map(|d| DayBucket::with_readings(d, (0..24).map(|h| reading(h, 15.0)).collect()))
                .collect();
            Ok(ProviderHistory {
                location: Some(Location {
                    name: "Bogota".into(),
                    region: "Cundinamarca".into(),
                    country: "Colombia".into(),
                }),
                days,
            })
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        json: std::path::PathBuf,
        csv: std::path::PathBuf,
        provider: Arc<FakeProvider>,
        reconciler: Reconciler,
    }

    fn harness(fail: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("clima.json");
        let csv = dir.path().join("historial.csv");
        let provider = FakeProvider::new(fail);
        let reconciler = Reconciler::new(
            Arc::new(JsonDocumentStore::new(&json)),
            Arc::new(CsvRecordLog::new(&csv)),
            provider.clone(),
            PlannerConfig::default(),
            chrono_tz::America::Bogota,
        );
        Harness {
            _dir: dir,
            json,
            csv,
            provider,
            reconciler,
        }
    }

    fn at(date: &str, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_backfill_empty_store_and_future_guard() {
        let h = harness(false);
        let report = h.reconciler.backfill_at(at("2025-06-10", 14, 30)).await.unwrap();

        let plan = report.plan.unwrap();
        assert_eq!(plan.fetch_from, NaiveDate::from_ymd_opt(2025, 6, 3).unwrap());
        assert_eq!(report.dataset.len(), 8);
        // 7 full days plus 00:00..=14:00 today
        assert_eq!(report.dataset.hour_count(), 7 * 24 + 15);
        assert_eq!(report.logged, 7 * 24 + 15);
        assert_eq!(report.location.unwrap().name, "Bogota");

        let csv = std::fs::read_to_string(&h.csv).unwrap();
        assert_eq!(csv.lines().count(), 1 + 7 * 24 + 15);
        assert!(h.json.exists());
    }

    #[tokio::test]
    async fn test_backfill_skips_fetch_when_current() {
        let h = harness(false);
        h.reconciler.backfill_at(at("2025-06-10", 9, 0)).await.unwrap();
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);

        let report = h.reconciler.backfill_at(at("2025-06-10", 18, 0)).await.unwrap();
        assert!(report.plan.unwrap().already_current);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.logged, 0);
        // location is remembered from the earlier fetch
        assert!(report.location.is_some());
    }

    #[tokio::test]
    async fn test_backfill_next_day_fetches_only_today() {
        let h = harness(false);
        h.reconciler.backfill_at(at("2025-06-09", 23, 10)).await.unwrap();
        h.reconciler.backfill_at(at("2025-06-10", 0, 20)).await.unwrap();

        let requested = h.provider.requested.lock().unwrap().clone();
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        assert_eq!(requested[1], (today, today));
    }

    #[tokio::test]
    async fn test_backfill_is_idempotent_on_stored_data() {
        let h = harness(false);
        let first = h.reconciler.backfill_at(at("2025-06-10", 9, 0)).await.unwrap();
        let reloaded = h.reconciler.load().await.unwrap();
        assert_eq!(first.dataset, reloaded);
    }

    #[tokio::test]
    async fn test_upstream_failure_persists_nothing() {
        let h = harness(true);
        let err = h.reconciler.backfill_at(at("2025-06-10", 9, 0)).await.unwrap_err();
        assert!(matches!(err, crate::ArchiveError::Upstream(_)));
        assert!(!h.json.exists());
        assert!(!h.csv.exists());
    }

    #[tokio::test]
    async fn test_live_flush_combines_with_stored_hour() {
        let h = harness(false);
        h.reconciler.backfill_at(at("2025-06-08", 12, 0)).await.unwrap();

        let buffer = LiveBuffer::default();
        for (minute, temperature) in [(5, 24.0), (35, 26.0)] {
            buffer
                .push(SensorSample {
                    temperature: Some(temperature),
                    humidity: Some(80.0),
                    pressure: Some(1020.0),
                    wind_speed: Some(4.0),
                    cloud_cover: Some(10.0),
                    ..SensorSample::at(at("2025-06-08", 10, minute))
                })
                .await
                .unwrap();
        }

        let report = h.reconciler.flush_live(&buffer).await.unwrap();
        assert!(buffer.is_empty().await);
        assert_eq!(report.samples, 2);
        assert_eq!(report.stats.combined, 1);
        assert_eq!(report.logged, 1);

        let day = report.dataset.day(NaiveDate::from_ymd_opt(2025, 6, 8).unwrap()).unwrap();
        let hour = day.reading(NaiveTime::from_hms_opt(10, 0, 0).unwrap()).unwrap();
        // stored 15.00 combined with the 25.00 hourly mean
        assert_eq!(hour.temperature, 20.0);
    }

    #[tokio::test]
    async fn test_empty_flush_touches_nothing() {
        let h = harness(false);
        let report = h.reconciler.flush_live(&LiveBuffer::default()).await.unwrap();
        assert_eq!(report.stats, MergeStats::default());
        assert!(!h.json.exists());
        assert!(!h.csv.exists());
    }

    /// Store whose load or save can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        fail_load: bool,
        fail_save: bool,
        saved: StdMutex<Option<Dataset>>,
    }

    #[async_trait]
    impl DatasetStore for FlakyStore {
        async fn load(&self) -> StoreResult<Dataset> {
            if self.fail_load {
                return Err(StoreError::Backend("disk unavailable".into()));
            }
            Ok(self.saved.lock().unwrap().clone().unwrap_or_default())
        }

        async fn save(&self, dataset: &Dataset) -> StoreResult<()> {
            if self.fail_save {
                return Err(StoreError::Backend("disk full".into()));
            }
            *self.saved.lock().unwrap() = Some(dataset.clone());
            Ok(())
        }
    }

    fn flaky_reconciler(store: FlakyStore) -> (tempfile::TempDir, Reconciler) {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(
            Arc::new(store),
            Arc::new(CsvRecordLog::new(dir.path().join("historial.csv"))),
            FakeProvider::new(false),
            PlannerConfig::default(),
            chrono_tz::America::Bogota,
        );
        (dir, reconciler)
    }

    async fn buffered(count: u32) -> LiveBuffer {
        let buffer = LiveBuffer::default();
        for minute in 0..count {
            buffer
                .push(SensorSample {
                    temperature: Some(21.0),
                    ..SensorSample::at(at("2025-06-08", 10, minute))
                })
                .await
                .unwrap();
        }
        buffer
    }

    #[tokio::test]
    async fn test_failed_load_keeps_samples_buffered() {
        let (_dir, reconciler) = flaky_reconciler(FlakyStore {
            fail_load: true,
            ..FlakyStore::default()
        });
        let buffer = buffered(1).await;

        let err = reconciler.flush_live(&buffer).await.unwrap_err();
        assert!(matches!(err, crate::ArchiveError::Store(_)));
        assert_eq!(buffer.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_save_requeues_samples() {
        let (_dir, reconciler) = flaky_reconciler(FlakyStore {
            fail_save: true,
            ..FlakyStore::default()
        });
        let buffer = buffered(3).await;

        assert!(reconciler.flush_live(&buffer).await.is_err());
        let kept = buffer.snapshot_and_clear().await;
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].timestamp, at("2025-06-08", 10, 0));
    }

    #[tokio::test]
    async fn test_flush_after_recovery_persists_requeued_samples() {
        let h = harness(false);
        let buffer = buffered(2).await;

        // a directory in place of the document makes the store fail
        std::fs::create_dir_all(h.json.join("blocked")).unwrap();
        assert!(h.reconciler.flush_live(&buffer).await.is_err());
        assert_eq!(buffer.len().await, 2);

        std::fs::remove_dir_all(&h.json).unwrap();
        let report = h.reconciler.flush_live(&buffer).await.unwrap();
        assert_eq!(report.samples, 2);
        assert_eq!(report.dataset.hour_count(), 1);
        assert!(buffer.is_empty().await);
    }
}
