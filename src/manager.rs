use crate::adapter::{check_connection, PlantAdapter};
use crate::api::Error;
use crate::clock::{Clock, SystemClock};
use crate::metrics;
use crate::plant::{Plant, PlantSnapshot, SharedPlant};
use crate::session::{KeepAlive, NorthboundManager, SessionManager};
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_secs(1);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
/* in wait ticks */
const LIVENESS_PERIOD: u64 = 10;
const KEEP_ALIVE_PERIOD: u64 = 30;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

struct Entry {
    key: String,
    plant: SharedPlant,
    adapter: Arc<dyn PlantAdapter>,
}

/// Cancellation of one spawned loop. A restarted loop never shares it with an old one.
struct Run {
    generation: u64,
    cancelled: AtomicBool,
    wake: Notify,
}

impl Run {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct Worker {
    run: Arc<Run>,
    handle: JoinHandle<()>,
}

struct Inner {
    /* registration order */
    plants: Vec<Entry>,
    interval: Duration,
    stop_timeout: Duration,
    keep_alive: Vec<Arc<dyn KeepAlive>>,
    close_on_stop: Vec<Arc<NorthboundManager>>,
    clock: Arc<dyn Clock>,
    liveness_period: u64,
    keep_alive_period: u64,
    /* generation of the live loop, 0 when none */
    active: AtomicU64,
    generation: AtomicU64,
    worker: Mutex<Option<Worker>>,
    /* one writer at a time: background cycle or forced update */
    cycle: Mutex<()>,
}

/// Clears `active` when the loop of its generation exits, however it exits.
struct ExitGuard {
    inner: Arc<Inner>,
    generation: u64,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        /* a newer loop may own the slot already */
        let released = self
            .inner
            .active
            .compare_exchange(self.generation, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        log::debug!(
            "monitoring loop {} exited{}",
            self.generation,
            if released { ", monitoring inactive" } else { "" }
        );
    }
}

/// Counts wait ticks and says when liveness and keep-alive calls are due.
#[derive(Debug, Clone)]
struct PingSchedule {
    liveness_period: u64,
    keep_alive_period: u64,
    liveness_ticks: u64,
    keep_alive_ticks: u64,
}

impl PingSchedule {
    fn new(liveness_period: u64, keep_alive_period: u64) -> Self {
        PingSchedule {
            liveness_period,
            keep_alive_period,
            liveness_ticks: 0,
            keep_alive_ticks: 0,
        }
    }

    /// `(liveness due, keep-alive due)` after one more tick.
    fn tick(&mut self) -> (bool, bool) {
        self.liveness_ticks += 1;
        self.keep_alive_ticks += 1;

        let liveness = self.liveness_ticks >= self.liveness_period;
        if liveness {
            self.liveness_ticks = 0;
        }
        let keep_alive = self.keep_alive_ticks >= self.keep_alive_period;
        if keep_alive {
            self.keep_alive_ticks = 0;
        }
        (liveness, keep_alive)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_plants: usize,
    pub online_count: usize,
    pub offline_count: usize,
    pub warning_count: usize,
    pub total_power: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStatus {
    pub active: bool,
    pub interval_seconds: u64,
    pub stats: Stats,
}

pub struct PlantManagerBuilder {
    plants: Vec<Entry>,
    interval: Duration,
    stop_timeout: Duration,
    keep_alive: Vec<Arc<dyn KeepAlive>>,
    close_on_stop: Vec<Arc<NorthboundManager>>,
    clock: Arc<dyn Clock>,
    liveness_period: u64,
    keep_alive_period: u64,
}

impl PlantManagerBuilder {
    /// Register `plant` under `key`. Keys are unique; a repeated key replaces the earlier
    /// registration.
    pub fn plant<K: Into<String>>(mut self, key: K, plant: Plant, adapter: Arc<dyn PlantAdapter>) -> Self {
        let key = key.into();
        log::info!(
            "registered {} plant: {} (ID: {})",
            plant.identity().provider,
            plant.identity().name,
            plant.identity().id
        );
        self.plants.retain(|entry| entry.key != key);
        self.plants.push(Entry {
            key,
            plant: SharedPlant::new(plant),
            adapter,
        });
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// How long `stop` waits for the loop before aborting it.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Session to ping for liveness and keep alive while the loop waits.
    pub fn keep_alive(mut self, sessions: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive.push(sessions);
        self
    }

    /// Wait ticks between liveness checks and between keep-alive calls.
    pub fn ping_periods(mut self, liveness: u64, keep_alive: u64) -> Self {
        self.liveness_period = liveness.max(1);
        self.keep_alive_period = keep_alive.max(1);
        self
    }

    /// Session to close when monitoring stops.
    pub fn close_on_stop(mut self, sessions: Arc<NorthboundManager>) -> Self {
        self.close_on_stop.push(sessions);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> PlantManager {
        PlantManager {
            inner: Arc::new(Inner {
                plants: self.plants,
                interval: self.interval,
                stop_timeout: self.stop_timeout,
                keep_alive: self.keep_alive,
                close_on_stop: self.close_on_stop,
                clock: self.clock,
                liveness_period: self.liveness_period,
                keep_alive_period: self.keep_alive_period,
                active: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                worker: Mutex::new(None),
                cycle: Mutex::new(()),
            }),
        }
    }
}

/// Cheap to clone; clones drive the same loop and plants.
#[derive(Clone)]
pub struct PlantManager {
    inner: Arc<Inner>,
}

impl PlantManager {
    pub fn builder() -> PlantManagerBuilder {
        PlantManagerBuilder {
            plants: Vec::new(),
            interval: DEFAULT_INTERVAL,
            stop_timeout: STOP_TIMEOUT,
            keep_alive: Vec::new(),
            close_on_stop: Vec::new(),
            clock: Arc::new(SystemClock),
            liveness_period: LIVENESS_PERIOD,
            keep_alive_period: KEEP_ALIVE_PERIOD,
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst) != 0
    }

    /// Spawn the polling loop. `false` if it is already running.
    pub async fn start(&self) -> bool {
        let mut worker = self.inner.worker.lock().await;
        if self.is_running() {
            log::info!("monitoring already active");
            return false;
        }

        let run = Arc::new(Run {
            generation: self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1,
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
        });
        self.inner.active.store(run.generation, Ordering::SeqCst);
        let handle = tokio::spawn(self.inner.clone().run(run.clone()));
        *worker = Some(Worker { run, handle });
        log::info!(
            "monitoring started, interval {} s",
            self.inner.interval.as_secs()
        );
        true
    }

    /// Signal the loop, wait for it to exit and close northbound sessions. A loop that does
    /// not exit in time is aborted. `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let mut worker = self.inner.worker.lock().await;
        let was_running = self.inner.active.swap(0, Ordering::SeqCst) != 0;

        if let Some(Worker { run, mut handle }) = worker.take() {
            run.cancelled.store(true, Ordering::SeqCst);
            /* stores a permit when the loop is mid-cycle */
            run.wake.notify_one();
            match tokio::time::timeout(self.inner.stop_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("monitoring task failed: {}", e),
                Err(_) => {
                    log::warn!(
                        "monitoring task did not stop within {} ms, aborting it",
                        self.inner.stop_timeout.as_millis()
                    );
                    handle.abort();
                }
            }
        }

        if !was_running {
            log::info!("monitoring not active");
            return false;
        }

        for sessions in &self.inner.close_on_stop {
            sessions.invalidate().await;
        }
        log::info!("monitoring stopped");
        true
    }

    /// Run one polling cycle now. Returns the per-plant online result.
    pub async fn update_all(&self) -> BTreeMap<String, bool> {
        self.inner.update_all().await
    }

    pub fn plants(&self) -> BTreeMap<String, PlantSnapshot> {
        self.inner
            .plants
            .iter()
            .map(|entry| (entry.key.to_owned(), entry.plant.snapshot()))
            .collect()
    }

    pub fn plant(&self, key: &str) -> Result<PlantSnapshot, Error> {
        self.inner
            .plants
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.plant.snapshot())
            .ok_or_else(|| Error::PlantNotFound(key.to_owned()))
    }

    pub fn runtime_status(&self) -> RuntimeStatus {
        let mut stats = Stats {
            total_plants: self.inner.plants.len(),
            online_count: 0,
            offline_count: 0,
            warning_count: 0,
            total_power: 0.0,
        };

        for entry in &self.inner.plants {
            let (is_online, power) = entry.plant.read(|plant| (plant.is_online(), plant.power()));
            match (is_online, power > 0.0) {
                (true, true) => {
                    stats.online_count += 1;
                    stats.total_power += power;
                }
                (true, false) => stats.warning_count += 1,
                (false, _) => stats.offline_count += 1,
            }
        }
        stats.total_power = (stats.total_power * 100.0).round() / 100.0;

        RuntimeStatus {
            active: self.is_running(),
            interval_seconds: self.inner.interval.as_secs(),
            stats,
        }
    }
}

impl Inner {
    /// Run `future`, turning a panic into `None` so the loop survives it.
    async fn guarded<T, F: Future<Output = T>>(what: &str, future: F) -> Option<T> {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(value) => Some(value),
            Err(_) => {
                log::error!("unexpected failure during {}", what);
                None
            }
        }
    }

    async fn run(self: Arc<Self>, run: Arc<Run>) {
        let _exit = ExitGuard {
            inner: self.clone(),
            generation: run.generation,
        };
        let mut schedule = PingSchedule::new(self.liveness_period, self.keep_alive_period);

        while !run.is_cancelled() {
            Self::guarded("update cycle", self.update_all()).await;

            let mut waited = Duration::ZERO;
            while waited < self.interval && !run.is_cancelled() {
                if tokio::time::timeout(TICK, run.wake.notified()).await.is_ok() {
                    continue;
                }
                waited += TICK;

                if self.keep_alive.is_empty() {
                    continue;
                }
                let (liveness, keep_alive) = schedule.tick();
                if liveness {
                    Self::guarded("liveness check", self.ping_liveness()).await;
                }
                if keep_alive {
                    Self::guarded("keep-alive", self.keep_alive()).await;
                }
            }
        }
    }

    async fn update_all(&self) -> BTreeMap<String, bool> {
        let _cycle = self.cycle.lock().await;
        let mut results = BTreeMap::new();

        for entry in &self.plants {
            let check = check_connection(entry.adapter.as_ref(), &entry.plant, self.clock.as_ref());
            let online = Self::guarded(&format!("update of plant {}", entry.key), check)
                .await
                .unwrap_or(false);
            let snapshot = entry.plant.snapshot();
            if online {
                log::info!("updated plant {}: {} kW", snapshot.name, snapshot.power);
            } else {
                log::warn!(
                    "update failed for plant {}: {}",
                    snapshot.name,
                    snapshot.error_message.as_deref().unwrap_or("unknown error")
                );
            }
            metrics::observe(&entry.key, &snapshot);
            results.insert(entry.key.to_owned(), online);
        }

        metrics::cycle_finished();
        log::info!(
            "update cycle finished: {}/{} plants online",
            results.values().filter(|online| **online).count(),
            results.len()
        );
        results
    }

    async fn ping_liveness(&self) {
        for sessions in &self.keep_alive {
            match sessions.ping_liveness().await {
                Ok(true) => log::debug!("session alive"),
                Ok(false) => log::info!("session not alive, it will be renewed on next use"),
                Err(e) => log::warn!("liveness check failed: {}", e),
            }
        }
    }

    async fn keep_alive(&self) {
        for sessions in &self.keep_alive {
            match sessions.keep_alive().await {
                Ok(()) => log::debug!("session kept alive"),
                Err(e) => log::warn!("keep-alive failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::plant::{DataSource, PlantIdentity, PlantStatus, ProviderType, Reading};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Fixed(Reading);

    #[async_trait]
    impl PlantAdapter for Fixed {
        async fn read(&self, _: &PlantIdentity) -> Reading {
            self.0.clone()
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl PlantAdapter for Counting {
        async fn read(&self, _: &PlantIdentity) -> Reading {
            self.0.fetch_add(1, Ordering::SeqCst);
            Reading::online(1.0, 1.0, DataSource::Instant)
        }
    }

    fn plant(id: &str) -> Plant {
        Plant::new(format!("Plant {}", id), id, ProviderType::AuroraVision)
    }

    fn manager() -> PlantManager {
        PlantManager::builder()
            .plant(
                "aurora_1",
                plant("1"),
                Arc::new(Fixed(Reading::online(5.234, 10.0, DataSource::Instant))),
            )
            .plant(
                "aurora_2",
                plant("2"),
                Arc::new(Fixed(Reading::online(0.0, 10.0, DataSource::Instant))),
            )
            .plant("aurora_3", plant("3"), Arc::new(Fixed(Reading::offline("timeout"))))
            .build()
    }

    #[tokio::test]
    async fn update_all_reports_every_plant() {
        let manager = manager();
        let results = manager.update_all().await;

        assert_eq!(Some(&true), results.get("aurora_1"));
        assert_eq!(Some(&true), results.get("aurora_2"));
        assert_eq!(Some(&false), results.get("aurora_3"));
        assert_eq!(PlantStatus::Inactive, manager.plant("aurora_2").unwrap().status);
    }

    #[tokio::test]
    async fn runtime_status_counts() {
        let manager = manager();
        assert_eq!(3, manager.runtime_status().stats.offline_count);

        manager.update_all().await;
        let status = manager.runtime_status();
        assert!(!status.active);
        assert_eq!(300, status.interval_seconds);
        assert_eq!(
            Stats {
                total_plants: 3,
                online_count: 1,
                offline_count: 1,
                warning_count: 1,
                total_power: 5.23,
            },
            status.stats
        );
    }

    #[test]
    fn unknown_plant_is_not_found() {
        assert!(matches!(
            manager().plant("fusion_main"),
            Err(Error::PlantNotFound(_))
        ));
        assert_eq!(
            vec!["aurora_1", "aurora_2", "aurora_3"],
            manager().plants().keys().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let reads = Arc::new(AtomicUsize::new(0));
        let manager = PlantManager::builder()
            .plant("aurora_1", plant("1"), Arc::new(Counting(reads.clone())))
            .build();

        assert!(!manager.stop().await);
        assert!(manager.start().await);
        assert!(!manager.start().await);
        assert!(manager.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.stop().await);
        assert!(!manager.stop().await);
        assert_eq!(1, reads.load(Ordering::SeqCst));
    }

    #[test]
    fn repeated_key_replaces_registration() {
        let manager = PlantManager::builder()
            .plant("aurora_1", plant("1"), Arc::new(Fixed(Reading::offline("a"))))
            .plant("aurora_1", plant("9"), Arc::new(Fixed(Reading::offline("b"))))
            .build();

        assert_eq!("9", manager.plant("aurora_1").unwrap().id);
        assert_eq!(1, manager.plants().len());
    }

    #[test]
    fn ping_schedule_fires_on_period() {
        let mut schedule = PingSchedule::new(LIVENESS_PERIOD, KEEP_ALIVE_PERIOD);
        let ticks: Vec<(bool, bool)> = (0..60).map(|_| schedule.tick()).collect();

        let liveness: Vec<usize> = (1..=60).filter(|n| ticks[n - 1].0).collect();
        let keep_alive: Vec<usize> = (1..=60).filter(|n| ticks[n - 1].1).collect();
        assert_eq!(vec![10, 20, 30, 40, 50, 60], liveness);
        assert_eq!(vec![30, 60], keep_alive);
    }

    /* first read outlives any stop timeout */
    struct Stuck {
        reads: Arc<AtomicUsize>,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PlantAdapter for Stuck {
        async fn read(&self, _: &PlantIdentity) -> Reading {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(2)).await;
                self.finished.store(true, Ordering::SeqCst);
            }
            Reading::online(1.0, 1.0, DataSource::Instant)
        }
    }

    #[tokio::test]
    async fn restart_after_stop_timeout_runs_one_loop() {
        let reads = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let manager = PlantManager::builder()
            .plant(
                "aurora_1",
                plant("1"),
                Arc::new(Stuck {
                    reads: reads.clone(),
                    finished: finished.clone(),
                }),
            )
            .interval(Duration::from_secs(1))
            .stop_timeout(Duration::from_millis(200))
            .build();

        assert!(manager.start().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.stop().await);
        assert!(!manager.runtime_status().active);

        assert!(manager.start().await);
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(manager.stop().await);

        /* the stuck loop was aborted, not left running beside the new one */
        assert!(!finished.load(Ordering::SeqCst));
        let total = reads.load(Ordering::SeqCst);
        assert!((3..=6).contains(&total), "{} reads", total);
    }

    struct Exploding(Arc<AtomicUsize>);

    #[async_trait]
    impl KeepAlive for Exploding {
        async fn ping_liveness(&self) -> Result<bool, Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("liveness blew up")
        }

        async fn keep_alive(&self) -> Result<(), Error> {
            panic!("keep-alive blew up")
        }
    }

    #[tokio::test]
    async fn panicking_keep_alive_does_not_end_loop() {
        let reads = Arc::new(AtomicUsize::new(0));
        let pings = Arc::new(AtomicUsize::new(0));
        let manager = PlantManager::builder()
            .plant("aurora_1", plant("1"), Arc::new(Counting(reads.clone())))
            .interval(Duration::from_secs(1))
            .keep_alive(Arc::new(Exploding(pings.clone())))
            .ping_periods(1, 1)
            .build();

        assert!(manager.start().await);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(manager.runtime_status().active);
        assert!(pings.load(Ordering::SeqCst) >= 2);
        assert!(reads.load(Ordering::SeqCst) >= 2);
        assert!(manager.stop().await);
        assert!(manager.start().await);
        assert!(manager.stop().await);
    }
}
