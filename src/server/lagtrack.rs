//! Replication lag tracker: polls the master's latest binlog time, reports
//! the lag, and periodically persists the lag checkpoint.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::server::{
    Aggregation, BinlogConnector, BinlogPeer, CheckpointFile, GlobalStatus,
    PpKind, PropertyReport, RemoteError, RouteTable, ServerConfig,
    ServerType, StatSink, WorkerHandle,
};
use crate::utils::{CacheSyncError, Clock, ConfigFile, Timer};

use serde::Deserialize;

use tokio::sync::watch;
use tokio::time::Duration;

/// Name of the averaging lag property report.
pub const LAG_PROPERTY: &str = "M/S_ReplicationLatency";

/// Configuration parameters struct, parsed from the `[binlog]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LagTrackerConfig {
    /// Interval in seconds between checkpoint saves.
    pub save_sync_time_interval: u64,

    /// Pause before entering the steady loop, letting the peer handle and
    /// loaded checkpoint settle before any lag is reported.
    pub warmup_ms: u64,

    /// Pause while a slave is being created.
    pub creating_pause_ms: u64,

    /// Pause when not acting as a slave.
    pub idle_pause_ms: u64,

    /// Pause after a completed poll of the master.
    pub poll_pause_ms: u64,

    /// Pause after a failed poll, or when the master address just vanished.
    pub retry_pause_ms: u64,

    /// Pause after `fail_alert_threshold` consecutive failures.
    pub fail_pause_ms: u64,

    /// Per-call timeout of the remote binlog time call.
    pub rpc_timeout_ms: u64,

    /// Minimum seconds between two lag reports.
    pub report_interval_s: u64,

    /// Consecutive failures that trigger an alert and the longer pause.
    pub fail_alert_threshold: u32,
}

impl Default for LagTrackerConfig {
    fn default() -> Self {
        LagTrackerConfig {
            save_sync_time_interval: 10,
            warmup_ms: 3000,
            creating_pause_ms: 100,
            idle_pause_ms: 100,
            poll_pause_ms: 500,
            retry_pause_ms: 100,
            fail_pause_ms: 1000,
            rpc_timeout_ms: 1000,
            report_interval_s: 60,
            fail_alert_threshold: 3,
        }
    }
}

impl LagTrackerConfig {
    /// Parses the `[binlog]` section of given config file.
    pub fn from_file(file: &ConfigFile) -> Result<Self, CacheSyncError> {
        let section = file.section("binlog")?;
        let config = parsed_config!(section.as_deref() => LagTrackerConfig;
                                    save_sync_time_interval, warmup_ms,
                                    creating_pause_ms, idle_pause_ms,
                                    poll_pause_ms, retry_pause_ms,
                                    fail_pause_ms, rpc_timeout_ms,
                                    report_interval_s, fail_alert_threshold)?;
        if config.fail_alert_threshold == 0 {
            return logged_err!(
                "invalid config.fail_alert_threshold '{}'",
                config.fail_alert_threshold
            );
        }
        if config.rpc_timeout_ms == 0 {
            return logged_err!(
                "invalid config.rpc_timeout_ms '{}'",
                config.rpc_timeout_ms
            );
        }
        Ok(config)
    }
}

/// Rate-limited reporter of the replication lag.
pub struct LagReporter {
    property: Arc<dyn PropertyReport>,
    interval_s: u64,

    /// Time of the last report attempt, 0 if none yet.
    last_report: u64,
}

impl LagReporter {
    pub fn new(property: Arc<dyn PropertyReport>, interval_s: u64) -> Self {
        LagReporter {
            property,
            interval_s,
            last_report: 0,
        }
    }

    /// Reports `last − sync` unless the previous attempt was less than the
    /// interval ago. Nothing is emitted while no sync time has been recorded,
    /// but the attempt still counts towards the interval. Returns true if a
    /// value got emitted.
    pub fn report(&mut self, now: u64, status: &GlobalStatus) -> bool {
        if now.saturating_sub(self.last_report) < self.interval_s {
            return false;
        }
        self.last_report = now;

        let checkpoint = status.checkpoint();
        if checkpoint.last_sync_time == 0 {
            return false;
        }
        self.property.report(checkpoint.lag());
        true
    }
}

/// Collaborators shared by the lag tracker with the rest of the server.
#[derive(Clone)]
pub struct LagTrackerDeps {
    pub status: Arc<GlobalStatus>,
    pub route: Arc<dyn RouteTable>,
    pub connector: Arc<dyn BinlogConnector>,
    pub stats: Arc<dyn StatSink>,
    pub clock: Arc<dyn Clock>,
}

/// The lag tracker loop state, owned by its worker task.
pub struct LagTracker {
    config: LagTrackerConfig,

    /// Live value of the save interval, updated by reloads.
    save_interval: Arc<AtomicU64>,

    /// Logical name `"<app>.<server>"` used for routing lookups.
    service_name: String,

    deps: LagTrackerDeps,
    reporter: LagReporter,
    checkpoint_file: CheckpointFile,

    /// Current remote peer handle and the address it was opened for.
    peer: Option<Box<dyn BinlogPeer>>,
    peer_addr: String,

    /// Consecutive failed polls.
    fail_cnt: u32,

    /// Time of the last checkpoint save, 0 if none yet.
    last_save: u64,

    in_slave_creating: Arc<AtomicBool>,
}

impl LagTracker {
    fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.config.rpc_timeout_ms)
    }

    fn report_lag(&mut self) {
        let now = self.deps.clock.now();
        self.reporter.report(now, &self.deps.status);
    }

    /// Resolves the address of the binlog servant of my backup source.
    /// Returns an empty string if none can be resolved.
    pub fn get_bak_source_addr(&self) -> String {
        match self.deps.route.get_bak_source(&self.service_name) {
            Ok(server) => server.binlog_servant,
            Err(e) => {
                pf_error!("get_bak_source error: {}", e);
                self.deps.stats.pp_report(PpKind::BinlogErr, 1);
                String::new()
            }
        }
    }

    /// Persists the current checkpoint. Failures are logged and counted.
    pub async fn save_sync_time(&self) -> bool {
        match self.checkpoint_file.save(&self.deps.status).await {
            Ok(_) => true,
            Err(e) => {
                pf_error!(
                    "save sync time to '{}' failed: {}",
                    self.checkpoint_file.path().display(),
                    e
                );
                self.deps.stats.pp_report(PpKind::Exception, 1);
                false
            }
        }
    }

    /// Seeds the status from the persisted checkpoint, if any.
    pub async fn get_sync_time(&self) {
        match self.checkpoint_file.load(&self.deps.status).await {
            Ok(checkpoint) => {
                pf_info!("loaded sync time checkpoint {:?}", checkpoint)
            }
            Err(e) => pf_error!("load sync time failed: {}", e),
        }
    }

    /// Saves the checkpoint if more than the save interval has passed since
    /// the last save.
    pub async fn save_if_due(&mut self) {
        let now = self.deps.clock.now();
        let interval = self.save_interval.load(Ordering::Acquire);
        if now.saturating_sub(self.last_save) > interval {
            self.save_sync_time().await;
            self.last_save = now;
        }
    }

    /// Startup sequence before the warm-up pause: open the peer handle if a
    /// backup source is known, then load the persisted checkpoint.
    pub async fn prepare(&mut self) {
        self.peer_addr = self.get_bak_source_addr();
        if !self.peer_addr.is_empty() {
            self.peer = Some(
                self.deps
                    .connector
                    .open(&self.peer_addr, self.rpc_timeout()),
            );
        }
        self.get_sync_time().await;
    }

    /// Polls the master for its latest binlog time, re-opening the peer
    /// handle if the backup source moved. On a completed poll returns the
    /// pause to take before the next iteration.
    async fn poll_master(&mut self) -> Result<Duration, RemoteError> {
        let addr = self.get_bak_source_addr();
        if addr != self.peer_addr {
            pf_debug!(
                "master binlog addr changed from '{}' to '{}'",
                self.peer_addr,
                addr
            );
            self.peer_addr = addr.clone();
            if addr.is_empty() {
                self.peer = None;
                self.report_lag();
                return Ok(Duration::from_millis(self.config.retry_pause_ms));
            }
            self.peer = Some(self.deps.connector.open(&addr, self.rpc_timeout()));
        }

        match self.peer.as_mut() {
            Some(peer) if !addr.is_empty() => {
                match peer.get_last_binlog_time().await {
                    Ok(time) => self.deps.status.update_last_binlog_time(time),
                    Err(e) if e.is_answered() => {
                        pf_debug!("binlog time not available: {}", e)
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => pf_error!("backup source addr is empty"),
        }

        self.fail_cnt = 0;
        self.report_lag();
        Ok(Duration::from_millis(self.config.poll_pause_ms))
    }

    /// One iteration of the steady loop, excluding the checkpoint save.
    /// Returns the pause to take before the next iteration.
    pub async fn step(&mut self) -> Duration {
        if self.deps.status.is_slave_creating() {
            self.in_slave_creating.store(true, Ordering::Release);
            return Duration::from_millis(self.config.creating_pause_ms);
        }
        self.in_slave_creating.store(false, Ordering::Release);

        if self.deps.status.server_type() != ServerType::Slave {
            self.report_lag();
            return Duration::from_millis(self.config.idle_pause_ms);
        }

        match self.poll_master().await {
            Ok(pause) => pause,
            Err(e) => {
                pf_error!("poll binlog time from '{}' failed: {}", self.peer_addr, e);
                self.report_lag();
                self.fail_cnt += 1;
                if self.fail_cnt >= self.config.fail_alert_threshold {
                    self.deps.stats.pp_report(PpKind::BinlogErr, 1);
                    self.fail_cnt = 0;
                    Duration::from_millis(self.config.fail_pause_ms)
                } else {
                    Duration::from_millis(self.config.retry_pause_ms)
                }
            }
        }
    }

    /// Worker body: startup sequence, warm-up, then the steady loop until
    /// stop is requested.
    pub async fn run(mut self, mut rx_stop: watch::Receiver<bool>) {
        pf_debug!("lag tracker started");
        let mut timer = Timer::new();

        self.prepare().await;
        let warmup = Duration::from_millis(self.config.warmup_ms);
        if !timer.pause(warmup, &mut rx_stop).await {
            return;
        }

        loop {
            let stopped = *rx_stop.borrow();
            if stopped {
                break;
            }
            self.save_if_due().await;
            let pause = self.step().await;
            if !timer.pause(pause, &mut rx_stop).await {
                break;
            }
        }

        pf_debug!("lag tracker stopped");
    }
}

/// Lifecycle handle of the lag tracker worker.
pub struct LagTrackerThread {
    config_path: PathBuf,
    config: LagTrackerConfig,
    server: ServerConfig,
    deps: LagTrackerDeps,
    property: Arc<dyn PropertyReport>,
    save_interval: Arc<AtomicU64>,
    in_slave_creating: Arc<AtomicBool>,
    worker: WorkerHandle<()>,
}

impl LagTrackerThread {
    /// Reads configuration and registers the lag property report. Failing
    /// to register the report is a fatal init error.
    pub fn new_and_setup(
        config_path: &Path,
        deps: LagTrackerDeps,
    ) -> Result<Self, CacheSyncError> {
        let file = ConfigFile::load(config_path)?;
        let server = ServerConfig::from_file(&file)?;
        let config = LagTrackerConfig::from_file(&file)?;

        let Some(property) = deps
            .stats
            .create_property_report(LAG_PROPERTY, Aggregation::Avg)
        else {
            return logged_err!(
                "create property report '{}' failed",
                LAG_PROPERTY
            );
        };

        pf_debug!("lag tracker init succ");
        Ok(LagTrackerThread {
            config_path: config_path.to_path_buf(),
            save_interval: Arc::new(AtomicU64::new(
                config.save_sync_time_interval,
            )),
            config,
            server,
            deps,
            property,
            in_slave_creating: Arc::new(AtomicBool::new(false)),
            worker: WorkerHandle::new("lag tracker"),
        })
    }

    /// Re-reads the checkpoint save interval; nothing else changes.
    pub fn reload(&self) -> Result<(), CacheSyncError> {
        let file = ConfigFile::load(&self.config_path)?;
        let config = LagTrackerConfig::from_file(&file)?;
        self.save_interval
            .store(config.save_sync_time_interval, Ordering::Release);
        pf_debug!(
            "lag tracker reload succ, save interval {}s",
            config.save_sync_time_interval
        );
        Ok(())
    }

    /// Builds a fresh loop state.
    pub fn new_tracker(&self) -> LagTracker {
        LagTracker {
            config: self.config.clone(),
            save_interval: self.save_interval.clone(),
            service_name: self.server.service_name(),
            deps: self.deps.clone(),
            reporter: LagReporter::new(
                self.property.clone(),
                self.config.report_interval_s,
            ),
            checkpoint_file: CheckpointFile::new(Path::new(
                &self.server.data_path,
            )),
            peer: None,
            peer_addr: String::new(),
            fail_cnt: 0,
            last_save: 0,
            in_slave_creating: self.in_slave_creating.clone(),
        }
    }

    /// Starts the worker unless already started. Returns true if started
    /// by this call.
    pub fn create_thread(&self) -> Result<bool, CacheSyncError> {
        let tracker = self.new_tracker();
        self.worker
            .create_task(move |rx_stop| tracker.run(rx_stop))
    }

    pub fn request_stop(&self) {
        self.worker.request_stop();
    }

    pub async fn await_stopped(&self) {
        self.worker.await_stopped().await;
    }

    pub fn is_started(&self) -> bool {
        self.worker.is_started()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn is_in_slave_creating(&self) -> bool {
        self.in_slave_creating.load(Ordering::Acquire)
    }

    pub fn save_interval(&self) -> u64 {
        self.save_interval.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod lagtrack_tests {
    use super::*;
    use crate::server::{StatHub, StaticRouteTable};
    use crate::utils::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize};
    use std::sync::Mutex;

    /// Shared behavior knobs and counters of the stub peers.
    #[derive(Default)]
    struct StubState {
        calls: AtomicUsize,
        fail: AtomicBool,
        ret: AtomicI32,
        time: AtomicU32,
        opened: Mutex<Vec<String>>,
    }

    struct StubPeer {
        addr: String,
        state: Arc<StubState>,
    }

    #[async_trait]
    impl BinlogPeer for StubPeer {
        async fn get_last_binlog_time(&mut self) -> Result<u32, RemoteError> {
            self.state.calls.fetch_add(1, Ordering::SeqCst);
            if self.state.fail.load(Ordering::SeqCst) {
                return Err(RemoteError::Transport("refused".into()));
            }
            match self.state.ret.load(Ordering::SeqCst) {
                0 => Ok(self.state.time.load(Ordering::SeqCst)),
                ret => Err(RemoteError::Status(ret)),
            }
        }

        fn addr(&self) -> &str {
            &self.addr
        }
    }

    struct StubConnector(Arc<StubState>);

    impl BinlogConnector for StubConnector {
        fn open(&self, addr: &str, _timeout: Duration) -> Box<dyn BinlogPeer> {
            self.0.opened.lock().unwrap().push(addr.into());
            Box::new(StubPeer {
                addr: addr.into(),
                state: self.0.clone(),
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        config_path: PathBuf,
        status: Arc<GlobalStatus>,
        route: Arc<StaticRouteTable>,
        stats: StatHub,
        clock: Arc<ManualClock>,
        stub: Arc<StubState>,
        thread: LagTrackerThread,
    }

    const ME: &str = "App.S1";

    fn write_config(path: &Path, data_path: &Path, binlog: &str) {
        let content = format!(
            "[server]\napp = 'App'\nserver_name = 'S1'\ndata_path = '{}'\n\n\
             [binlog]\nwarmup_ms = 0\n{}\n",
            data_path.display(),
            binlog
        );
        std::fs::write(path, content).unwrap();
    }

    fn fixture(role: ServerType) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("server.toml");
        write_config(&config_path, dir.path(), "");

        let status = Arc::new(GlobalStatus::new(role));
        let route = Arc::new(StaticRouteTable::new());
        route.set_bak_source(ME, "master-a:9000");
        let stats = StatHub::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let stub = Arc::new(StubState::default());
        let deps = LagTrackerDeps {
            status: status.clone(),
            route: route.clone(),
            connector: Arc::new(StubConnector(stub.clone())),
            stats: Arc::new(stats.clone()),
            clock: clock.clone(),
        };
        let thread = LagTrackerThread::new_and_setup(&config_path, deps).unwrap();
        Fixture {
            _dir: dir,
            config_path,
            status,
            route,
            stats,
            clock,
            stub,
            thread,
        }
    }

    fn emissions(f: &Fixture) -> u64 {
        f.stats.property(LAG_PROPERTY).map_or(0, |p| p.emissions)
    }

    #[test]
    fn reporter_rate_limited() {
        let stats = StatHub::new();
        let property = stats
            .create_property_report(LAG_PROPERTY, Aggregation::Avg)
            .unwrap();
        let status = GlobalStatus::new(ServerType::Slave);
        status.set_binlog_time(80, 100);
        let clock = ManualClock::new(1_000_000);
        let mut reporter = LagReporter::new(property, 60);

        assert!(reporter.report(clock.now(), &status));
        clock.advance(30);
        assert!(!reporter.report(clock.now(), &status));
        assert_eq!(stats.property(LAG_PROPERTY).unwrap().emissions, 1);

        clock.advance(31);
        assert!(reporter.report(clock.now(), &status));
        let stat = stats.property(LAG_PROPERTY).unwrap();
        assert_eq!(stat.emissions, 2);
        assert_eq!(stat.last, Some(20));
    }

    #[test]
    fn reporter_needs_sync_time() {
        let stats = StatHub::new();
        let property = stats
            .create_property_report(LAG_PROPERTY, Aggregation::Avg)
            .unwrap();
        let status = GlobalStatus::new(ServerType::Slave);
        status.update_last_binlog_time(100);
        let mut reporter = LagReporter::new(property, 60);

        assert!(!reporter.report(1_000_000, &status));
        // the skipped attempt still consumed the interval
        status.update_sync_time(90);
        assert!(!reporter.report(1_000_010, &status));
        assert!(reporter.report(1_000_060, &status));
        assert_eq!(stats.property(LAG_PROPERTY).unwrap().last, Some(10));
    }

    #[test]
    fn reporter_negative_lag() {
        let stats = StatHub::new();
        let property = stats
            .create_property_report(LAG_PROPERTY, Aggregation::Avg)
            .unwrap();
        let status = GlobalStatus::new(ServerType::Master);
        status.set_binlog_time(150, 100);
        let mut reporter = LagReporter::new(property, 60);
        assert!(reporter.report(1_000_000, &status));
        assert_eq!(stats.property(LAG_PROPERTY).unwrap().last, Some(-50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn failure_escalation() {
        let f = fixture(ServerType::Slave);
        let mut tracker = f.thread.new_tracker();
        tracker.prepare().await;
        f.stub.fail.store(true, Ordering::SeqCst);

        assert_eq!(tracker.step().await, Duration::from_millis(100));
        assert_eq!(tracker.step().await, Duration::from_millis(100));
        assert_eq!(f.stats.events(PpKind::BinlogErr), 0);
        assert_eq!(tracker.step().await, Duration::from_millis(1000));
        assert_eq!(f.stats.events(PpKind::BinlogErr), 1);
        assert_eq!(tracker.fail_cnt, 0);
        assert_eq!(f.stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn success_resets_failures() {
        let f = fixture(ServerType::Slave);
        let mut tracker = f.thread.new_tracker();
        tracker.prepare().await;

        f.stub.fail.store(true, Ordering::SeqCst);
        tracker.step().await;
        tracker.step().await;
        assert_eq!(tracker.fail_cnt, 2);

        f.stub.fail.store(false, Ordering::SeqCst);
        f.stub.time.store(4242, Ordering::SeqCst);
        assert_eq!(tracker.step().await, Duration::from_millis(500));
        assert_eq!(tracker.fail_cnt, 0);
        assert_eq!(f.status.binlog_time_last(), 4242);

        f.stub.fail.store(true, Ordering::SeqCst);
        tracker.step().await;
        tracker.step().await;
        assert_eq!(f.stats.events(PpKind::BinlogErr), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn answered_status_is_not_failure() {
        let f = fixture(ServerType::Slave);
        let mut tracker = f.thread.new_tracker();
        tracker.prepare().await;
        f.status.update_last_binlog_time(77);
        f.stub.ret.store(-1, Ordering::SeqCst);
        f.stub.time.store(999, Ordering::SeqCst);

        for _ in 0..5 {
            assert_eq!(tracker.step().await, Duration::from_millis(500));
        }
        assert_eq!(tracker.fail_cnt, 0);
        assert_eq!(f.status.binlog_time_last(), 77);
        assert_eq!(f.stats.events(PpKind::BinlogErr), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn role_gated_rpc() {
        let f = fixture(ServerType::Master);
        f.status.set_binlog_time(80, 100);
        let mut tracker = f.thread.new_tracker();
        tracker.prepare().await;

        for _ in 0..10 {
            assert_eq!(tracker.step().await, Duration::from_millis(100));
        }
        assert_eq!(f.stub.calls.load(Ordering::SeqCst), 0);
        assert_eq!(emissions(&f), 1);

        f.clock.advance(61);
        tracker.step().await;
        assert_eq!(f.stub.calls.load(Ordering::SeqCst), 0);
        assert_eq!(emissions(&f), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn slave_creating_gate() {
        let f = fixture(ServerType::Slave);
        f.status.set_binlog_time(80, 100);
        f.status.set_slave_creating(true);
        let mut tracker = f.thread.new_tracker();
        tracker.prepare().await;

        for _ in 0..5 {
            assert_eq!(tracker.step().await, Duration::from_millis(100));
            f.clock.advance(61);
        }
        assert!(f.thread.is_in_slave_creating());
        assert_eq!(f.stub.calls.load(Ordering::SeqCst), 0);
        assert_eq!(emissions(&f), 0);

        f.status.set_slave_creating(false);
        assert_eq!(tracker.step().await, Duration::from_millis(500));
        assert!(!f.thread.is_in_slave_creating());
        assert_eq!(f.stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(emissions(&f), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn backup_source_moves() {
        let f = fixture(ServerType::Slave);
        let mut tracker = f.thread.new_tracker();
        tracker.prepare().await;
        assert_eq!(*f.stub.opened.lock().unwrap(), vec!["master-a:9000"]);

        tracker.step().await;
        f.route.set_bak_source(ME, "master-b:9000");
        tracker.step().await;
        assert_eq!(
            *f.stub.opened.lock().unwrap(),
            vec!["master-a:9000", "master-b:9000"]
        );
        assert_eq!(f.stub.calls.load(Ordering::SeqCst), 2);

        // source vanishes: lookup failure counted, short retry, no call
        f.route.remove_bak_source(ME);
        assert_eq!(tracker.step().await, Duration::from_millis(100));
        assert_eq!(f.stats.events(PpKind::BinlogErr), 1);
        // still empty: no call, regular pause
        assert_eq!(tracker.step().await, Duration::from_millis(500));
        assert_eq!(f.stub.calls.load(Ordering::SeqCst), 2);

        f.route.set_bak_source(ME, "master-a:9000");
        tracker.step().await;
        assert_eq!(f.stub.opened.lock().unwrap().len(), 3);
        assert_eq!(f.stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn checkpoint_save_interval() -> Result<(), CacheSyncError> {
        let f = fixture(ServerType::Slave);
        let mut tracker = f.thread.new_tracker();
        let path = tracker.checkpoint_file.path().to_path_buf();

        f.status.set_binlog_time(80, 100);
        tracker.save_if_due().await;
        assert_eq!(std::fs::read_to_string(&path)?, "100|80          ");

        f.status.set_binlog_time(90, 110);
        f.clock.advance(10);
        tracker.save_if_due().await;
        assert_eq!(std::fs::read_to_string(&path)?, "100|80          ");

        f.clock.advance(1);
        tracker.save_if_due().await;
        assert_eq!(std::fs::read_to_string(&path)?, "110|90          ");

        // restart picks the checkpoint back up
        let restarted = Arc::new(GlobalStatus::new(ServerType::Slave));
        CheckpointFile::new(path.parent().unwrap())
            .load(&restarted)
            .await?;
        assert_eq!(restarted.checkpoint(), f.status.checkpoint());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn save_failure_counted() {
        let f = fixture(ServerType::Slave);
        let mut tracker = f.thread.new_tracker();
        tracker.checkpoint_file =
            CheckpointFile::new(Path::new("/nonexistent/cachesync/dir"));
        assert!(!tracker.save_sync_time().await);
        assert_eq!(f.stats.events(PpKind::Exception), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn corrupted_checkpoint_ignored() -> Result<(), CacheSyncError> {
        let f = fixture(ServerType::Slave);
        let mut tracker = f.thread.new_tracker();
        std::fs::write(tracker.checkpoint_file.path(), "100")?;
        tracker.prepare().await;
        assert_eq!(f.status.checkpoint().last_binlog_time, 0);
        assert_eq!(f.status.checkpoint().last_sync_time, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reload_interval_only() -> Result<(), CacheSyncError> {
        let f = fixture(ServerType::Slave);
        assert_eq!(f.thread.save_interval(), 10);
        write_config(
            &f.config_path,
            f.config_path.parent().unwrap(),
            "save_sync_time_interval = 30\npoll_pause_ms = 1",
        );
        f.thread.reload()?;
        assert_eq!(f.thread.save_interval(), 30);
        // other parameters keep their init-time values
        assert_eq!(f.thread.new_tracker().config.poll_pause_ms, 500);
        Ok(())
    }

    #[test]
    fn init_fails_without_property() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("server.toml");
        write_config(&config_path, dir.path(), "");
        let stats = StatHub::new();
        stats.refuse_property(LAG_PROPERTY);
        let stub = Arc::new(StubState::default());
        let deps = LagTrackerDeps {
            status: Arc::new(GlobalStatus::new(ServerType::Slave)),
            route: Arc::new(StaticRouteTable::new()),
            connector: Arc::new(StubConnector(stub)),
            stats: Arc::new(stats),
            clock: Arc::new(ManualClock::new(0)),
        };
        assert!(LagTrackerThread::new_and_setup(&config_path, deps).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_lifecycle() -> Result<(), CacheSyncError> {
        let f = fixture(ServerType::Slave);
        f.stub.time.store(500, Ordering::SeqCst);
        assert!(f.thread.create_thread()?);
        assert!(!f.thread.create_thread()?);

        let mut waited = 0;
        while f.status.binlog_time_last() != 500 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += 1;
        }
        assert_eq!(f.status.binlog_time_last(), 500);
        assert!(f.thread.is_running());

        f.thread.request_stop();
        f.thread.await_stopped().await;
        assert!(!f.thread.is_running());
        assert!(!f.thread.is_started());

        let data_path = f.config_path.parent().unwrap();
        assert!(CheckpointFile::new(data_path).path().exists());
        Ok(())
    }
}
