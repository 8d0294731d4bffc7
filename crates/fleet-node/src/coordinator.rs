//! Lifecycle coordinator: owns every server process of this node.
//!
//! # Stop protocol
//!
//! A stop first sets a per-process guard with a compare-and-set, so racing
//! stops (an operator stop against the process's own exit) run the sequence
//! once. An external stop marks the server `Stopping`, asks it to shut down
//! over the bus, waits for the acknowledgement and then for the server to
//! disconnect, and finally signals the local process. A process that exits on
//! its own skips the request and the signal. Both paths remove the working
//! directory, mark the server `Stopped` and optionally unregister it.
//!
//! Store write failures during teardown are logged and the teardown carries
//! on; a failed write can therefore leave the record out of date.
//!
//! Each process has its own exit watcher bound to the record it was started
//! under. An exit reported after that record was replaced by a restart is
//! ignored. A stop abandoned because the stored record vanished leaves the
//! process alone; its working directory and port are released when it exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fleet_core::{ParticipantId, SessionId};
use fleet_packets::{PacketDispatcher, ShutdownRequest};
use fleet_store::{ServerRecord, ServerState, Store};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::StopTiming;
use crate::error::{NodeError, Result};
use crate::lifecycle;
use crate::process::{KillMode, LaunchedProcess, ProcessHandle};
use crate::supervisor::{ProcessSupervisor, StartOutcome};
use crate::template::ConfigurationTemplate;

/// Why a graceful stop fell back to signalling the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The shutdown request could not be published.
    RequestFailed,
    /// No acknowledgement arrived before the ack timeout.
    NoResponse,
    /// Acknowledged, but still connected when the poll ceiling was reached.
    DisconnectTimedOut,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The stop sequence ran to completion.
    Stopped {
        /// Set when the graceful path escalated.
        escalation: Option<Escalation>,
    },
    /// Another stop already claimed this process; nothing was done.
    AlreadyStopping,
    /// No process is tracked for the identity.
    NotRunning,
    /// The authoritative record is gone; the stop was abandoned.
    RecordMissing,
}

/// Snapshot of a tracked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Server identity.
    pub id: ParticipantId,
    /// Template the server was started from.
    pub template: String,
    /// Local view of the lifecycle state.
    pub state: ServerState,
    /// Bound port, once spawned.
    pub port: Option<u16>,
    /// Working directory, once spawned.
    pub working_dir: Option<PathBuf>,
    /// OS process id, if known.
    pub pid: Option<u32>,
    /// Whether the process is still running.
    pub alive: bool,
    /// Whether a stop has claimed the process.
    pub stop_requested: bool,
}

struct LiveProcess {
    handle: Box<dyn ProcessHandle>,
    working_dir: PathBuf,
    port: u16,
}

struct ProcessRecord {
    id: ParticipantId,
    template: String,
    stopped: AtomicBool,
    abandoned: AtomicBool,
    state: Mutex<ServerState>,
    process: Mutex<Option<LiveProcess>>,
}

impl ProcessRecord {
    fn new(id: ParticipantId, template: &str) -> Self {
        Self {
            id,
            template: template.to_string(),
            stopped: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            state: Mutex::new(ServerState::Starting),
            process: Mutex::new(None),
        }
    }

    /// Claim the stop. Only the first caller gets `true`.
    fn begin_stop(&self) -> bool {
        self.stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn stop_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn state(&self) -> ServerState {
        *self.state.lock()
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock() = state;
    }

    /// Attach the spawned process unless a stop got here first.
    fn attach(&self, process: LiveProcess) -> std::result::Result<(), LiveProcess> {
        let mut slot = self.process.lock();
        if self.stop_requested() {
            return Err(process);
        }
        *slot = Some(process);
        Ok(())
    }

    fn has_process(&self) -> bool {
        self.process.lock().is_some()
    }

    fn is_alive(&self) -> bool {
        self.process
            .lock()
            .as_ref()
            .is_some_and(|p| p.handle.is_alive())
    }

    fn working_dir(&self) -> Option<PathBuf> {
        self.process.lock().as_ref().map(|p| p.working_dir.clone())
    }

    fn port(&self) -> Option<u16> {
        self.process.lock().as_ref().map(|p| p.port)
    }

    fn detach(&self) -> Option<LiveProcess> {
        self.process.lock().take()
    }

    /// Signal the process if it is still alive.
    fn terminate(&self, mode: KillMode) -> bool {
        match self.process.lock().as_ref() {
            Some(p) if p.handle.is_alive() => {
                p.handle.kill(mode);
                true
            }
            _ => false,
        }
    }

    fn info(&self) -> ProcessInfo {
        let process = self.process.lock();
        ProcessInfo {
            id: self.id,
            template: self.template.clone(),
            state: self.state(),
            port: process.as_ref().map(|p| p.port),
            working_dir: process.as_ref().map(|p| p.working_dir.clone()),
            pid: process.as_ref().and_then(|p| p.handle.pid()),
            alive: process.as_ref().is_some_and(|p| p.handle.is_alive()),
            stop_requested: self.stop_requested(),
        }
    }
}

/// Starts and stops the server processes owned by one node.
pub struct LifecycleCoordinator {
    node_id: ParticipantId,
    store: Arc<dyn Store>,
    dispatcher: Arc<PacketDispatcher>,
    supervisor: ProcessSupervisor,
    timing: StopTiming,
    records: Mutex<HashMap<ParticipantId, Arc<ProcessRecord>>>,
}

impl LifecycleCoordinator {
    /// Create a coordinator for the node `node_id`.
    #[must_use]
    pub fn new(
        node_id: ParticipantId,
        store: Arc<dyn Store>,
        dispatcher: Arc<PacketDispatcher>,
        supervisor: ProcessSupervisor,
        timing: StopTiming,
    ) -> Self {
        Self {
            node_id,
            store,
            dispatcher,
            supervisor,
            timing,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// The identity of the owning node.
    #[must_use]
    pub const fn node_id(&self) -> ParticipantId {
        self.node_id
    }

    /// The supervisor used to launch processes.
    #[must_use]
    pub const fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Start a server from `template` under identity `id`.
    ///
    /// Only [`StartOutcome::Success`] leaves a process running and a record
    /// tracked.
    pub async fn start(
        self: &Arc<Self>,
        template: &ConfigurationTemplate,
        id: ParticipantId,
    ) -> StartOutcome {
        let record = {
            let mut records = self.records.lock();
            if let Some(existing) = records.get(&id) {
                return if existing.stop_requested() {
                    StartOutcome::PreviouslyStopped
                } else {
                    StartOutcome::AlreadyRunning
                };
            }
            let record = Arc::new(ProcessRecord::new(id, &template.name));
            records.insert(id, Arc::clone(&record));
            record
        };

        let prepared = match self.supervisor.prepare(template, &id).await {
            Ok(prepared) => prepared,
            Err(outcome) => {
                self.forget(&record);
                tracing::warn!(server = %id, template = %template.name, %outcome, "Server start failed");
                return outcome;
            }
        };

        if record.stop_requested() {
            self.supervisor.discard(&prepared).await;
            self.forget(&record);
            return StartOutcome::PreviouslyStopped;
        }

        let mut server = ServerRecord::new(id, id.to_name(), &template.name, self.node_id);
        server.port = Some(prepared.port);
        server.unregister_after_disconnect = template.unregister_after_disconnect;
        self.persist(&server);

        let LaunchedProcess { handle, exited } = match self.supervisor.spawn(&prepared) {
            Ok(launched) => launched,
            Err(outcome) => {
                self.supervisor.discard(&prepared).await;
                self.delete_record(&id);
                self.forget(&record);
                tracing::warn!(server = %id, template = %template.name, %outcome, "Server start failed");
                return outcome;
            }
        };

        let live = LiveProcess {
            handle,
            working_dir: prepared.request.working_dir.clone(),
            port: prepared.port,
        };
        if let Err(live) = record.attach(live) {
            // A stop claimed the identity while spawning and found nothing to kill.
            live.handle.kill(KillMode::Force);
            self.supervisor.discard(&prepared).await;
            self.delete_record(&id);
            self.forget(&record);
            return StartOutcome::PreviouslyStopped;
        }

        self.watch_exit(&record, exited);

        tracing::info!(server = %id, template = %template.name, port = prepared.port, "Started server process");
        StartOutcome::Success {
            port: prepared.port,
        }
    }

    /// Stop a server: graceful by default, or with a forced kill if `force`.
    ///
    /// Repeated and concurrent calls for the same identity run the sequence
    /// once; later callers get [`StopOutcome::AlreadyStopping`] or
    /// [`StopOutcome::NotRunning`].
    pub async fn stop(&self, id: ParticipantId, force: bool) -> StopOutcome {
        self.run_stop(id, force, false).await
    }

    /// Tear down after the process of `id` exited on its own.
    ///
    /// Never publishes a shutdown request and never signals the process.
    pub async fn stop_internal(&self, id: ParticipantId) -> StopOutcome {
        self.run_stop(id, false, true).await
    }

    /// Stop every tracked server concurrently.
    pub async fn stop_all(&self, force: bool) -> Vec<(ParticipantId, StopOutcome)> {
        let mut ids: Vec<ParticipantId> = self.records.lock().keys().copied().collect();
        ids.sort();

        let outcomes = join_all(ids.iter().map(|id| self.stop(*id, force))).await;
        ids.into_iter().zip(outcomes).collect()
    }

    /// Snapshot of the process tracked for `id`.
    #[must_use]
    pub fn record(&self, id: &ParticipantId) -> Option<ProcessInfo> {
        self.records.lock().get(id).map(|r| r.info())
    }

    /// Identities of processes that are running and not being stopped.
    #[must_use]
    pub fn running(&self) -> Vec<ParticipantId> {
        let mut running: Vec<ParticipantId> = self
            .records
            .lock()
            .values()
            .filter(|r| {
                !r.stop_requested() && r.has_process() && lifecycle::is_active(r.state())
            })
            .map(|r| r.id)
            .collect();
        running.sort();
        running
    }

    /// Record that a server connected to the cluster.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::ServerNotFound` if no record exists, or
    /// `NodeError::InvalidState` if the server is not starting.
    pub fn mark_connected(&self, id: &ParticipantId, session: SessionId) -> Result<()> {
        let mut server = self
            .store
            .get_server(id)?
            .ok_or(NodeError::ServerNotFound(*id))?;
        server.state = lifecycle::validate_transition(id, server.state, ServerState::Running)?;
        server.connected = true;
        server.session = Some(session);
        server.touch();
        self.store.put_server(&server)?;

        if let Some(record) = self.records.lock().get(id) {
            record.set_state(ServerState::Running);
        }
        tracing::info!(server = %id, %session, "Server connected");
        Ok(())
    }

    /// Record that a server left the cluster.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::ServerNotFound` if no record exists.
    pub fn mark_disconnected(&self, id: &ParticipantId) -> Result<()> {
        let mut server = self
            .store
            .get_server(id)?
            .ok_or(NodeError::ServerNotFound(*id))?;
        server.connected = false;
        server.session = None;
        server.touch();
        self.store.put_server(&server)?;
        tracing::info!(server = %id, "Server disconnected");
        Ok(())
    }

    async fn run_stop(&self, id: ParticipantId, force: bool, internal: bool) -> StopOutcome {
        let Some(record) = self.records.lock().get(&id).cloned() else {
            return StopOutcome::NotRunning;
        };
        self.stop_record(&record, force, internal).await
    }

    async fn stop_record(
        &self,
        record: &Arc<ProcessRecord>,
        force: bool,
        internal: bool,
    ) -> StopOutcome {
        let id = record.id;
        if !record.begin_stop() {
            return StopOutcome::AlreadyStopping;
        }

        let mut server = match self.store.get_server(&id) {
            Ok(Some(server)) => Some(server),
            Ok(None) => {
                tracing::debug!(server = %id, "Server record gone, abandoning stop");
                record.abandon();
                if !record.is_alive() {
                    self.release_abandoned(record).await;
                }
                return StopOutcome::RecordMissing;
            }
            Err(e) => {
                tracing::error!(server = %id, error = %e, "Failed to load server record");
                None
            }
        };
        let name = server.as_ref().map_or_else(|| id.to_name(), |s| s.name.clone());

        if internal {
            tracing::debug!(server = %id, "Detected process exit");
            if server.as_ref().is_some_and(|s| s.connected) {
                tracing::warn!(server = %id, name = %name, "Server stopped unexpectedly");
            }
        }

        record.set_state(ServerState::Stopping);
        if let Some(server) = server.as_mut() {
            Self::transition(server, ServerState::Stopping);
            self.persist(server);
        }

        let mut escalation = None;
        if !internal {
            escalation = self.request_shutdown(&id, &name).await;
            let mode = if force { KillMode::Force } else { KillMode::Graceful };
            if record.terminate(mode) {
                tracing::debug!(server = %id, ?mode, "Signalled server process");
            }
        }

        if let Some(dir) = record.working_dir() {
            if let Err(e) = self.supervisor.stager().cleanup(&dir).await {
                tracing::warn!(server = %id, error = %e, "Failed to remove working directory");
            }
        }
        if let Some(port) = record.port() {
            self.supervisor.release_port(port);
        }

        record.set_state(ServerState::Stopped);
        if let Some(mut server) = server {
            Self::transition(&mut server, ServerState::Stopped);
            server.clear_session();
            self.persist(&server);

            if server.unregister_after_disconnect {
                self.delete_record(&id);
            }
        }
        self.forget(record);

        tracing::info!(server = %id, template = %record.template, "Stopped server process");
        StopOutcome::Stopped { escalation }
    }

    /// Ask the server to shut down and wait for it to leave.
    async fn request_shutdown(&self, id: &ParticipantId, name: &str) -> Option<Escalation> {
        let reply = match self
            .dispatcher
            .request(&ShutdownRequest {}, *id, self.timing.ack_timeout)
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(server = %id, name, error = %e, "Failed to send stop request. Stopping process manually");
                return Some(Escalation::RequestFailed);
            }
        };

        if reply.await_one().await.is_none() {
            tracing::warn!(server = %id, name, "Server does not respond to stop request. Stopping process manually");
            return Some(Escalation::NoResponse);
        }

        let deadline = Instant::now() + self.timing.stop_timeout;
        loop {
            match self.store.get_server(id) {
                Ok(Some(server)) if server.connected => {}
                Ok(_) => return None,
                Err(e) => tracing::debug!(server = %id, error = %e, "Failed to poll server record"),
            }
            if Instant::now() >= deadline {
                tracing::warn!(server = %id, name, "Server stop request timed out. Stopping process manually");
                return Some(Escalation::DisconnectTimedOut);
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    fn watch_exit(
        self: &Arc<Self>,
        record: &Arc<ProcessRecord>,
        exited: oneshot::Receiver<Option<i32>>,
    ) {
        let weak = Arc::downgrade(self);
        let record = Arc::clone(record);
        tokio::spawn(async move {
            let code = match exited.await {
                Ok(code) => code,
                Err(_) if record.is_alive() => {
                    tracing::debug!(server = %record.id, "Lost exit notification of a live process");
                    return;
                }
                Err(_) => None,
            };
            let Some(coordinator) = weak.upgrade() else {
                return;
            };
            coordinator.process_exited(&record, code).await;
        });
    }

    /// Tear down after the process behind `record` exited.
    async fn process_exited(&self, record: &Arc<ProcessRecord>, code: Option<i32>) {
        let id = record.id;
        if !self.is_tracked(record) {
            tracing::debug!(server = %id, ?code, "Exit of a replaced process ignored");
            return;
        }
        tracing::debug!(server = %id, ?code, "Process exit observed");
        if record.is_abandoned() {
            self.release_abandoned(record).await;
            return;
        }
        self.stop_record(record, false, true).await;
    }

    /// Free what an abandoned stop left behind once its process is gone.
    async fn release_abandoned(&self, record: &Arc<ProcessRecord>) {
        let Some(live) = record.detach() else {
            return;
        };
        if let Err(e) = self.supervisor.stager().cleanup(&live.working_dir).await {
            tracing::warn!(server = %record.id, error = %e, "Failed to remove working directory");
        }
        self.supervisor.release_port(live.port);
        record.set_state(ServerState::Stopped);
        self.forget(record);
        tracing::debug!(server = %record.id, "Released abandoned server process");
    }

    fn transition(server: &mut ServerRecord, to: ServerState) {
        if let Err(e) = lifecycle::validate_transition(&server.id, server.state, to) {
            tracing::debug!(
                error = %e,
                allowed = ?lifecycle::valid_transitions_from(server.state),
                "Forcing state transition"
            );
        }
        server.state = to;
        server.touch();
    }

    fn persist(&self, server: &ServerRecord) {
        if let Err(e) = self.store.put_server(server) {
            tracing::error!(server = %server.id, error = %e, "Failed to persist server record");
        }
    }

    fn delete_record(&self, id: &ParticipantId) {
        if let Err(e) = self.store.delete_server(id) {
            tracing::warn!(server = %id, error = %e, "Failed to unregister server");
        }
    }

    fn is_tracked(&self, record: &Arc<ProcessRecord>) -> bool {
        self.records
            .lock()
            .get(&record.id)
            .is_some_and(|r| Arc::ptr_eq(r, record))
    }

    /// Drop the tracked record, unless a newer start already replaced it.
    fn forget(&self, record: &Arc<ProcessRecord>) {
        let mut records = self.records.lock();
        if records.get(&record.id).is_some_and(|r| Arc::ptr_eq(r, record)) {
            records.remove(&record.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Runtime, ServerVersion, VersionType};
    use crate::config::NodeConfig;
    use crate::process::mock::MockLauncher;
    use crate::staging::DirectoryStager;
    use fleet_packets::{respond_to_shutdown, LocalBroker, PacketRegistry};
    use fleet_store::{MemoryStore, StoreError};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    const SERVER: ParticipantId = ParticipantId::server(7);

    struct Harness {
        coordinator: Arc<LifecycleCoordinator>,
        store: Arc<dyn Store>,
        launcher: Arc<MockLauncher>,
        broker: Arc<LocalBroker>,
        registry: Arc<PacketRegistry>,
        template: ConfigurationTemplate,
        root: TempDir,
    }

    impl Harness {
        fn new(timing: StopTiming) -> Self {
            Self::with_store(Arc::new(MemoryStore::new()), timing)
        }

        fn with_store(store: Arc<dyn Store>, timing: StopTiming) -> Self {
            let root = TempDir::new().unwrap();
            let config = NodeConfig {
                node_index: 1,
                work_root: root.path().to_path_buf(),
                stop: timing,
                ..Default::default()
            };

            let mut catalog = Catalog::new();
            catalog
                .add_version(ServerVersion {
                    id: "paper".into(),
                    runtime_id: Some("java-17".into()),
                    type_id: Some("paper".into()),
                    executable: PathBuf::from("server.jar"),
                })
                .add_runtime(Runtime {
                    id: "java-17".into(),
                    major: 17,
                    located: HashMap::from([(
                        "node-1".to_string(),
                        PathBuf::from("/usr/bin/java"),
                    )]),
                })
                .add_type(VersionType {
                    id: "paper".into(),
                    ..Default::default()
                });

            let broker = Arc::new(LocalBroker::new());
            let registry = Arc::new(PacketRegistry::with_builtin());
            let dispatcher =
                PacketDispatcher::connect(config.node_id(), broker.clone(), registry.clone())
                    .unwrap();
            let launcher = Arc::new(MockLauncher::new());
            let supervisor = ProcessSupervisor::new(
                &config,
                Arc::new(catalog),
                launcher.clone(),
                Arc::new(DirectoryStager::new(root.path())),
            );
            let coordinator = Arc::new(LifecycleCoordinator::new(
                config.node_id(),
                Arc::clone(&store),
                dispatcher,
                supervisor,
                timing,
            ));

            Self {
                coordinator,
                store,
                launcher,
                broker,
                registry,
                template: ConfigurationTemplate::new("lobby", "paper", 41000),
                root,
            }
        }

        fn connect(&self, id: ParticipantId) -> Arc<PacketDispatcher> {
            PacketDispatcher::connect(id, self.broker.clone(), self.registry.clone()).unwrap()
        }

        async fn start(&self, id: ParticipantId) -> StartOutcome {
            self.coordinator.start(&self.template, id).await
        }

        fn working_dir(&self, id: &ParticipantId) -> PathBuf {
            self.coordinator.record(id).unwrap().working_dir.unwrap()
        }
    }

    fn fast_timing() -> StopTiming {
        StopTiming {
            ack_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
            stop_timeout: Duration::from_millis(200),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    /// Counts shutdown requests addressed to `id`.
    fn spy_shutdowns(
        harness: &Harness,
        id: ParticipantId,
    ) -> (Arc<PacketDispatcher>, Arc<AtomicUsize>) {
        let spy = harness.connect(id);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        spy.listen::<ShutdownRequest, _>(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (spy, count)
    }

    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> fleet_store::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StoreError::Database("disk full".into()))
            } else {
                Ok(())
            }
        }
    }

    impl Store for FlakyStore {
        fn put_server(&self, server: &ServerRecord) -> fleet_store::Result<()> {
            self.check()?;
            self.inner.put_server(server)
        }

        fn get_server(&self, id: &ParticipantId) -> fleet_store::Result<Option<ServerRecord>> {
            self.inner.get_server(id)
        }

        fn delete_server(&self, id: &ParticipantId) -> fleet_store::Result<()> {
            self.check()?;
            self.inner.delete_server(id)
        }

        fn list_servers(&self) -> fleet_store::Result<Vec<ServerRecord>> {
            self.inner.list_servers()
        }

        fn list_servers_by_state(
            &self,
            state: ServerState,
        ) -> fleet_store::Result<Vec<ServerRecord>> {
            self.inner.list_servers_by_state(state)
        }

        fn list_servers_by_host(
            &self,
            host: &ParticipantId,
        ) -> fleet_store::Result<Vec<ServerRecord>> {
            self.inner.list_servers_by_host(host)
        }
    }

    #[tokio::test]
    async fn start_tracks_process_and_record() {
        let h = Harness::new(fast_timing());

        let outcome = h.start(SERVER).await;
        let StartOutcome::Success { port } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };

        let server = h.store.get_server(&SERVER).unwrap().unwrap();
        assert_eq!(server.state, ServerState::Starting);
        assert_eq!(server.port, Some(port));
        assert_eq!(server.host, ParticipantId::node(1));
        assert_eq!(server.template, "lobby");

        let info = h.coordinator.record(&SERVER).unwrap();
        assert!(info.alive);
        assert!(!info.stop_requested);
        assert_eq!(info.port, Some(port));
        assert_eq!(h.coordinator.running(), vec![SERVER]);
        assert_eq!(h.launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn second_start_is_already_running() {
        let h = Harness::new(fast_timing());
        assert!(h.start(SERVER).await.is_success());
        assert_eq!(h.start(SERVER).await, StartOutcome::AlreadyRunning);
        assert_eq!(h.launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn failed_spawn_leaves_nothing_behind() {
        let h = Harness::new(fast_timing());
        h.launcher.set_fail_spawn(true);

        assert!(matches!(h.start(SERVER).await, StartOutcome::SpawnFailed(_)));
        assert!(h.coordinator.record(&SERVER).is_none());
        assert!(h.coordinator.running().is_empty());
        assert!(h.store.get_server(&SERVER).unwrap().is_none());
        assert!(!h.root.path().join("server-7").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_stop_escalates_after_ack_timeout() {
        let h = Harness::new(StopTiming::default());
        assert!(h.start(SERVER).await.is_success());
        let dir = h.working_dir(&SERVER);

        let started = Instant::now();
        let outcome = h.coordinator.stop(SERVER, false).await;

        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                escalation: Some(Escalation::NoResponse)
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(h.launcher.kills(&SERVER), vec![KillMode::Graceful]);
        assert!(!dir.exists());
        assert!(h.store.get_server(&SERVER).unwrap().is_none());
        assert!(h.coordinator.record(&SERVER).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let h = Harness::new(StopTiming::default());
        assert!(h.start(SERVER).await.is_success());

        let (first, second) = tokio::join!(
            h.coordinator.stop(SERVER, true),
            h.coordinator.stop(SERVER, true)
        );
        let mut outcomes = [first, second];
        outcomes.sort_by_key(|o| matches!(o, StopOutcome::Stopped { .. }));
        assert_eq!(outcomes[0], StopOutcome::AlreadyStopping);
        assert!(matches!(outcomes[1], StopOutcome::Stopped { .. }));

        assert_eq!(h.coordinator.stop(SERVER, true).await, StopOutcome::NotRunning);
        assert_eq!(h.launcher.kills(&SERVER), vec![KillMode::Force]);
    }

    #[tokio::test]
    async fn acknowledged_stop_waits_for_disconnect() {
        let h = Harness::new(fast_timing());
        assert!(h.start(SERVER).await.is_success());
        h.coordinator
            .mark_connected(&SERVER, SessionId::generate())
            .unwrap();

        let server = h.connect(SERVER);
        let store = Arc::clone(&h.store);
        respond_to_shutdown(&server, move || {
            let mut record = store.get_server(&SERVER).unwrap().unwrap();
            record.connected = false;
            store.put_server(&record).unwrap();
        });

        let outcome = h.coordinator.stop(SERVER, false).await;
        assert_eq!(outcome, StopOutcome::Stopped { escalation: None });
        assert_eq!(h.launcher.kills(&SERVER), vec![KillMode::Graceful]);
    }

    #[tokio::test]
    async fn acknowledged_but_connected_server_times_out() {
        let h = Harness::new(fast_timing());
        assert!(h.start(SERVER).await.is_success());
        h.coordinator
            .mark_connected(&SERVER, SessionId::generate())
            .unwrap();

        let server = h.connect(SERVER);
        respond_to_shutdown(&server, || {});

        let outcome = h.coordinator.stop(SERVER, false).await;
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                escalation: Some(Escalation::DisconnectTimedOut)
            }
        );
        assert_eq!(h.launcher.kills(&SERVER), vec![KillMode::Graceful]);
    }

    #[tokio::test]
    async fn process_exit_never_sends_shutdown_request() {
        let h = Harness::new(fast_timing());
        assert!(h.start(SERVER).await.is_success());
        h.coordinator
            .mark_connected(&SERVER, SessionId::generate())
            .unwrap();
        let dir = h.working_dir(&SERVER);
        let (_spy, requests) = spy_shutdowns(&h, SERVER);

        assert!(h.launcher.exit(&SERVER, Some(1)));
        wait_until(|| h.coordinator.record(&SERVER).is_none()).await;

        assert_eq!(requests.load(Ordering::SeqCst), 0);
        assert!(h.launcher.kills(&SERVER).is_empty());
        assert!(!dir.exists());
        assert!(h.store.get_server(&SERVER).unwrap().is_none());
    }

    #[tokio::test]
    async fn retained_record_is_left_stopped_and_cleared() {
        let mut h = Harness::new(fast_timing());
        h.template.unregister_after_disconnect = false;
        assert!(h.start(SERVER).await.is_success());

        let mut server = h.store.get_server(&SERVER).unwrap().unwrap();
        server.occupants.push("alice".into());
        h.store.put_server(&server).unwrap();
        h.coordinator
            .mark_connected(&SERVER, SessionId::generate())
            .unwrap();

        assert!(h.launcher.exit(&SERVER, None));
        wait_until(|| h.coordinator.record(&SERVER).is_none()).await;

        let server = h.store.get_server(&SERVER).unwrap().unwrap();
        assert_eq!(server.state, ServerState::Stopped);
        assert!(!server.connected);
        assert!(server.session.is_none());
        assert!(server.occupants.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_completed_stop_is_accepted() {
        let h = Harness::new(StopTiming::default());
        assert!(h.start(SERVER).await.is_success());
        assert!(matches!(
            h.coordinator.stop(SERVER, true).await,
            StopOutcome::Stopped { .. }
        ));

        assert!(h.start(SERVER).await.is_success());
        assert_eq!(h.launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn stop_without_record_is_abandoned() {
        let h = Harness::new(fast_timing());
        assert!(h.start(SERVER).await.is_success());
        h.store.delete_server(&SERVER).unwrap();

        assert_eq!(h.coordinator.stop(SERVER, false).await, StopOutcome::RecordMissing);
        assert!(h.launcher.kills(&SERVER).is_empty());
        assert_eq!(h.start(SERVER).await, StartOutcome::PreviouslyStopped);
    }

    #[tokio::test]
    async fn abandoned_record_is_released_once_process_exits() {
        let h = Harness::new(fast_timing());
        assert!(h.start(SERVER).await.is_success());
        let dir = h.working_dir(&SERVER);
        h.store.delete_server(&SERVER).unwrap();

        assert_eq!(h.coordinator.stop(SERVER, false).await, StopOutcome::RecordMissing);
        assert!(h.launcher.is_alive(&SERVER));
        assert!(dir.exists());

        assert!(h.launcher.exit(&SERVER, Some(0)));
        wait_until(|| h.coordinator.record(&SERVER).is_none()).await;
        assert!(!dir.exists());
        assert!(h.coordinator.supervisor().reserved_ports().is_empty());

        assert!(h.start(SERVER).await.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_survives_exit_of_previous_process() {
        let h = Harness::new(StopTiming::default());
        h.launcher.set_linger_on_kill(true);
        assert!(h.start(SERVER).await.is_success());

        assert_eq!(
            h.coordinator.stop(SERVER, false).await,
            StopOutcome::Stopped {
                escalation: Some(Escalation::NoResponse)
            }
        );
        assert!(h.launcher.is_alive(&SERVER));

        assert!(h.start(SERVER).await.is_success());
        let dir = h.working_dir(&SERVER);

        assert!(h.launcher.exit_generation(&SERVER, 0, Some(143)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let info = h.coordinator.record(&SERVER).unwrap();
        assert!(info.alive);
        assert!(!info.stop_requested);
        assert_eq!(h.coordinator.running(), vec![SERVER]);
        assert!(dir.exists());
        assert_eq!(
            h.store.get_server(&SERVER).unwrap().unwrap().state,
            ServerState::Starting
        );
        assert!(h.launcher.is_alive(&SERVER));
    }

    #[tokio::test(start_paused = true)]
    async fn servers_from_one_template_get_distinct_ports() {
        let h = Harness::new(fast_timing());
        let template = ConfigurationTemplate::new("lobby", "paper", 42000);
        let first = ParticipantId::server(1);

        let StartOutcome::Success { port: first_port } =
            h.coordinator.start(&template, first).await
        else {
            panic!("first start failed");
        };
        let StartOutcome::Success { port: second_port } =
            h.coordinator.start(&template, ParticipantId::server(2)).await
        else {
            panic!("second start failed");
        };
        assert_ne!(first_port, second_port);

        assert!(matches!(
            h.coordinator.stop(first, true).await,
            StopOutcome::Stopped { .. }
        ));
        assert_eq!(
            h.coordinator.start(&template, ParticipantId::server(3)).await,
            StartOutcome::Success { port: first_port }
        );
    }

    #[tokio::test]
    async fn unknown_server_is_not_running() {
        let h = Harness::new(fast_timing());
        assert_eq!(
            h.coordinator.stop(ParticipantId::server(99), false).await,
            StopOutcome::NotRunning
        );
    }

    #[tokio::test(start_paused = true)]
    async fn store_failures_do_not_block_teardown() {
        let store = Arc::new(FlakyStore::default());
        let h = Harness::with_store(store.clone(), StopTiming::default());
        assert!(h.start(SERVER).await.is_success());
        let dir = h.working_dir(&SERVER);

        store.fail_writes.store(true, Ordering::SeqCst);
        let outcome = h.coordinator.stop(SERVER, true).await;

        assert!(matches!(outcome, StopOutcome::Stopped { .. }));
        assert_eq!(h.launcher.kills(&SERVER), vec![KillMode::Force]);
        assert!(!dir.exists());
        assert!(h.coordinator.record(&SERVER).is_none());
        // The last successful write is what the store still holds.
        assert_eq!(
            store.get_server(&SERVER).unwrap().unwrap().state,
            ServerState::Starting
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_stops_every_server() {
        let h = Harness::new(StopTiming::default());
        let other = ParticipantId::server(8);
        assert!(h.start(SERVER).await.is_success());
        assert!(h.start(other).await.is_success());

        let outcomes = h.coordinator.stop_all(true).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|(_, o)| matches!(o, StopOutcome::Stopped { .. })));
        assert!(h.coordinator.running().is_empty());
        assert_eq!(h.launcher.kills(&other), vec![KillMode::Force]);
    }

    #[tokio::test]
    async fn mark_connected_requires_starting_state() {
        let h = Harness::new(fast_timing());
        assert!(h.start(SERVER).await.is_success());

        h.coordinator
            .mark_connected(&SERVER, SessionId::generate())
            .unwrap();
        assert_eq!(
            h.coordinator.record(&SERVER).unwrap().state,
            ServerState::Running
        );
        assert!(matches!(
            h.coordinator.mark_connected(&SERVER, SessionId::generate()),
            Err(NodeError::InvalidState { .. })
        ));

        h.coordinator.mark_disconnected(&SERVER).unwrap();
        assert!(!h.store.get_server(&SERVER).unwrap().unwrap().connected);
        assert!(matches!(
            h.coordinator.mark_disconnected(&ParticipantId::server(99)),
            Err(NodeError::ServerNotFound(_))
        ));
    }
}
