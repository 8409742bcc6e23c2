//! Mock collaborators for testing

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use warden_api::{CredentialPair, HostIdentity, Session};
use warden_util::{HostName, SessionId};

use crate::{
    CommandOutput, CredentialSource, ExitStatus, HostConnection, HostConnector, HostError,
    HostInspector, HostResult, SessionActions, WorkerLauncher, WorkerProcess,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state behind every connection a [`MockConnector`] hands out
#[derive(Default)]
pub struct MockHostState {
    /// Pairs the credential source reports; `None` makes it unreachable
    pub credentials: Mutex<Option<Vec<CredentialPair>>>,
    /// Canned output per command; unknown commands succeed with no output
    pub outputs: Mutex<HashMap<String, CommandOutput>>,
    /// Every command run, in order
    pub commands: Mutex<Vec<String>>,
    pub credential_calls: AtomicUsize,
}

/// Mock connection to a host
pub struct MockConnection {
    state: Arc<MockHostState>,
}

impl MockConnection {
    pub fn new(state: Arc<MockHostState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl CredentialSource for MockConnection {
    async fn query_credentials(&self) -> HostResult<Vec<CredentialPair>> {
        self.state.credential_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.credentials)
            .clone()
            .ok_or_else(|| HostError::CredentialSource("Mock credential source down".into()))
    }
}

#[async_trait]
impl HostConnection for MockConnection {
    async fn run(&self, command: &str) -> HostResult<CommandOutput> {
        lock(&self.state.commands).push(command.to_string());
        Ok(lock(&self.state.outputs)
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput::success("")))
    }
}

/// Mock connector for unit/integration testing
pub struct MockConnector {
    pub state: Arc<MockHostState>,

    /// Configure connect to fail
    pub fail_connect: Arc<Mutex<bool>>,

    pub connect_calls: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockHostState::default()),
            fail_connect: Arc::new(Mutex::new(false)),
            connect_calls: AtomicUsize::new(0),
        }
    }

    /// Connector whose hosts report the given credential pairs
    pub fn with_credentials(credentials: Vec<CredentialPair>) -> Self {
        let connector = Self::new();
        connector.set_credentials(Some(credentials));
        connector
    }

    pub fn set_credentials(&self, credentials: Option<Vec<CredentialPair>>) {
        *lock(&self.state.credentials) = credentials;
    }

    pub fn set_output(&self, command: &str, output: CommandOutput) {
        lock(&self.state.outputs).insert(command.to_string(), output);
    }

    pub fn credential_calls(&self) -> usize {
        self.state.credential_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state.commands).clone()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostConnector for MockConnector {
    async fn connect(&self, host: &HostIdentity) -> HostResult<Box<dyn HostConnection>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.fail_connect) {
            return Err(HostError::Unreachable(host.address.clone()));
        }
        Ok(Box::new(MockConnection::new(self.state.clone())))
    }
}

/// Action recorded by [`MockActions`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    Before { host: HostName, session: SessionId },
    After { host: HostName, streaming: bool },
}

/// Mock Before/After actions
pub struct MockActions {
    events: Mutex<Vec<ActionEvent>>,

    /// Result returned by the before action
    pub before_result: Arc<Mutex<bool>>,

    /// Configure the after action to fail
    pub fail_after: Arc<Mutex<bool>>,
}

impl MockActions {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            before_result: Arc::new(Mutex::new(true)),
            fail_after: Arc::new(Mutex::new(false)),
        }
    }

    pub fn events(&self) -> Vec<ActionEvent> {
        lock(&self.events).clone()
    }

    pub fn before_count(&self) -> usize {
        self.count(|e| matches!(e, ActionEvent::Before { .. }))
    }

    pub fn after_count(&self) -> usize {
        self.count(|e| matches!(e, ActionEvent::After { .. }))
    }

    fn count(&self, pred: impl Fn(&ActionEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }

    /// Wait until at least `n` after actions ran. Returns false on timeout.
    pub async fn wait_for_after(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.after_count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.after_count() >= n
    }
}

impl Default for MockActions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionActions for MockActions {
    async fn before_session(
        &self,
        _conn: &dyn HostConnection,
        host: &HostIdentity,
        session: &Session,
    ) -> HostResult<bool> {
        lock(&self.events).push(ActionEvent::Before {
            host: host.name.clone(),
            session: session.id,
        });
        Ok(*lock(&self.before_result))
    }

    async fn after_session(
        &self,
        _conn: &dyn HostConnection,
        host: &HostIdentity,
        streaming: bool,
    ) -> HostResult<bool> {
        lock(&self.events).push(ActionEvent::After {
            host: host.name.clone(),
            streaming,
        });
        if *lock(&self.fail_after) {
            return Err(HostError::Internal("Mock after failure".into()));
        }
        Ok(true)
    }
}

/// Mock inspector; `None` makes the check fail
pub struct MockInspector {
    pub protection: Arc<Mutex<Option<bool>>>,
    pub restrictions: Arc<Mutex<Option<bool>>>,
}

impl MockInspector {
    pub fn new(protection: Option<bool>, restrictions: Option<bool>) -> Self {
        Self {
            protection: Arc::new(Mutex::new(protection)),
            restrictions: Arc::new(Mutex::new(restrictions)),
        }
    }
}

#[async_trait]
impl HostInspector for MockInspector {
    async fn protection_mode(&self, _conn: &dyn HostConnection) -> HostResult<bool> {
        (*lock(&self.protection)).ok_or_else(|| HostError::Internal("Mock protection check failed".into()))
    }

    async fn restrictions_ok(&self, _conn: &dyn HostConnection) -> HostResult<bool> {
        (*lock(&self.restrictions))
            .ok_or_else(|| HostError::Internal("Mock restriction check failed".into()))
    }
}

/// Observable state of one mock worker process
#[derive(Debug, Default)]
pub struct MockProcessState {
    pub exit: Option<ExitStatus>,
    pub terminated: bool,
    pub killed: bool,
    /// Keep running after terminate (forces the kill path)
    pub ignore_terminate: bool,
}

/// Mock worker process
pub struct MockProcess {
    pid: u32,
    state: Arc<Mutex<MockProcessState>>,
}

impl WorkerProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> HostResult<Option<ExitStatus>> {
        Ok(lock(&self.state).exit)
    }

    fn terminate(&mut self) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.terminated = true;
        if !state.ignore_terminate && state.exit.is_none() {
            state.exit = Some(ExitStatus::signaled(15));
        }
        Ok(())
    }

    fn kill(&mut self) -> HostResult<()> {
        let mut state = lock(&self.state);
        state.killed = true;
        if state.exit.is_none() {
            state.exit = Some(ExitStatus::signaled(9));
        }
        Ok(())
    }
}

/// A spawn recorded by [`MockLauncher`]
#[derive(Debug, Clone)]
pub struct MockSpawn {
    pub host: HostName,
    pub env: BTreeMap<String, String>,
    pub state: Arc<Mutex<MockProcessState>>,
}

/// Mock worker launcher
pub struct MockLauncher {
    next_pid: AtomicU32,
    spawns: Mutex<Vec<MockSpawn>>,

    /// Configure spawn to fail
    pub fail_spawn: Arc<Mutex<bool>>,

    /// New processes ignore terminate
    pub ignore_terminate: Arc<Mutex<bool>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            spawns: Mutex::new(Vec::new()),
            fail_spawn: Arc::new(Mutex::new(false)),
            ignore_terminate: Arc::new(Mutex::new(false)),
        }
    }

    pub fn spawns(&self) -> Vec<MockSpawn> {
        lock(&self.spawns).clone()
    }

    /// Number of processes spawned for a host
    pub fn spawn_count(&self, host: &HostName) -> usize {
        lock(&self.spawns).iter().filter(|s| &s.host == host).count()
    }

    /// Make the most recent process of a host exit with `code`
    pub fn crash(&self, host: &HostName, code: i32) {
        if let Some(spawn) = lock(&self.spawns).iter().rev().find(|s| &s.host == host) {
            lock(&spawn.state).exit = Some(ExitStatus::with_code(code));
        }
    }
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerLauncher for MockLauncher {
    fn spawn(
        &self,
        host: &HostIdentity,
        env: &BTreeMap<String, String>,
    ) -> HostResult<Box<dyn WorkerProcess>> {
        if *lock(&self.fail_spawn) {
            return Err(HostError::SpawnFailed("Mock spawn failure".into()));
        }

        let state = Arc::new(Mutex::new(MockProcessState {
            ignore_terminate: *lock(&self.ignore_terminate),
            ..Default::default()
        }));
        lock(&self.spawns).push(MockSpawn {
            host: host.name.clone(),
            env: env.clone(),
            state: state.clone(),
        });

        Ok(Box::new(MockProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            state,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostIdentity {
        HostIdentity::new("PC-01", "10.0.0.1", "admin", "pw")
    }

    #[tokio::test]
    async fn mock_connection_shares_state() {
        let connector = MockConnector::with_credentials(vec![CredentialPair::new("s1", "t1")]);

        let conn = connector.connect(&host()).await.unwrap();
        let pairs = conn.query_credentials().await.unwrap();
        conn.run("hostname").await.unwrap();

        assert_eq!(pairs.len(), 1);
        assert_eq!(connector.credential_calls(), 1);
        assert_eq!(connector.commands(), vec!["hostname".to_string()]);
    }

    #[tokio::test]
    async fn mock_connect_failure() {
        let connector = MockConnector::new();
        *connector.fail_connect.lock().unwrap() = true;

        assert!(connector.connect(&host()).await.is_err());
    }

    #[test]
    fn mock_process_lifecycle() {
        let launcher = MockLauncher::new();
        let mut process = launcher.spawn(&host(), &BTreeMap::new()).unwrap();

        assert!(process.try_wait().unwrap().is_none());
        process.terminate().unwrap();
        assert_eq!(process.try_wait().unwrap(), Some(ExitStatus::signaled(15)));
        assert_eq!(launcher.spawn_count(&host().name), 1);
    }

    #[test]
    fn mock_process_crash() {
        let launcher = MockLauncher::new();
        let mut process = launcher.spawn(&host(), &BTreeMap::new()).unwrap();

        launcher.crash(&host().name, 1);
        assert_eq!(process.try_wait().unwrap(), Some(ExitStatus::with_code(1)));
    }
}
