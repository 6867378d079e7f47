//! Test doubles: an in-process worker, a fake process table and launcher

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::{
    ClientConfig, Config, LogConfig, ResolverConfig, SessionConfig, StoreConfig, WorkerConfig,
};
use crate::error::{Result, RelayError};
use crate::models::{ClientKind, Endpoint};
use crate::relay::{
    Connector, OutboundQueues, RelayFacade, Session, ShutdownNotifier, WorkerConnection,
    WsConnector,
};
use crate::repository::{EndpointStore, MemoryEndpointStore};
use crate::worker::{
    LaunchedWorker, ProcessInfo, ProcessTable, Resolver, Supervisor, WorkerLauncher, WorkerStatus,
};

const WAIT_LIMIT: Duration = Duration::from_secs(5);
const WORKER_NAME: &str = "plot-worker";

pub fn test_config() -> Config {
    Config {
        worker: WorkerConfig {
            executable: PathBuf::from(WORKER_NAME),
            args: Vec::new(),
            debug: false,
        },
        session: SessionConfig {
            retry_budget: 5,
            connect_timeout: Duration::from_secs(1),
            op_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(5),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
        },
        resolver: ResolverConfig {
            grace_period: Duration::from_millis(10),
            max_attempts: 3,
        },
        store: StoreConfig {
            state_dir: std::env::temp_dir().join("plot-relay-tests"),
        },
        client: ClientConfig {
            kind: ClientKind::Script,
            script_exit_delay: Duration::ZERO,
        },
        log: LogConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Poll `condition` until it holds, panicking after a few seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for<T, F, Fut>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        if let Some(value) = probe().await {
            return value;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}

/// WebSocket server standing in for the rendering worker
#[derive(Clone)]
pub struct FakeWorker {
    pub endpoint: Endpoint,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
}

impl FakeWorker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let tasks: Arc<Mutex<Vec<AbortHandle>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_task = {
            let received = received.clone();
            let connections = connections.clone();
            let tasks = tasks.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let received = received.clone();
                    let handler = tokio::spawn(async move {
                        let Ok(mut ws) = accept_async(stream).await else {
                            return;
                        };
                        while let Some(Ok(message)) = ws.next().await {
                            if let Message::Text(text) = message {
                                received.lock().push(text.as_str().to_string());
                            }
                        }
                    });
                    tasks.lock().push(handler.abort_handle());
                }
            })
        };
        tasks.lock().push(accept_task.abort_handle());

        Self {
            endpoint: Endpoint::new("127.0.0.1", port),
            received,
            connections,
            tasks,
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub async fn wait_for_messages(&self, count: usize) -> Vec<String> {
        wait_for(|| async {
            let received = self.received();
            (received.len() >= count).then_some(received)
        })
        .await
    }

    pub async fn wait_for_connections(&self, count: usize) {
        wait_until(|| self.connections.load(Ordering::SeqCst) >= count).await;
    }

    /// Drop the listener and every open connection
    pub fn kill(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[derive(Default)]
pub struct FakeProcessTable {
    processes: Mutex<HashMap<u32, ProcessInfo>>,
}

impl FakeProcessTable {
    pub fn insert(&self, pid: u32, cmd: Vec<String>, alive: bool) {
        self.processes
            .lock()
            .insert(pid, ProcessInfo { pid, cmd, alive });
    }

    pub fn remove(&self, pid: u32) {
        self.processes.lock().remove(&pid);
    }
}

impl ProcessTable for FakeProcessTable {
    fn lookup(&self, pid: u32) -> Option<ProcessInfo> {
        self.processes.lock().get(&pid).cloned()
    }

    fn kill(&self, pid: u32) -> bool {
        self.processes.lock().remove(&pid).is_some()
    }
}

/// Launcher that starts a [`FakeWorker`] and publishes its endpoint
pub struct FakeLauncher {
    store: Arc<MemoryEndpointStore>,
    processes: Arc<FakeProcessTable>,
    workers: Mutex<Vec<(u32, FakeWorker)>>,
    launches: AtomicU32,
    publish: AtomicBool,
    register_process: AtomicBool,
    missing: AtomicBool,
}

impl FakeLauncher {
    pub fn new(store: Arc<MemoryEndpointStore>, processes: Arc<FakeProcessTable>) -> Self {
        Self {
            store,
            processes,
            workers: Mutex::new(Vec::new()),
            launches: AtomicU32::new(0),
            publish: AtomicBool::new(true),
            register_process: AtomicBool::new(true),
            missing: AtomicBool::new(false),
        }
    }

    /// Whether launched workers publish an endpoint
    pub fn set_publish(&self, publish: bool) {
        self.publish.store(publish, Ordering::SeqCst);
    }

    /// Whether launched workers show up in the process table
    pub fn set_register_process(&self, register: bool) {
        self.register_process.store(register, Ordering::SeqCst);
    }

    pub fn fail_missing_executable(&self) {
        self.missing.store(true, Ordering::SeqCst);
    }

    pub fn launch_count(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn last_pid(&self) -> Option<u32> {
        match self.launch_count() {
            0 => None,
            n => Some(1000 + n),
        }
    }

    pub fn worker(&self, index: usize) -> FakeWorker {
        self.workers.lock()[index].1.clone()
    }

    pub async fn wait_for_worker(&self, index: usize) -> FakeWorker {
        wait_until(|| self.workers.lock().len() > index).await;
        self.worker(index)
    }

    /// Kill a worker from outside: connections drop and its pid disappears
    pub fn kill_worker(&self, index: usize) {
        let (pid, worker) = self.workers.lock()[index].clone();
        worker.kill();
        self.processes.remove(pid);
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self) -> Result<LaunchedWorker> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(RelayError::WorkerExecutableMissing(PathBuf::from(WORKER_NAME)));
        }

        let pid = 1000 + self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.register_process.load(Ordering::SeqCst) {
            self.processes
                .insert(pid, vec![WORKER_NAME.to_string(), "--headless".to_string()], true);
        }

        if self.publish.load(Ordering::SeqCst) {
            let worker = FakeWorker::start().await;
            self.store.save_endpoint(&worker.endpoint)?;
            self.workers.lock().push((pid, worker));
        }

        Ok(LaunchedWorker { pid, stdin: None })
    }
}

/// Connector recording sent frames per connection, with injectable failures
#[derive(Default)]
pub struct ScriptedConnector {
    sent: Arc<Mutex<Vec<Vec<String>>>>,
    fail_on: Arc<Mutex<Option<String>>>,
    refuse: AtomicBool,
    connects: AtomicU32,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first send of exactly `text` fails
    pub fn fail_once_on(&self, text: &str) {
        *self.fail_on.lock() = Some(text.to_string());
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Vec<String>> {
        self.sent.lock().clone()
    }

    pub async fn wait_for_sent(&self, connection: usize, count: usize) {
        wait_until(|| {
            self.sent
                .lock()
                .get(connection)
                .is_some_and(|frames| frames.len() >= count)
        })
        .await;
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn WorkerConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(RelayError::WebSocket(format!(
                "connection refused by {}",
                endpoint
            )));
        }

        let index = {
            let mut sent = self.sent.lock();
            sent.push(Vec::new());
            sent.len() - 1
        };
        Ok(Box::new(ScriptedConnection {
            index,
            sent: self.sent.clone(),
            fail_on: self.fail_on.clone(),
        }))
    }
}

struct ScriptedConnection {
    index: usize,
    sent: Arc<Mutex<Vec<Vec<String>>>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl WorkerConnection for ScriptedConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        {
            let mut fail_on = self.fail_on.lock();
            if fail_on.as_deref() == Some(text.as_str()) {
                *fail_on = None;
                return Err(RelayError::WebSocket("broken pipe".to_string()));
            }
        }
        self.sent.lock()[self.index].push(text);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<()> {
        std::future::pending::<Result<()>>().await
    }
}

/// Fake store, process table and launcher wired together
pub struct Harness {
    pub store: Arc<MemoryEndpointStore>,
    pub processes: Arc<FakeProcessTable>,
    pub launcher: Arc<FakeLauncher>,
    pub status: Arc<WorkerStatus>,
    pub queues: Arc<OutboundQueues>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryEndpointStore::new());
        let processes = Arc::new(FakeProcessTable::default());
        let launcher = Arc::new(FakeLauncher::new(store.clone(), processes.clone()));
        Self {
            store,
            processes,
            launcher,
            status: Arc::new(WorkerStatus::new()),
            queues: Arc::new(OutboundQueues::new()),
        }
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(
            self.store.clone(),
            self.processes.clone(),
            self.launcher.clone(),
            self.status.clone(),
            WORKER_NAME,
        ))
    }

    pub fn resolver(&self, supervisor: Arc<Supervisor>) -> Resolver {
        Resolver::new(
            self.store.clone(),
            supervisor,
            self.status.clone(),
            test_config().resolver,
        )
    }

    pub fn session(&self, budget: u32) -> Session {
        self.session_with(budget, Arc::new(WsConnector))
    }

    pub fn session_with(&self, budget: u32, connector: Arc<dyn Connector>) -> Session {
        let supervisor = self.supervisor();
        let mut config = test_config().session;
        config.retry_budget = budget;

        Session::new(
            supervisor.clone(),
            self.resolver(supervisor),
            connector,
            self.queues.clone(),
            self.status.clone(),
            config,
        )
    }

    pub fn facade(&self, budget: u32) -> RelayFacade {
        self.facade_with(budget, Arc::new(WsConnector))
    }

    pub fn facade_with(&self, budget: u32, connector: Arc<dyn Connector>) -> RelayFacade {
        let mut config = test_config();
        config.session.retry_budget = budget;
        let notifier = Arc::new(
            ShutdownNotifier::new(&config, self.status.clone())
                .with_helper("/definitely/not/a/plot-relay"),
        );

        RelayFacade::from_parts(
            config,
            self.store.clone(),
            self.processes.clone(),
            self.launcher.clone(),
            connector,
            self.status.clone(),
            notifier,
            Handle::current(),
        )
    }

    pub async fn wait_settled(&self) {
        wait_until(|| self.queues.is_settled()).await;
    }

    pub async fn wait_until<F: Fn() -> bool>(&self, condition: F) {
        wait_until(condition).await;
    }
}
