//! The agent core: lifecycle, keepalive timer, subscription
//! dispatch, standalone scheduling, and signal-driven shutdown, all serial
//! on one event-loop task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::check::Check;
use crate::dispatcher::{Dispatcher, InProgressSet};
use crate::error::Result;
use crate::extension::ExtensionRegistry;
use crate::keepalive::{KeepaliveEngine, KEEPALIVE_INTERVAL_SECS};
use crate::metrics::AgentMetrics;
use crate::publisher::ResultPublisher;
use crate::redact::Redactor;
use crate::scheduler::{self, SchedulerOverride};
use crate::settings::Settings;
use crate::socket::{self, SocketHandle, SocketLedger};
use crate::subprocess::SubprocessRunner;
use crate::subscription;
use crate::transport::{Subscription, Transport};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initialized,
    Running,
    Pausing,
    Paused,
    Stopping,
    Stopped,
}

/// Identifies one entry in the run-timer ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TimerKey {
    Keepalive,
    Standalone(String),
}

/// What fired: a reference back into the run-timer ledger plus the data
/// needed to act on it.
pub enum TimerFired {
    Keepalive,
    Standalone(Check),
}

/// Control commands sent to the event loop from outside (signal traps, a
/// supervisor, or tests via [`AgentHandle`]).
pub enum ControlEvent {
    Pause,
    Resume,
    Stop,
}

/// Everything the event loop consumes. Every other task — timers, the
/// transport's subscription callback, the socket listeners, and dispatch
/// completions — only ever sends an `Event`; none of them touch the
/// ledgers directly.
pub enum Event {
    Timer(TimerFired),
    Inbound(Check),
    SocketPayload {
        transport: &'static str,
        payload: String,
    },
    DispatchComplete(Check),
    Control(ControlEvent),
}

/// A handle for external callers (the binary entry point, signal traps,
/// tests) to drive the agent and observe its lifecycle state.
#[derive(Clone)]
pub struct AgentHandle {
    control_tx: mpsc::Sender<Event>,
    state_rx: watch::Receiver<LifecycleState>,
}

impl AgentHandle {
    pub fn state(&self) -> LifecycleState {
        *self.state_rx.borrow()
    }

    pub async fn pause(&self) {
        let _ = self.control_tx.send(Event::Control(ControlEvent::Pause)).await;
    }

    pub async fn resume(&self) {
        let _ = self.control_tx.send(Event::Control(ControlEvent::Resume)).await;
    }

    pub async fn stop(&self) {
        let _ = self.control_tx.send(Event::Control(ControlEvent::Stop)).await;
    }

    /// Waits until the agent reaches [`LifecycleState::Stopped`].
    pub async fn wait_stopped(&self) {
        let mut rx = self.state_rx.clone();
        while *rx.borrow() != LifecycleState::Stopped {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// The fanout funnel name for this process: stable for its lifetime, unique
/// per process.
pub fn fanout_funnel_name(client_name: &str, version: &str, start_epoch: u64) -> String {
    format!("{client_name}-{version}-{start_epoch}")
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Construction parameters for [`AgentCore`]. Grouped into one struct
/// because every field is a required collaborator — there is no sensible
/// partial agent.
pub struct AgentCoreConfig {
    pub settings: Arc<Settings>,
    pub transport: Arc<dyn Transport>,
    pub extensions: Arc<dyn ExtensionRegistry>,
    pub redactor: Arc<dyn Redactor>,
    pub runner: Arc<dyn SubprocessRunner>,
    pub metrics: Arc<AgentMetrics>,
    pub version: String,
    pub schedule_override: SchedulerOverride,
}

/// Owns the three ledgers and the single event-loop task. Build
/// with [`AgentCore::build`], then spawn [`AgentCore::run`].
pub struct AgentCore {
    settings: Arc<Settings>,
    transport: Arc<dyn Transport>,
    metrics: Arc<AgentMetrics>,
    dispatcher: Arc<Dispatcher>,
    publisher: ResultPublisher,
    keepalive: KeepaliveEngine,
    in_progress: Arc<InProgressSet>,
    fanout_funnel: String,
    schedule_override: SchedulerOverride,

    event_tx: mpsc::Sender<Event>,
    event_rx: mpsc::Receiver<Event>,
    state_tx: watch::Sender<LifecycleState>,

    timers: HashMap<TimerKey, AbortHandle>,
    subscriptions: Vec<Subscription>,
    sockets: SocketLedger,
}

impl AgentCore {
    pub fn build(config: AgentCoreConfig) -> (Self, AgentHandle) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(LifecycleState::Initialized);

        let in_progress = Arc::new(InProgressSet::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.settings.clone(),
            config.runner.clone(),
            config.extensions.clone(),
            config.metrics.clone(),
            in_progress.clone(),
        ));
        let publisher = ResultPublisher::new(
            config.transport.clone(),
            config.metrics.clone(),
            config.settings.client.signature.clone(),
        );
        let keepalive = KeepaliveEngine::new(
            config.transport.clone(),
            config.redactor.clone(),
            config.metrics.clone(),
            &config.settings,
            config.version.clone(),
        );
        let fanout_funnel = fanout_funnel_name(
            &config.settings.client.name,
            &config.version,
            now_epoch_secs().max(0) as u64,
        );

        let core = Self {
            settings: config.settings,
            transport: config.transport,
            metrics: config.metrics,
            dispatcher,
            publisher,
            keepalive,
            in_progress,
            fanout_funnel,
            schedule_override: config.schedule_override,
            event_tx: event_tx.clone(),
            event_rx,
            state_tx,
            timers: HashMap::new(),
            subscriptions: Vec::new(),
            sockets: SocketLedger::new(),
        };
        let handle = AgentHandle {
            control_tx: event_tx,
            state_rx,
        };
        (core, handle)
    }

    fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: LifecycleState) {
        let _ = self.state_tx.send(state);
    }

    /// Runs the event loop to completion (until the agent reaches
    /// [`LifecycleState::Stopped`]). Intended to be spawned as its own task.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        while self.state() != LifecycleState::Stopped {
            match self.event_rx.recv().await {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let addr: SocketAddr = format!(
            "{}:{}",
            self.settings.client.socket.bind, self.settings.client.socket.port
        )
        .parse()
        .map_err(|_| {
            crate::error::AgentError::InvalidSettings(format!(
                "invalid socket address {}:{}",
                self.settings.client.socket.bind, self.settings.client.socket.port
            ))
        })?;

        let (tcp_acceptor, tcp_connections) = socket::serve_tcp(addr, self.event_tx.clone()).await?;
        self.sockets.push(SocketHandle::Acceptor(tcp_acceptor));
        self.sockets.push(SocketHandle::Connections(tcp_connections));

        let udp_acceptor = socket::serve_udp(addr, self.event_tx.clone()).await?;
        self.sockets.push(SocketHandle::Acceptor(udp_acceptor));

        self.bootstrap().await;
        Ok(())
    }

    /// Schedules keepalives, establishes subscriptions, schedules standalone
    /// checks, and sets state `running`. Safe to call on a fresh or paused
    /// agent.
    async fn bootstrap(&mut self) {
        self.keepalive.publish_once(now_epoch_secs()).await;
        self.schedule_keepalive_timer();

        for subscription in self.settings.client.subscriptions.clone() {
            self.establish_subscription(&subscription).await;
        }

        let schedule = scheduler::build_schedule(&self.settings, now_epoch_ms(), self.schedule_override);
        for entry in schedule {
            self.schedule_standalone(entry);
        }

        self.set_state(LifecycleState::Running);
    }

    async fn establish_subscription(&mut self, subscription: &str) {
        let binding = subscription::bind(subscription, &self.fanout_funnel);
        let tx = self.event_tx.clone();
        let result = self
            .transport
            .subscribe(
                &binding.pipe,
                binding.pattern,
                &binding.funnel,
                Box::new(move |raw| match serde_json::from_str::<Check>(&raw) {
                    Ok(check) => {
                        let _ = tx.try_send(Event::Inbound(check));
                    }
                    Err(e) => {
                        warn!(error = %e, raw = %raw, "failed to decode inbound check request");
                    }
                }),
            )
            .await;
        match result {
            Ok(sub) => self.subscriptions.push(sub),
            Err(e) => warn!(error = %e, pipe = %binding.pipe, "subscribe failed"),
        }
    }

    fn schedule_keepalive_timer(&mut self) {
        let tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
            ticker.tick().await; // the first tick fires immediately; bootstrap already published once
            loop {
                ticker.tick().await;
                if tx.send(Event::Timer(TimerFired::Keepalive)).await.is_err() {
                    break;
                }
            }
        });
        self.timers.insert(TimerKey::Keepalive, task.abort_handle());
    }

    fn schedule_standalone(&mut self, entry: scheduler::ScheduleEntry) {
        let tx = self.event_tx.clone();
        let key = TimerKey::Standalone(entry.check.name.clone());
        let check = entry.check;
        let splay = entry.splay;
        let interval = entry.interval;
        let task = tokio::spawn(async move {
            tokio::time::sleep(splay).await;
            if tx
                .send(Event::Timer(TimerFired::Standalone(check.clone())))
                .await
                .is_err()
            {
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx
                    .send(Event::Timer(TimerFired::Standalone(check.clone())))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        self.timers.insert(key, task.abort_handle());
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Timer(TimerFired::Keepalive) => {
                self.keepalive.publish_once(now_epoch_secs()).await;
            }
            Event::Timer(TimerFired::Standalone(check)) => {
                let issued = now_epoch_secs();
                self.spawn_dispatch(check.duplicate_for_issue(issued));
            }
            Event::Inbound(check) => {
                self.spawn_dispatch(check);
            }
            Event::SocketPayload { transport, payload } => {
                self.metrics.record_socket_payload(transport);
                match socket::parse_payload(&payload) {
                    Ok(check) => {
                        self.publisher.publish(&self.settings.client.name, check).await;
                    }
                    Err(e) => warn!(error = %e, payload = %payload, "failed to decode socket payload"),
                }
            }
            Event::DispatchComplete(check) => {
                self.publisher.publish(&self.settings.client.name, check).await;
            }
            Event::Control(ControlEvent::Pause) => self.pause().await,
            Event::Control(ControlEvent::Resume) => self.resume().await,
            Event::Control(ControlEvent::Stop) => self.stop().await,
        }
    }

    fn spawn_dispatch(&self, request: Check) {
        let dispatcher = self.dispatcher.clone();
        let tx = self.event_tx.clone();
        let now = now_epoch_secs();
        tokio::spawn(async move {
            if let Some(result) = dispatcher.dispatch(request, now).await {
                let _ = tx.send(Event::DispatchComplete(result)).await;
            }
        });
    }

    /// Cancels every timer and unsubscribes from every pipe. Does not touch
    /// in-flight subprocesses or sockets.
    async fn pause(&mut self) {
        if matches!(self.state(), LifecycleState::Pausing | LifecycleState::Paused) {
            return;
        }
        self.set_state(LifecycleState::Pausing);
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        for subscription in self.subscriptions.drain(..) {
            self.transport.unsubscribe(subscription).await;
        }
        self.set_state(LifecycleState::Paused);
    }

    /// Polls every second until paused and the transport reports connected,
    /// then bootstraps again. This is an explicit suspension point on
    /// the event loop: nothing else is serviced while resume polls.
    async fn resume(&mut self) {
        if self.state() != LifecycleState::Paused {
            return;
        }
        loop {
            if self.transport.is_connected() {
                self.bootstrap().await;
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Pauses, waits for in-flight command executions to drain, then closes
    /// sockets and the transport.
    async fn stop(&mut self) {
        warn!("agent stopping");
        self.pause().await;
        self.set_state(LifecycleState::Stopping);
        self.in_progress.wait_until_empty().await;
        self.sockets.close_all();
        self.transport.close().await;
        self.set_state(LifecycleState::Stopped);
        info!("agent stopped");
    }
}
