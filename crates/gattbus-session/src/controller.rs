use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gattbus_frame::to_hex;
use gattbus_link::{BackendFactory, DeviceHandle, GattLink, LinkEvent};
use gattbus_protocol::{
    build_write_transactions, decode_status, power_transaction, run_mode_transaction,
    update_mirror, DeviceSettings, DeviceStatusSnapshot, GroupId, ProtocolMirror, RunMode,
    WriteTransaction,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::exchange::{Exchange, ExchangeError, ReadReply};
use crate::health::{HealthMonitor, HealthReport, ReconnectReason};
use crate::log::{LogChannel, LogEvent, LogLevel, LogSink, TracingSink};
use crate::phase::SessionPhase;
use crate::schedule::Schedule;

/// A write transaction that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub title: &'static str,
    pub error: SessionError,
}

/// Pass/fail report for one or more write transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Titles of the transactions that were verified and committed, in order.
    pub applied: Vec<&'static str>,
    /// The transaction that stopped the sequence, if any.
    pub failed: Option<WriteFailure>,
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }

    /// Human-readable failure reason.
    pub fn reason(&self) -> Option<String> {
        self.failed
            .as_ref()
            .map(|failure| format!("{}: {}", failure.title, failure.error))
    }
}

/// Drives one device session: connection, polling, writes and recovery.
///
/// Cheap to clone. Dropping the last clone cancels every background task
/// and closes the link.
#[derive(Clone)]
pub struct SessionController {
    handle: Arc<Handle>,
}

struct Handle {
    inner: Arc<Inner>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

struct Inner {
    config: SessionConfig,
    factory: Arc<dyn BackendFactory>,
    sink: Arc<dyn LogSink>,
    state: Mutex<SessionState>,
    phase: watch::Sender<SessionPhase>,
    io: tokio::sync::Mutex<IoState>,
    connect_lock: tokio::sync::Mutex<()>,
    bulk_lock: tokio::sync::Mutex<()>,
    writing: AtomicUsize,
}

struct SessionState {
    device: Option<DeviceHandle>,
    snapshot: Option<DeviceStatusSnapshot>,
    mirror: ProtocolMirror,
    device_info: Option<Vec<u16>>,
    last_error: Option<SessionError>,
    user_disconnect: bool,
    /// Cancelled whenever the session is torn down or superseded.
    episode: CancellationToken,
}

struct IoState {
    link: Option<GattLink>,
    health: HealthMonitor,
    schedule: Schedule,
}

impl SessionController {
    /// Create a controller that logs through `tracing`.
    pub fn new(factory: Arc<dyn BackendFactory>, config: SessionConfig) -> Result<Self> {
        Self::with_sink(factory, config, Arc::new(TracingSink))
    }

    /// Create a controller that delivers log events to `sink`.
    pub fn with_sink(
        factory: Arc<dyn BackendFactory>,
        config: SessionConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        config.validate()?;
        let (phase, _) = watch::channel(SessionPhase::Idle);
        let io = IoState {
            link: None,
            health: HealthMonitor::new(&config),
            schedule: Schedule::seeded(Instant::now(), &config),
        };
        let inner = Inner {
            factory,
            sink,
            state: Mutex::new(SessionState {
                device: None,
                snapshot: None,
                mirror: ProtocolMirror::default(),
                device_info: None,
                last_error: None,
                user_disconnect: false,
                episode: CancellationToken::new(),
            }),
            phase,
            io: tokio::sync::Mutex::new(io),
            connect_lock: tokio::sync::Mutex::new(()),
            bulk_lock: tokio::sync::Mutex::new(()),
            writing: AtomicUsize::new(0),
            config,
        };
        Ok(Self {
            handle: Arc::new(Handle {
                inner: Arc::new(inner),
            }),
        })
    }

    /// Connect to `device`, retrying per the configured backoff.
    ///
    /// Supersedes any running session or pending reconnection. On success
    /// the session is `SessionReady` and polling has started.
    pub async fn connect(&self, device: DeviceHandle) -> Result<()> {
        let inner = &self.handle.inner;
        let episode = inner.begin_episode();
        inner.establish(device, episode).await
    }

    /// Tear the session down and suppress automatic reconnection until the
    /// next [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        self.handle.inner.disconnect().await;
    }

    /// Power the device on or off.
    pub async fn set_power(&self, on: bool) -> Result<WriteOutcome> {
        self.handle
            .inner
            .run_transactions(vec![power_transaction(on)])
            .await
    }

    /// Change run mode and level.
    pub async fn set_run_mode(&self, mode: RunMode, level: u16) -> Result<WriteOutcome> {
        let tx = run_mode_transaction(mode, level)?;
        self.handle.inner.run_transactions(vec![tx]).await
    }

    /// Write every setting in the fixed transaction order, stopping at the
    /// first failure.
    ///
    /// Returns [`SessionError::Busy`] if another bulk apply is running.
    pub async fn apply_all_settings(&self, settings: &DeviceSettings) -> Result<WriteOutcome> {
        let inner = &self.handle.inner;
        let _bulk = inner
            .bulk_lock
            .try_lock()
            .map_err(|_| SessionError::Busy("apply all settings"))?;
        let transactions = build_write_transactions(settings)?;
        inner.run_transactions(transactions).await
    }

    pub fn phase(&self) -> SessionPhase {
        *self.handle.inner.phase.borrow()
    }

    /// Observe phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.handle.inner.phase.subscribe()
    }

    /// Latest decoded status poll.
    pub fn snapshot(&self) -> Option<DeviceStatusSnapshot> {
        self.handle.inner.lock_state().snapshot.clone()
    }

    pub fn mirror(&self) -> ProtocolMirror {
        self.handle.inner.lock_state().mirror.clone()
    }

    /// Registers of the slow informational group, once read.
    pub fn device_info(&self) -> Option<Vec<u16>> {
        self.handle.inner.lock_state().device_info.clone()
    }

    pub fn device(&self) -> Option<DeviceHandle> {
        self.handle.inner.lock_state().device.clone()
    }

    /// The most recent session-level failure.
    pub fn last_error(&self) -> Option<SessionError> {
        self.handle.inner.lock_state().last_error.clone()
    }

    pub async fn health(&self) -> HealthReport {
        self.handle.inner.io.lock().await.health.report()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.handle.inner.config
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("phase", &self.phase())
            .field("device", &self.device())
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, level: LogLevel, channel: LogChannel, message: impl Into<String>) {
        self.sink.emit(LogEvent::new(level, channel, message));
    }

    fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, next: SessionPhase) {
        let previous = self.phase.send_replace(next);
        if previous != next {
            self.log(
                LogLevel::Info,
                LogChannel::Session,
                format!("phase {previous} -> {next}"),
            );
        }
    }

    /// Move the phase only while `episode` is still current.
    fn set_phase_in(&self, episode: &CancellationToken, next: SessionPhase) {
        if !episode.is_cancelled() {
            self.set_phase(next);
        }
    }

    /// Replace `from` with `to` atomically; anything else is left alone.
    fn swap_phase(&self, from: SessionPhase, to: SessionPhase) {
        let changed = self.phase.send_if_modified(|phase| {
            if *phase == from {
                *phase = to;
                true
            } else {
                false
            }
        });
        if changed {
            self.log(
                LogLevel::Info,
                LogChannel::Session,
                format!("phase {from} -> {to}"),
            );
        }
    }

    fn current_episode(&self) -> CancellationToken {
        self.lock_state().episode.clone()
    }

    /// Cancel whatever is running and start a caller-driven episode.
    fn begin_episode(&self) -> CancellationToken {
        let mut state = self.lock_state();
        state.episode.cancel();
        state.episode = CancellationToken::new();
        state.user_disconnect = false;
        state.last_error = None;
        state.episode.clone()
    }

    fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            state.user_disconnect = true;
            state.episode.cancel();
        }
        if let Ok(mut io) = self.io.try_lock() {
            if let Some(link) = io.link.take() {
                link.close();
            }
        }
    }

    async fn establish(self: &Arc<Self>, device: DeviceHandle, episode: CancellationToken) -> Result<()> {
        let _connecting = tokio::select! {
            guard = self.connect_lock.lock() => guard,
            _ = episode.cancelled() => return Err(SessionError::Cancelled),
        };
        self.lock_state().device = Some(device.clone());
        self.release_link().await;

        let attempts = self.config.connect_attempts;
        let mut last_error = SessionError::TransportUnavailable("no attempt made".to_string());
        for attempt in 0..attempts {
            let delay = self.config.backoff_before(attempt as usize);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = episode.cancelled() => return Err(SessionError::Cancelled),
                }
            }

            self.set_phase_in(&episode, SessionPhase::Connecting);
            self.log(
                LogLevel::Info,
                LogChannel::Session,
                format!("connecting to {device} (attempt {}/{attempts})", attempt + 1),
            );
            match self.attempt(&device, &episode).await {
                Ok(events) => {
                    if episode.is_cancelled() {
                        // The link was installed before the cancel landed.
                        self.release_link().await;
                        return Err(SessionError::Cancelled);
                    }
                    self.set_phase(SessionPhase::SessionReady);
                    self.spawn_poll_loop(episode.clone());
                    self.spawn_link_watch(events, episode);
                    return Ok(());
                }
                Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                Err(err) => {
                    self.log(
                        LogLevel::Warn,
                        LogChannel::Session,
                        format!("attempt {} failed: {err}", attempt + 1),
                    );
                    last_error = err;
                }
            }
        }

        if episode.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        self.lock_state().last_error = Some(last_error.clone());
        self.set_phase(SessionPhase::Disconnected);
        Err(last_error)
    }

    /// One connection attempt on a fresh link.
    async fn attempt(
        &self,
        device: &DeviceHandle,
        episode: &CancellationToken,
    ) -> Result<broadcast::Receiver<LinkEvent>> {
        let link = GattLink::open(self.factory.as_ref(), device)?;
        let brought_up = tokio::select! {
            result = self.bring_up(&link) => result,
            _ = episode.cancelled() => Err(SessionError::Cancelled),
        };
        match brought_up {
            Ok(events) => {
                self.initialize(link, episode).await?;
                Ok(events)
            }
            Err(err) => {
                link.close();
                Err(err)
            }
        }
    }

    async fn bring_up(&self, link: &GattLink) -> Result<broadcast::Receiver<LinkEvent>> {
        let config = &self.config;
        link.connect(config.connect_timeout).await?;
        link.discover_services(config.discovery_timeout).await?;
        let granted = link
            .negotiate_link_budget(config.link_budget, config.mtu_timeout)
            .await?;
        if granted != config.link_budget {
            return Err(SessionError::ProtocolMismatch(format!(
                "link budget {granted}, expected {}",
                config.link_budget
            )));
        }
        let events = link.subscribe();
        link.set_notifications_enabled(true, config.notify_timeout)
            .await?;
        Ok(events)
    }

    /// Install `link` and run the initial read round.
    async fn initialize(&self, link: GattLink, episode: &CancellationToken) -> Result<()> {
        self.set_phase_in(episode, SessionPhase::Initializing);
        let mut guard = tokio::select! {
            guard = self.io.lock() => guard,
            _ = episode.cancelled() => {
                link.close();
                return Err(SessionError::Cancelled);
            }
        };
        let io = &mut *guard;
        io.health.reset();
        io.link = Some(link);

        let window = self.config.initial_read_window;
        let result = match tokio::time::timeout(window, self.initial_round(io, episode)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::InitializationIncomplete(format!(
                "initial read round exceeded {window:?}"
            ))),
        };

        let result = result.and_then(|()| {
            if episode.is_cancelled() {
                Err(SessionError::Cancelled)
            } else {
                Ok(())
            }
        });
        match result {
            Ok(()) => {
                io.schedule = Schedule::seeded(Instant::now(), &self.config);
                Ok(())
            }
            Err(err) => {
                if let Some(link) = io.link.take() {
                    link.close();
                }
                io.health.reset();
                Err(err)
            }
        }
    }

    async fn initial_round(&self, io: &mut IoState, episode: &CancellationToken) -> Result<()> {
        let link = io.link.as_ref().ok_or(SessionError::NotConnected)?;
        let mut exchange = Exchange {
            link,
            health: &mut io.health,
            sink: self.sink.as_ref(),
            timeout: self.config.exchange_timeout,
            cancel: episode,
        };

        for group in GroupId::ALL {
            match exchange.read(LogChannel::Session, group).await {
                Ok(reply) => {
                    if let Some(reason) = self.absorb(group, &reply, exchange.health) {
                        return Err(reason.into());
                    }
                }
                Err(ExchangeError::Cancelled) => return Err(SessionError::Cancelled),
                Err(err) if group.is_optional() => {
                    let err = err.into_session_error(group.name(), exchange.timeout);
                    self.log(
                        LogLevel::Warn,
                        LogChannel::Session,
                        format!("optional group {group} unavailable: {err}"),
                    );
                }
                Err(err) => {
                    let err = err.into_session_error(group.name(), exchange.timeout);
                    return Err(SessionError::InitializationIncomplete(format!("{group}: {err}")));
                }
            }
        }
        Ok(())
    }

    /// Fold a successful read into session state.
    fn absorb(
        &self,
        group: GroupId,
        reply: &ReadReply,
        health: &mut HealthMonitor,
    ) -> Option<ReconnectReason> {
        match group {
            GroupId::Status => match decode_status(&reply.registers, &to_hex(&reply.raw)) {
                Ok(snapshot) => {
                    let verdict = health.record_status(&snapshot);
                    self.lock_state().snapshot = Some(snapshot);
                    verdict
                }
                Err(err) => {
                    self.log(LogLevel::Warn, LogChannel::Poll, format!("status: {err}"));
                    None
                }
            },
            GroupId::DeviceInfo => {
                self.lock_state().device_info = Some(reply.registers.clone());
                None
            }
            mirrored => {
                if mirrored == GroupId::ConfigBlock && health.is_desynced() {
                    health.clear_desync();
                    self.log(LogLevel::Info, LogChannel::Health, "desync cleared");
                }
                let mut state = self.lock_state();
                state.mirror = update_mirror(&state.mirror, mirrored, &reply.registers);
                None
            }
        }
    }

    fn spawn_poll_loop(self: &Arc<Self>, episode: CancellationToken) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.poll_loop(episode).await });
    }

    async fn poll_loop(self: Arc<Self>, episode: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = episode.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.phase().is_polling() {
                continue;
            }
            if let Some(reason) = self.poll_once(&episode).await {
                self.request_reconnect(reason, &episode);
                break;
            }
        }
        debug!("polling loop stopped");
    }

    /// One scheduler tick: watchdog, then at most one group read.
    async fn poll_once(&self, episode: &CancellationToken) -> Option<ReconnectReason> {
        let mut guard = tokio::select! {
            guard = self.io.lock() => guard,
            _ = episode.cancelled() => return None,
        };
        let io = &mut *guard;
        let link = io.link.as_ref()?;
        let now = Instant::now();

        if io.health.silence_exceeded(now, self.config.watchdog_silence) {
            self.log(
                LogLevel::Warn,
                LogChannel::Health,
                "notifications silent, resubscribing",
            );
            let resubscribed = tokio::select! {
                result = link.set_notifications_enabled(true, self.config.notify_timeout) => result,
                _ = episode.cancelled() => return None,
            };
            return match resubscribed {
                Ok(()) => {
                    io.health.touch(Instant::now());
                    None
                }
                Err(err) => {
                    self.log(
                        LogLevel::Warn,
                        LogChannel::Health,
                        format!("resubscribe failed: {err}"),
                    );
                    Some(ReconnectReason::Silence)
                }
            };
        }

        let degraded = self.writing.load(Ordering::SeqCst) > 0;
        let group = io.schedule.select(now, degraded, io.health.is_desynced())?;
        io.schedule.reschedule(group, now, degraded);

        let mut exchange = Exchange {
            link,
            health: &mut io.health,
            sink: self.sink.as_ref(),
            timeout: self.config.exchange_timeout,
            cancel: episode,
        };
        match exchange.read(LogChannel::Poll, group).await {
            Ok(reply) => self.absorb(group, &reply, &mut io.health),
            Err(ExchangeError::Timeout) => {
                if group.is_single_register() && !io.health.is_desynced() {
                    io.health.mark_desync();
                    self.log(
                        LogLevel::Warn,
                        LogChannel::Health,
                        format!("{group} timed out, suspending single-register groups"),
                    );
                } else {
                    self.log(LogLevel::Debug, LogChannel::Poll, format!("{group} timed out"));
                }
                None
            }
            Err(ExchangeError::Unhealthy(reason)) => Some(reason),
            Err(ExchangeError::Cancelled) => None,
            Err(ExchangeError::Link(err)) => {
                self.log(LogLevel::Warn, LogChannel::Poll, format!("{group}: {err}"));
                None
            }
        }
    }

    fn spawn_link_watch(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<LinkEvent>,
        episode: CancellationToken,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = episode.cancelled() => return,
                    event = events.recv() => event,
                };
                match event {
                    Ok(LinkEvent::Dropped { status }) => {
                        inner.request_reconnect(ReconnectReason::LinkDropped { status }, &episode);
                        return;
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return,
                }
            }
        });
    }

    /// Tear down the current episode and reconnect to the same device after
    /// the configured delay.
    ///
    /// Ignored if `origin` is no longer the current episode or the caller
    /// has disconnected.
    fn request_reconnect(self: &Arc<Self>, reason: ReconnectReason, origin: &CancellationToken) {
        let (device, episode) = {
            let mut state = self.lock_state();
            if state.user_disconnect || origin.is_cancelled() {
                drop(state);
                self.log(
                    LogLevel::Debug,
                    LogChannel::Session,
                    format!("ignoring reconnect trigger: {reason}"),
                );
                return;
            }
            let Some(device) = state.device.clone() else {
                return;
            };
            state.episode.cancel();
            state.episode = CancellationToken::new();
            state.last_error = Some(reason.into());
            (device, state.episode.clone())
        };

        self.log(
            LogLevel::Warn,
            LogChannel::Session,
            format!("reconnecting: {reason}"),
        );
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.reconnect(device, episode).await });
    }

    async fn reconnect(self: Arc<Self>, device: DeviceHandle, episode: CancellationToken) {
        self.release_link().await;
        self.set_phase_in(&episode, SessionPhase::Disconnected);
        tokio::select! {
            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            _ = episode.cancelled() => return,
        }
        if let Err(err) = self.establish(device, episode).await {
            debug!(error = %err, "reconnect gave up");
        }
    }

    /// Close the current link without the polite disconnect sequence.
    async fn release_link(&self) {
        let mut io = self.io.lock().await;
        if let Some(link) = io.link.take() {
            link.close();
        }
        io.health.reset();
    }

    async fn disconnect(&self) {
        {
            let mut state = self.lock_state();
            state.user_disconnect = true;
            state.episode.cancel();
        }
        self.set_phase(SessionPhase::SessionClosing);

        // Wait for any connection attempt to unwind.
        let _connecting = self.connect_lock.lock().await;
        let link = {
            let mut io = self.io.lock().await;
            io.health.reset();
            io.link.take()
        };
        if let Some(link) = link {
            let config = &self.config;
            if let Err(err) = link
                .set_notifications_enabled(false, config.notify_timeout)
                .await
            {
                debug!(error = %err, "disable notifications failed");
            }
            if let Err(err) = link.disconnect(config.disconnect_timeout).await {
                debug!(error = %err, "link disconnect failed");
            }
            link.close();
        }

        {
            let mut state = self.lock_state();
            state.snapshot = None;
            state.mirror = ProtocolMirror::default();
            state.device_info = None;
        }
        self.set_phase(SessionPhase::Disconnected);
    }

    async fn run_transactions(
        self: &Arc<Self>,
        transactions: Vec<WriteTransaction>,
    ) -> Result<WriteOutcome> {
        let episode = self.current_episode();
        if episode.is_cancelled() || !self.phase().is_polling() {
            return Err(SessionError::NotConnected);
        }

        let _writing = WriteGuard::enter(self);
        let per_transaction = self.config.transaction_timeout;
        let deadline = Instant::now() + per_transaction * transactions.len() as u32;
        let mut outcome = WriteOutcome::default();

        for tx in &transactions {
            let tx_deadline = deadline.min(Instant::now() + per_transaction);
            let result =
                match tokio::time::timeout_at(tx_deadline, self.execute(tx, &episode)).await {
                    Ok(result) => result,
                    Err(_) => Err(SessionError::TransportTimeout(format!(
                        "{} exceeded its time budget",
                        tx.title
                    ))),
                };
            match result {
                Ok(()) => {
                    self.log(
                        LogLevel::Info,
                        LogChannel::Write,
                        format!("{} verified", tx.title),
                    );
                    outcome.applied.push(tx.title);
                }
                Err(error) => {
                    self.log(
                        LogLevel::Warn,
                        LogChannel::Write,
                        format!("{} failed: {error}", tx.title),
                    );
                    outcome.failed = Some(WriteFailure {
                        title: tx.title,
                        error,
                    });
                    break;
                }
            }
        }
        Ok(outcome)
    }

    /// write -> ack -> read back -> check -> commit, under one I/O lock.
    async fn execute(self: &Arc<Self>, tx: &WriteTransaction, episode: &CancellationToken) -> Result<()> {
        let mut guard = tokio::select! {
            guard = self.io.lock() => guard,
            _ = episode.cancelled() => return Err(SessionError::Cancelled),
        };
        let io = &mut *guard;
        let link = io.link.as_ref().ok_or(SessionError::NotConnected)?;
        let mut exchange = Exchange {
            link,
            health: &mut io.health,
            sink: self.sink.as_ref(),
            timeout: self.config.exchange_timeout,
            cancel: episode,
        };

        if let Err(err) = exchange.write(tx).await {
            return Err(self.exchange_failed(err, &format!("{} ack", tx.title), episode));
        }
        let reply = match exchange.read(LogChannel::Write, tx.readback).await {
            Ok(reply) => reply,
            Err(err) => {
                return Err(self.exchange_failed(
                    err,
                    &format!("{} read-back", tx.title),
                    episode,
                ))
            }
        };
        if tx.readback == GroupId::ConfigBlock {
            exchange.health.clear_desync();
        }

        if !tx.verify(&reply.registers) {
            return Err(SessionError::ValidationFailed(format!(
                "{}: expected {:04X?} at offset {}, read back {:04X?}",
                tx.title, tx.check.expected, tx.check.offset, reply.registers
            )));
        }

        let mut state = self.lock_state();
        state.mirror = tx.commit(&state.mirror, &reply.registers);
        Ok(())
    }

    fn exchange_failed(
        self: &Arc<Self>,
        err: ExchangeError,
        what: &str,
        episode: &CancellationToken,
    ) -> SessionError {
        if let ExchangeError::Unhealthy(reason) = &err {
            self.request_reconnect(*reason, episode);
        }
        err.into_session_error(what, self.config.exchange_timeout)
    }
}

/// Marks the transport as held by writes for the guard's lifetime.
struct WriteGuard<'a> {
    inner: &'a Inner,
}

impl<'a> WriteGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        if inner.writing.fetch_add(1, Ordering::SeqCst) == 0 {
            inner.swap_phase(SessionPhase::SessionReady, SessionPhase::OptionalWrite);
        }
        Self { inner }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if self.inner.writing.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner
                .swap_phase(SessionPhase::OptionalWrite, SessionPhase::SessionReady);
        }
    }
}
