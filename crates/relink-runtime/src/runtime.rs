//! Runtime facade
//!
//! [`TransportRuntime`] is the single object an application embeds. It owns
//! the worker loop that wires the connection engine, the task scheduler, the
//! reconnect policy and the background probe together, and exposes the
//! operations as plain async methods backed by a command channel.

use std::sync::Arc;

use relink_core::config::ReconnectTrigger;
use relink_core::profile::DisconnectReason;
use relink_core::{
    AppState, ConnectStatus, NetworkKind, QualityStatus, ReportStatus, Task, TransportConfig,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::ConnectionEngine;
use crate::events::{LinkEvent, StatusEvent};
use crate::monitor::ReconnectMonitor;
use crate::probe::{self, ProbeEvent};
use crate::resolver::Resolver;
use crate::scheduler::TaskScheduler;
use crate::source::EndpointSource;
use crate::traits::{AuthGate, Collaborators};

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

enum RuntimeCmd {
    StartTask {
        task: Task,
        reply: oneshot::Sender<bool>,
    },
    StopTask {
        task_id: u32,
        reply: oneshot::Sender<bool>,
    },
    HasTask {
        task_id: u32,
        reply: oneshot::Sender<bool>,
    },
    ClearTasks,
    RedoTasks,
    MakeSureConnected,
    Disconnect,
    NetworkChanged {
        kind: NetworkKind,
    },
    SetAppState {
        state: AppState,
    },
    /// Outcome of one short-link request, fed in by the embedding
    /// application's HTTP channel
    ShortLinkOutcome {
        is_error: bool,
    },
    Quality {
        reply: oneshot::Sender<QualityStatus>,
    },
    Shutdown,
}

// ----------------------------------------------------------------------------
// Facade
// ----------------------------------------------------------------------------

pub struct TransportRuntime {
    cmd_tx: mpsc::UnboundedSender<RuntimeCmd>,
    status_tx: broadcast::Sender<StatusEvent>,
    engine: Arc<ConnectionEngine>,
    worker: JoinHandle<()>,
    probe: JoinHandle<()>,
}

impl TransportRuntime {
    pub fn new(config: TransportConfig, network: NetworkKind, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let (app_state_tx, app_state_rx) = watch::channel(AppState::ForegroundFresh);
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(64);

        let resolver = Resolver::new(collaborators.resolver.clone(), config.endpoint.clone());
        let source = Arc::new(EndpointSource::new(
            (*config).clone(),
            resolver,
            app_state_rx,
        ));
        let engine = Arc::new(ConnectionEngine::new(
            config.clone(),
            source.clone(),
            collaborators.identity.clone(),
            link_tx,
        ));
        let scheduler = TaskScheduler::new(
            config.clone(),
            engine.clone(),
            source.clone(),
            collaborators.codec.clone(),
            collaborators.observer,
            collaborators.anti_avalanche.clone(),
            collaborators.auth.clone(),
            network,
        );
        let probe = probe::spawn(config.clone(), source.clone(), engine.clone(), probe_tx);

        let worker = RuntimeWorker {
            monitor: ReconnectMonitor::new(config.reconnect.clone()),
            config,
            engine: engine.clone(),
            scheduler,
            source,
            auth: collaborators.auth,
            app_state_tx,
            app_state: AppState::ForegroundFresh,
            network,
            cmd_rx,
            link_rx,
            probe_rx,
            status_tx: status_tx.clone(),
            plan: ReconnectPlan::None,
            short_tried: false,
            short_err_streak: 0,
        };
        let worker = tokio::spawn(worker.run());

        Self {
            cmd_tx,
            status_tx,
            engine,
            worker,
            probe,
        }
    }

    /// Submit a task. Returns whether it was accepted; rejected tasks have
    /// already received their terminal callback.
    pub async fn start_task(&self, task: Task) -> bool {
        self.request(|reply| RuntimeCmd::StartTask { task, reply })
            .await
    }

    /// Withdraw a task without a terminal callback. Returns whether it was
    /// still known.
    pub async fn stop_task(&self, task_id: u32) -> bool {
        self.request(|reply| RuntimeCmd::StopTask { task_id, reply })
            .await
    }

    pub async fn has_task(&self, task_id: u32) -> bool {
        self.request(|reply| RuntimeCmd::HasTask { task_id, reply })
            .await
    }

    /// Fail every queued task locally.
    pub fn clear_tasks(&self) {
        let _ = self.cmd_tx.send(RuntimeCmd::ClearTasks);
    }

    /// Tear the connection down and re-dispatch every task from scratch
    /// without spending retries.
    pub fn redo_tasks(&self) {
        let _ = self.cmd_tx.send(RuntimeCmd::RedoTasks);
    }

    pub fn make_sure_connected(&self) {
        let _ = self.cmd_tx.send(RuntimeCmd::MakeSureConnected);
    }

    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(RuntimeCmd::Disconnect);
    }

    /// The device switched networks: caches are flushed, the connection is
    /// recycled and every task is re-dispatched.
    pub fn on_network_change(&self, kind: NetworkKind) {
        let _ = self.cmd_tx.send(RuntimeCmd::NetworkChanged { kind });
    }

    pub fn set_app_state(&self, state: AppState) {
        let _ = self.cmd_tx.send(RuntimeCmd::SetAppState { state });
    }

    /// Feed one short-link outcome into the aggregate reachability report.
    pub fn note_short_link_outcome(&self, is_error: bool) {
        let _ = self.cmd_tx.send(RuntimeCmd::ShortLinkOutcome { is_error });
    }

    /// Current network-quality verdict of the estimator.
    pub async fn quality(&self) -> QualityStatus {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(RuntimeCmd::Quality { reply }).is_err() {
            return QualityStatus::Evaluating;
        }
        rx.await.unwrap_or(QualityStatus::Evaluating)
    }

    pub fn connect_status(&self) -> ConnectStatus {
        self.engine.status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCmd::Shutdown);
    }

    async fn request(&self, build: impl FnOnce(oneshot::Sender<bool>) -> RuntimeCmd) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(build(reply)).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

impl Drop for TransportRuntime {
    fn drop(&mut self) {
        self.worker.abort();
        self.probe.abort();
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// Where the reconnect machinery stands.
#[derive(Clone, Copy)]
enum ReconnectPlan {
    None,
    /// Waiting briefly before consulting the backoff table
    Evaluate { trigger: ReconnectTrigger, at: Instant },
    /// Backoff computed; connect when the deadline passes
    Armed { at: Instant },
}

impl ReconnectPlan {
    fn deadline(&self) -> Option<Instant> {
        match self {
            ReconnectPlan::None => None,
            ReconnectPlan::Evaluate { at, .. } | ReconnectPlan::Armed { at } => Some(*at),
        }
    }
}

struct RuntimeWorker {
    config: Arc<TransportConfig>,
    engine: Arc<ConnectionEngine>,
    scheduler: TaskScheduler,
    source: Arc<EndpointSource>,
    auth: Arc<dyn AuthGate>,
    monitor: ReconnectMonitor,
    app_state_tx: watch::Sender<AppState>,
    app_state: AppState,
    network: NetworkKind,
    cmd_rx: mpsc::UnboundedReceiver<RuntimeCmd>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    probe_rx: mpsc::UnboundedReceiver<ProbeEvent>,
    status_tx: broadcast::Sender<StatusEvent>,
    plan: ReconnectPlan,
    short_tried: bool,
    short_err_streak: u32,
}

impl RuntimeWorker {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.config.scheduler.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let reconnect_at = self.plan.deadline();
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(RuntimeCmd::Shutdown) => break,
                        Some(cmd) => self.handle_cmd(cmd).await,
                    }
                }
                Some(event) = self.link_rx.recv() => self.handle_link(event),
                Some(event) = self.probe_rx.recv() => self.handle_probe(event),
                _ = tick.tick() => self.scheduler.tick(),
                _ = sleep_until_opt(reconnect_at), if reconnect_at.is_some() => {
                    self.advance_plan();
                }
            }
        }

        info!("runtime shutting down");
        self.engine.shutdown();
    }

    async fn handle_cmd(&mut self, cmd: RuntimeCmd) {
        match cmd {
            RuntimeCmd::StartTask { task, reply } => {
                let accepted = self.scheduler.submit(task);
                if accepted && !matches!(self.engine.status(), ConnectStatus::Connected) {
                    self.plan_evaluate(ReconnectTrigger::TaskArrive, Instant::now());
                }
                let _ = reply.send(accepted);
            }
            RuntimeCmd::StopTask { task_id, reply } => {
                let _ = reply.send(self.scheduler.stop_task(task_id).await);
            }
            RuntimeCmd::HasTask { task_id, reply } => {
                let _ = reply.send(self.scheduler.has_task(task_id));
            }
            RuntimeCmd::ClearTasks => self.scheduler.clear_tasks(),
            RuntimeCmd::RedoTasks => {
                info!("redoing all tasks on a fresh connection");
                self.scheduler.redo_all();
                self.engine.disconnect(DisconnectReason::Reset);
                self.engine.ensure_connected();
            }
            RuntimeCmd::MakeSureConnected => self.engine.ensure_connected(),
            RuntimeCmd::Disconnect => self.engine.disconnect(DisconnectReason::Requested),
            RuntimeCmd::NetworkChanged { kind } => self.handle_network_change(kind),
            RuntimeCmd::SetAppState { state } => {
                let woke = state.is_foreground() && !self.app_state.is_foreground();
                self.app_state = state;
                let _ = self.app_state_tx.send(state);
                // coming back to the foreground retries a parked reconnect
                // right away
                if woke
                    && self.scheduler.wants_connection()
                    && !matches!(self.engine.status(), ConnectStatus::Connected)
                {
                    self.plan_evaluate(ReconnectTrigger::TaskArrive, Instant::now());
                }
            }
            RuntimeCmd::ShortLinkOutcome { is_error } => {
                self.short_tried = true;
                if is_error {
                    self.short_err_streak += 1;
                } else {
                    self.short_err_streak = 0;
                }
                self.publish_report();
            }
            RuntimeCmd::Quality { reply } => {
                let _ = reply.send(self.scheduler.quality());
            }
            RuntimeCmd::Shutdown => unreachable!("handled by the loop"),
        }
    }

    fn handle_network_change(&mut self, kind: NetworkKind) {
        info!(?kind, "network changed");
        self.network = kind;
        self.source.clear_cache();
        self.scheduler.on_network_change(kind);
        self.engine.disconnect(DisconnectReason::NetworkChange);
        if kind.is_available() {
            self.plan_evaluate(ReconnectTrigger::NetworkChange, Instant::now());
        } else {
            self.plan = ReconnectPlan::None;
        }
        self.short_tried = false;
        self.short_err_streak = 0;
    }

    fn handle_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::StatusChanged(status) => {
                debug!(?status, "connection status changed");
                let _ = self.status_tx.send(StatusEvent::Connect(status));
                if status == ConnectStatus::Connected {
                    self.short_err_streak = 0;
                    self.plan = ReconnectPlan::None;
                }
                if matches!(
                    status,
                    ConnectStatus::Disconnected | ConnectStatus::ConnectFailed
                ) && (self.scheduler.wants_connection() || self.app_state.is_active())
                {
                    self.plan_evaluate(
                        ReconnectTrigger::StatusDriven,
                        Instant::now() + self.monitor.reevaluate_delay(),
                    );
                }
                self.publish_report();
            }
            LinkEvent::Sent { task_id } => self.scheduler.on_sent(task_id),
            LinkEvent::Receiving { task_id, received } => {
                self.scheduler.on_receiving(task_id, received)
            }
            LinkEvent::Response(frame) => self.scheduler.on_response(frame),
            LinkEvent::Broken { class, code } => {
                warn!(?class, code, "link broken");
                self.scheduler.on_broken(class, code);
            }
        }
    }

    /// A probe validated a primary endpoint: lift its ban and cut the
    /// degraded connection over to it.
    fn handle_probe(&mut self, event: ProbeEvent) {
        info!(ip = %event.ip, port = event.port, "cutting over to a probed endpoint");
        self.source.unban(event.ip, event.port);
        self.engine.disconnect(DisconnectReason::ProbeCutover);
        self.engine.ensure_connected();
    }

    // ------------------------------------------------------------------
    // Reconnect planning
    // ------------------------------------------------------------------

    fn plan_evaluate(&mut self, trigger: ReconnectTrigger, at: Instant) {
        // never push an already-armed earlier deadline back
        if self.plan.deadline().is_some_and(|existing| existing <= at) {
            return;
        }
        self.plan = ReconnectPlan::Evaluate { trigger, at };
    }

    fn advance_plan(&mut self) {
        match self.plan {
            ReconnectPlan::None => {}
            ReconnectPlan::Evaluate { trigger, .. } => {
                let delay = self.monitor.delay_for(
                    trigger,
                    self.app_state,
                    self.network,
                    self.auth.has_account(),
                );
                // backoff measured from the last resolution, not from now
                let anchor = self
                    .source
                    .last_dns_time()
                    .map(Instant::from_std)
                    .unwrap_or_else(Instant::now);
                let deadline = anchor + delay;
                if deadline <= Instant::now() {
                    debug!(?trigger, "reconnect interval already served");
                    self.plan = ReconnectPlan::None;
                    self.engine.ensure_connected();
                } else {
                    debug!(?trigger, wait_ms = delay.as_millis() as u64, "reconnect armed");
                    self.plan = ReconnectPlan::Armed { at: deadline };
                }
            }
            ReconnectPlan::Armed { .. } => {
                self.plan = ReconnectPlan::None;
                self.engine.ensure_connected();
            }
        }
    }

    // ------------------------------------------------------------------
    // Aggregate reachability
    // ------------------------------------------------------------------

    fn publish_report(&self) {
        if let Some((overall, longlink)) = aggregate_status(
            self.engine.status(),
            self.short_tried,
            self.short_err_streak,
            self.config.status_fail_streak,
        ) {
            let _ = self
                .status_tx
                .send(StatusEvent::Report { overall, longlink });
        }
    }
}

/// Derive the `(overall, longlink)` reachability pair, or `None` when the
/// current state is not worth reporting.
fn aggregate_status(
    long: ConnectStatus,
    short_tried: bool,
    short_err_streak: u32,
    streak_cap: u32,
) -> Option<(ReportStatus, ReportStatus)> {
    let long_report = match long {
        ConnectStatus::Connected => return Some((ReportStatus::Connected, ReportStatus::Connected)),
        // an ordinary disconnect says nothing about reachability
        ConnectStatus::Disconnected | ConnectStatus::Idle => return None,
        ConnectStatus::Connecting | ConnectStatus::Verifying => ReportStatus::Connecting,
        ConnectStatus::ConnectFailed => ReportStatus::ServerFailed,
    };

    // while the long link is unsettled, let recent short-link traffic decide
    // the overall verdict
    let overall = if !short_tried {
        long_report
    } else if short_err_streak >= streak_cap {
        ReportStatus::ServerFailed
    } else if short_err_streak == 0 {
        ReportStatus::Connected
    } else {
        ReportStatus::NetworkUnknown
    };

    Some((overall, long_report))
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_long_link_dominates_the_report() {
        assert_eq!(
            aggregate_status(ConnectStatus::Connected, true, 99, 3),
            Some((ReportStatus::Connected, ReportStatus::Connected))
        );
    }

    #[test]
    fn plain_disconnect_is_not_reported() {
        assert_eq!(aggregate_status(ConnectStatus::Disconnected, true, 1, 3), None);
        assert_eq!(aggregate_status(ConnectStatus::Idle, false, 0, 3), None);
    }

    #[test]
    fn short_link_streak_decides_while_connecting() {
        // no short traffic yet: mirror the long link
        assert_eq!(
            aggregate_status(ConnectStatus::Connecting, false, 0, 3),
            Some((ReportStatus::Connecting, ReportStatus::Connecting))
        );
        // clean short link
        assert_eq!(
            aggregate_status(ConnectStatus::Connecting, true, 0, 3),
            Some((ReportStatus::Connected, ReportStatus::Connecting))
        );
        // some errors, below the streak cap
        assert_eq!(
            aggregate_status(ConnectStatus::Connecting, true, 2, 3),
            Some((ReportStatus::NetworkUnknown, ReportStatus::Connecting))
        );
        // streak at the cap
        assert_eq!(
            aggregate_status(ConnectStatus::Connecting, true, 3, 3),
            Some((ReportStatus::ServerFailed, ReportStatus::Connecting))
        );
    }

    #[test]
    fn connect_failed_maps_to_server_failed() {
        assert_eq!(
            aggregate_status(ConnectStatus::ConnectFailed, false, 0, 3),
            Some((ReportStatus::ServerFailed, ReportStatus::ServerFailed))
        );
        assert_eq!(
            aggregate_status(ConnectStatus::ConnectFailed, true, 0, 3),
            Some((ReportStatus::Connected, ReportStatus::ServerFailed))
        );
    }
}
