//! Task scheduler
//!
//! Owns every submitted task from intake to its terminal callback. The
//! runtime loop drives it with a periodic tick and with link events from the
//! connection engine; the scheduler decides dispatch order, computes the
//! per-attempt timeouts, spends retry budgets and delivers exactly one
//! terminal callback per task.

use std::sync::Arc;
use std::time::Instant;

use relink_core::errors::{codes, ErrClass, FailHandle};
use relink_core::frame::Frame;
use relink_core::profile::{DisconnectReason, TaskProfile, TransferProfile};
use relink_core::timeout::{first_pkg_timeout, read_write_timeout};
use relink_core::{
    ConnectStatus, NetQualityEstimator, NetworkKind, QualityStatus, Task, TaskDisposition,
    TransportConfig,
};
use tracing::{debug, info, warn};

use crate::connection::ConnectionEngine;
use crate::source::EndpointSource;
use crate::traits::{AntiAvalanche, AuthGate, TaskCodec, TaskObserver};

/// Push frames carry this task id: they belong to no scheduled task.
const PUSH_TASK_ID: u32 = 0;

pub(crate) struct TaskScheduler {
    config: Arc<TransportConfig>,
    engine: Arc<ConnectionEngine>,
    source: Arc<EndpointSource>,
    codec: Arc<dyn TaskCodec>,
    observer: Arc<dyn TaskObserver>,
    anti_avalanche: Arc<dyn AntiAvalanche>,
    auth: Arc<dyn AuthGate>,
    estimator: NetQualityEstimator,
    tasks: Vec<TaskProfile>,
    seq: u64,
    network: NetworkKind,
    /// Terminal failures since the last success, across all tasks
    continuous_fail_count: u32,
}

impl TaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<TransportConfig>,
        engine: Arc<ConnectionEngine>,
        source: Arc<EndpointSource>,
        codec: Arc<dyn TaskCodec>,
        observer: Arc<dyn TaskObserver>,
        anti_avalanche: Arc<dyn AntiAvalanche>,
        auth: Arc<dyn AuthGate>,
        network: NetworkKind,
    ) -> Self {
        Self {
            estimator: NetQualityEstimator::new(config.estimator.clone()),
            config,
            engine,
            source,
            codec,
            observer,
            anti_avalanche,
            auth,
            tasks: Vec::new(),
            seq: 0,
            network,
            continuous_fail_count: 0,
        }
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Validate and queue a task. Violations deliver the terminal callback
    /// immediately and return false.
    pub fn submit(&mut self, task: Task) -> bool {
        if self.tasks.iter().any(|p| p.task.task_id == task.task_id) {
            warn!(task_id = task.task_id, "duplicate task id rejected");
            return false;
        }

        let caps = &self.config.scheduler;
        if task.retry_count > caps.max_retry_count
            || task.total_timeout > caps.max_total_timeout
            || task.server_process_cost > caps.max_server_cost
        {
            warn!(task_id = task.task_id, "task parameters exceed caps");
            self.observer
                .on_task_terminal(task.task_id, ErrClass::Local, codes::local::TASK_PARAM);
            return false;
        }

        if task.network_status_sensitive && !self.network.is_available() {
            self.observer
                .on_task_terminal(task.task_id, ErrClass::Local, codes::local::NO_NET);
            return false;
        }

        debug!(
            task_id = task.task_id,
            cmd_id = task.cmd_id,
            priority = task.priority.0,
            "task queued"
        );
        self.tasks.push(TaskProfile::new(
            task,
            caps.default_retry_count,
            self.seq,
        ));
        self.seq += 1;
        true
    }

    pub fn has_task(&self, task_id: u32) -> bool {
        self.tasks.iter().any(|p| p.task.task_id == task_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Any task waiting for a connection to be dispatched on.
    pub fn wants_connection(&self) -> bool {
        self.tasks.iter().any(|p| !p.running)
    }

    pub fn quality(&self) -> QualityStatus {
        self.estimator.status()
    }

    pub fn continuous_fail_count(&self) -> u32 {
        self.continuous_fail_count
    }

    /// Remove a task without a terminal callback. Also withdraws its buffer
    /// from the engine when it has not hit the wire yet.
    pub async fn stop_task(&mut self, task_id: u32) -> bool {
        let Some(pos) = self.tasks.iter().position(|p| p.task.task_id == task_id) else {
            return false;
        };
        let profile = self.tasks.remove(pos);
        if profile.running {
            self.engine.stop(task_id).await;
        }
        info!(task_id, "task stopped");
        true
    }

    /// Fail every queued task with the cleared-locally code.
    pub fn clear_tasks(&mut self) {
        let cleared: Vec<u32> = self.tasks.iter().map(|p| p.task.task_id).collect();
        self.tasks.clear();
        for task_id in cleared {
            self.observer
                .on_task_terminal(task_id, ErrClass::Local, codes::local::CLEAR);
        }
    }

    /// Return every task to the not-yet-dispatched state without spending
    /// retries. Used around forced reconnects.
    pub fn redo_all(&mut self) {
        for profile in &mut self.tasks {
            profile.reset_for_retry();
            profile.retry_after = None;
        }
    }

    /// Network switch: the estimator's history is about a path that no
    /// longer exists.
    pub fn on_network_change(&mut self, kind: NetworkKind) {
        self.network = kind;
        self.estimator.reset_status();
        self.redo_all();
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.scan_transfer_timeouts(now);
        self.scan_task_deadlines(now);
        self.dispatch(now);
    }

    /// First-package / package-package / read-write timeouts on running
    /// tasks. Any hit is a connection-level event: the expired task fails as
    /// a retryable attempt, every other running task is batch-failed and the
    /// engine is told to disconnect.
    fn scan_transfer_timeouts(&mut self, now: Instant) {
        let pkg_pkg = self.config.timeouts.params(self.network).pkg_pkg_interval;

        let mut hit = None;
        for (index, profile) in self.tasks.iter().enumerate() {
            if !profile.running {
                continue;
            }
            let Some(start) = profile.transfer.start_send else {
                continue;
            };
            let transfer = &profile.transfer;
            let code = if transfer.received_len == 0
                && now >= start + transfer.first_pkg_timeout
            {
                Some(codes::timeout::FIRST_PKG)
            } else if transfer.received_len > 0
                && transfer.last_receive.is_some_and(|at| now >= at + pkg_pkg)
            {
                Some(codes::timeout::PKG_PKG)
            } else if now >= start + transfer.read_write_timeout {
                Some(codes::timeout::READ_WRITE)
            } else {
                None
            };
            if let Some(code) = code {
                hit = Some((index, code));
                break;
            }
        }

        if let Some((index, code)) = hit {
            let task_id = self.tasks[index].task.task_id;
            warn!(task_id, code, "transfer timeout, recycling the connection");
            self.estimator.record_failure();
            self.single_fail(index, ErrClass::Protocol, code, FailHandle::Default, now);
            self.batch_fail_running(ErrClass::Protocol, code, now);
            self.engine
                .disconnect(DisconnectReason::Fatal(ErrClass::Protocol, code));
        }
    }

    /// Tasks whose own total deadline expired are terminal regardless of
    /// retry budget. An expired deadline also means the link sat on a
    /// request for its whole lifetime, so everything still in flight is
    /// suspect: they fail one attempt each and the connection is recycled.
    fn scan_task_deadlines(&mut self, now: Instant) {
        let mut expired = false;
        let mut index = 0;
        while index < self.tasks.len() {
            if self.tasks[index].task_deadline_passed(now) {
                let task_id = self.tasks[index].task.task_id;
                warn!(task_id, "task deadline expired");
                self.finalize(index, ErrClass::Local, codes::local::TASK_TIMEOUT);
                expired = true;
            } else {
                index += 1;
            }
        }

        if expired {
            self.estimator.record_failure();
            self.batch_fail_running(ErrClass::Protocol, codes::timeout::TASK, now);
            self.engine.disconnect(DisconnectReason::Fatal(
                ErrClass::Protocol,
                codes::timeout::TASK,
            ));
        }
    }

    /// Hand every dispatchable task to the engine in (priority, submission)
    /// order.
    fn dispatch(&mut self, now: Instant) {
        if self.engine.status() != ConnectStatus::Connected {
            return;
        }

        self.tasks.sort_by_key(|p| (p.task.priority, p.seq));
        // checked at most once per pass
        let mut authed: Option<bool> = None;
        let mut inflight = self.tasks.iter().filter(|p| p.running).count() as u32;

        let mut index = 0;
        while index < self.tasks.len() {
            let profile = &self.tasks[index];
            if profile.running || profile.retry_after.is_some_and(|at| now < at) {
                index += 1;
                continue;
            }

            if profile.task.network_status_sensitive && !self.network.is_available() {
                self.finalize(index, ErrClass::Local, codes::local::NO_NET);
                continue;
            }

            if profile.task.need_authed {
                let ok = *authed.get_or_insert_with(|| self.auth.is_authed());
                if !ok {
                    index += 1;
                    continue;
                }
            }

            let body = match self.codec.serialize_request(&profile.task) {
                Ok(body) => body,
                Err(err) => {
                    let (class, code) = err.classify();
                    warn!(task_id = profile.task.task_id, %err, "request serialization failed");
                    self.finalize(index, class, code);
                    continue;
                }
            };

            if !self.anti_avalanche.check(&profile.task, body.len()) {
                self.finalize(index, ErrClass::Local, codes::local::ANTI_AVALANCHE);
                continue;
            }

            let status = self.estimator.status();
            let first_pkg = first_pkg_timeout(
                &self.config.timeouts,
                self.network,
                body.len() as u64,
                profile.task.server_process_cost,
                inflight,
                status,
            );
            let read_write = read_write_timeout(&self.config.timeouts, self.network, first_pkg);

            let profile = &mut self.tasks[index];
            profile.transfer = TransferProfile {
                send_len: body.len() as u64,
                received_len: 0,
                start_send: Some(now),
                last_receive: None,
                first_pkg_timeout: first_pkg,
                read_write_timeout: read_write,
                quality: Some(status),
            };
            profile.running = true;
            profile.retry_after = None;
            debug!(
                task_id = profile.task.task_id,
                send_len = profile.transfer.send_len,
                first_pkg_ms = first_pkg.as_millis() as u64,
                "task dispatched"
            );
            self.engine
                .send(profile.task.task_id, profile.task.cmd_id, body);
            inflight += 1;
            index += 1;
        }
    }

    // ------------------------------------------------------------------
    // Link events
    // ------------------------------------------------------------------

    /// The engine finished flushing a task's buffer. Completes send-only
    /// tasks; request/response tasks keep waiting.
    pub fn on_sent(&mut self, task_id: u32) {
        let Some(index) = self.tasks.iter().position(|p| p.task.task_id == task_id) else {
            return;
        };
        if self.tasks[index].task.send_only {
            self.finalize(index, ErrClass::Ok, 0);
        }
    }

    /// Partial response bytes arrived; refreshes the package-package clock.
    pub fn on_receiving(&mut self, task_id: u32, received: u64) {
        if let Some(profile) = self
            .tasks
            .iter_mut()
            .find(|p| p.task.task_id == task_id)
        {
            profile.transfer.received_len = profile.transfer.received_len.max(received);
            profile.transfer.last_receive = Some(Instant::now());
        }
    }

    pub fn on_response(&mut self, frame: Frame) {
        let now = Instant::now();
        let Some(index) = self
            .tasks
            .iter()
            .position(|p| p.task.task_id == frame.task_id)
        else {
            if frame.task_id == PUSH_TASK_ID {
                self.observer.on_push(frame.cmd_id, frame.body);
            } else {
                debug!(task_id = frame.task_id, "response for unknown task dropped");
            }
            return;
        };

        let profile = &mut self.tasks[index];
        profile.transfer.received_len = profile
            .transfer
            .received_len
            .max(frame.body.len() as u64);
        profile.transfer.last_receive = Some(now);

        let disposition = self.codec.deserialize_response(&profile.task, &frame.body);
        match disposition {
            TaskDisposition::Ok => {
                let elapsed = profile
                    .transfer
                    .start_send
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                let payload = profile.transfer.send_len + profile.transfer.received_len;
                self.estimator.record(payload, elapsed, self.network);
                self.finalize(index, ErrClass::Ok, 0);
            }
            TaskDisposition::TaskEnd => {
                self.finalize(index, ErrClass::Task, FailHandle::TaskEnd as i32);
            }
            TaskDisposition::Default => {
                self.single_fail(
                    index,
                    ErrClass::Task,
                    FailHandle::Default as i32,
                    FailHandle::Default,
                    now,
                );
            }
            TaskDisposition::SessionTimeout => {
                // The session died server-side: nothing in flight will be
                // answered. Each running task spends one attempt, and the
                // survivors redial with no batch backoff so re-auth is not
                // delayed; need_authed tasks park behind the auth gate.
                info!(task_id = frame.task_id, "session timeout reported by server");
                let code = FailHandle::SessionTimeout as i32;
                let mut index = 0;
                while index < self.tasks.len() {
                    if !self.tasks[index].running {
                        index += 1;
                        continue;
                    }
                    let before = self.tasks.len();
                    self.single_fail(
                        index,
                        ErrClass::Decode,
                        code,
                        FailHandle::SessionTimeout,
                        now,
                    );
                    if self.tasks.len() == before {
                        self.tasks[index].retry_after = None;
                        index += 1;
                    }
                }
                self.engine
                    .disconnect(DisconnectReason::Fatal(ErrClass::Decode, code));
            }
        }
    }

    /// The engine tore the connection down on its own. Every running task
    /// failed the attempt.
    pub fn on_broken(&mut self, class: ErrClass, code: i32) {
        if self.tasks.iter().any(|p| p.running) {
            self.estimator.record_failure();
        }
        self.batch_fail_running(class, code, Instant::now());
    }

    // ------------------------------------------------------------------
    // Failure plumbing
    // ------------------------------------------------------------------

    fn batch_fail_running(&mut self, class: ErrClass, code: i32, now: Instant) {
        let mut index = 0;
        while index < self.tasks.len() {
            if !self.tasks[index].running {
                index += 1;
                continue;
            }
            let before = self.tasks.len();
            self.single_fail(index, class, code, FailHandle::Default, now);
            if self.tasks.len() == before {
                index += 1;
            }
        }
    }

    /// One failed attempt: spend a retry or finalize when the budget is
    /// gone or the handle is terminal.
    fn single_fail(
        &mut self,
        index: usize,
        class: ErrClass,
        code: i32,
        handle: FailHandle,
        now: Instant,
    ) {
        let terminal = {
            let profile = &mut self.tasks[index];
            profile.error = (class, code);
            handle.is_terminal() || profile.remain_retry_count == 0
        };
        if terminal {
            self.finalize(index, class, code);
            return;
        }

        let profile = &mut self.tasks[index];
        profile.remain_retry_count -= 1;
        profile.reset_for_retry();
        // local rejections re-dispatch immediately; network failures wait
        // out the batch interval
        profile.retry_after = (class != ErrClass::Local)
            .then(|| now + self.config.scheduler.batch_retry_interval);
        debug!(
            task_id = profile.task.task_id,
            remaining = profile.remain_retry_count,
            ?class,
            code,
            "attempt failed, will retry"
        );
    }

    /// Remove the task and deliver its one terminal callback.
    fn finalize(&mut self, index: usize, class: ErrClass, code: i32) {
        let profile = self.tasks.remove(index);
        let task_id = profile.task.task_id;

        if class == ErrClass::Ok {
            self.continuous_fail_count = 0;
        } else {
            self.continuous_fail_count += 1;
        }

        // per-use endpoint scoring, skipping classes that say nothing about
        // the endpoint itself
        if !class.skip_endpoint_report() {
            if let Some(endpoint) = self.engine.profile().endpoint {
                self.source
                    .report(endpoint.ip, endpoint.port, class == ErrClass::Ok);
            }
        }

        info!(task_id, ?class, code, "task finished");
        self.observer.on_task_terminal(task_id, class, code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use relink_core::Result;
    use tokio::sync::{mpsc, watch};

    use crate::traits::OpenGates;

    struct EchoCodec;

    impl TaskCodec for EchoCodec {
        fn serialize_request(&self, task: &Task) -> Result<Vec<u8>> {
            Ok(task.task_id.to_be_bytes().to_vec())
        }

        fn deserialize_response(&self, _task: &Task, body: &[u8]) -> TaskDisposition {
            match body {
                b"session" => TaskDisposition::SessionTimeout,
                _ => TaskDisposition::Ok,
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        terminals: Mutex<Vec<(u32, ErrClass, i32)>>,
        pushes: Mutex<Vec<(u32, Vec<u8>)>>,
    }

    impl TaskObserver for Recorder {
        fn on_task_terminal(&self, task_id: u32, class: ErrClass, code: i32) {
            self.terminals.lock().unwrap().push((task_id, class, code));
        }

        fn on_push(&self, cmd_id: u32, body: Vec<u8>) {
            self.pushes.lock().unwrap().push((cmd_id, body));
        }
    }

    fn scheduler_with(network: NetworkKind) -> (TaskScheduler, Arc<Recorder>) {
        let config = Arc::new(TransportConfig::testing());
        let (_state_tx, state_rx) = watch::channel(relink_core::AppState::ForegroundStable);
        let source = Arc::new(EndpointSource::new(
            (*config).clone(),
            crate::resolver::Resolver::new(None, config.endpoint.clone()),
            state_rx,
        ));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(ConnectionEngine::new(
            config.clone(),
            source.clone(),
            Arc::new(OpenGates),
            event_tx,
        ));
        let recorder = Arc::new(Recorder::default());
        let scheduler = TaskScheduler::new(
            config,
            engine,
            source,
            Arc::new(EchoCodec),
            recorder.clone(),
            Arc::new(OpenGates),
            Arc::new(OpenGates),
            network,
        );
        (scheduler, recorder)
    }

    #[tokio::test]
    async fn oversized_parameters_fail_at_intake() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        let mut task = Task::new(1, 10);
        task.retry_count = 99;
        assert!(!scheduler.submit(task));

        let mut task = Task::new(2, 10);
        task.total_timeout = Duration::from_secs(60 * 60);
        assert!(!scheduler.submit(task));

        let terminals = recorder.terminals.lock().unwrap();
        assert_eq!(
            *terminals,
            vec![
                (1, ErrClass::Local, codes::local::TASK_PARAM),
                (2, ErrClass::Local, codes::local::TASK_PARAM),
            ]
        );
    }

    #[tokio::test]
    async fn network_sensitive_task_fails_fast_when_offline() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::NoNet);

        let mut task = Task::new(7, 10);
        task.network_status_sensitive = true;
        assert!(!scheduler.submit(task));

        assert_eq!(
            *recorder.terminals.lock().unwrap(),
            vec![(7, ErrClass::Local, codes::local::NO_NET)]
        );
    }

    #[tokio::test]
    async fn duplicate_task_ids_are_rejected_silently() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        assert!(scheduler.submit(Task::new(1, 10)));
        assert!(!scheduler.submit(Task::new(1, 11)));
        assert!(scheduler.has_task(1));
        assert!(recorder.terminals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn task_deadline_expires_while_queued() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        let mut task = Task::new(3, 10);
        task.total_timeout = Duration::from_millis(1);
        assert!(scheduler.submit(task));

        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.tick();

        assert!(!scheduler.has_task(3));
        assert_eq!(
            *recorder.terminals.lock().unwrap(),
            vec![(3, ErrClass::Local, codes::local::TASK_TIMEOUT)]
        );
    }

    #[tokio::test]
    async fn task_deadline_batch_fails_inflight_peers() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        let mut task = Task::new(1, 10);
        task.total_timeout = Duration::from_millis(1);
        scheduler.submit(task);
        scheduler.submit(Task::new(2, 10));
        scheduler.tasks[0].running = true;
        scheduler.tasks[1].running = true;

        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.tick();

        // only the expired task is terminal, with the local timeout code
        assert!(!scheduler.has_task(1));
        assert_eq!(
            *recorder.terminals.lock().unwrap(),
            vec![(1, ErrClass::Local, codes::local::TASK_TIMEOUT)]
        );
        // its peer spent one attempt and waits for the fresh connection
        let peer = &scheduler.tasks[0];
        assert_eq!(peer.task.task_id, 2);
        assert!(!peer.running);
        assert_eq!(peer.remain_retry_count, 0);
        assert_eq!(peer.error, (ErrClass::Protocol, codes::timeout::TASK));
    }

    #[tokio::test]
    async fn session_timeout_spends_a_retry_and_redials_immediately() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        let mut task = Task::new(1, 10);
        task.retry_count = 1;
        scheduler.submit(task);
        let mut exhausted = Task::new(2, 10);
        exhausted.retry_count = 0;
        scheduler.submit(exhausted);
        scheduler.tasks[0].running = true;
        scheduler.tasks[1].running = true;

        scheduler.on_response(Frame::new(10, 1, b"session".to_vec()));

        // the task with budget left is pending again with no batch backoff
        assert!(scheduler.has_task(1));
        assert!(!scheduler.tasks[0].running);
        assert_eq!(scheduler.tasks[0].remain_retry_count, 0);
        assert!(scheduler.tasks[0].retry_after.is_none());
        // the exhausted one is terminal with the session-timeout code
        assert_eq!(
            *recorder.terminals.lock().unwrap(),
            vec![(2, ErrClass::Decode, FailHandle::SessionTimeout as i32)]
        );
    }

    #[tokio::test]
    async fn stop_removes_without_callback() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        assert!(scheduler.submit(Task::new(5, 10)));
        assert!(scheduler.stop_task(5).await);
        assert!(!scheduler.stop_task(5).await);
        assert!(recorder.terminals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_fails_everything_with_the_clear_code() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        scheduler.submit(Task::new(1, 10));
        scheduler.submit(Task::new(2, 10));
        scheduler.clear_tasks();

        assert!(scheduler.is_empty());
        assert_eq!(
            *recorder.terminals.lock().unwrap(),
            vec![
                (1, ErrClass::Local, codes::local::CLEAR),
                (2, ErrClass::Local, codes::local::CLEAR),
            ]
        );
    }

    #[tokio::test]
    async fn frames_without_a_task_route_to_push() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        scheduler.on_response(Frame::new(99, PUSH_TASK_ID, b"notice".to_vec()));
        // a stale non-push id is dropped
        scheduler.on_response(Frame::new(99, 1234, b"stale".to_vec()));

        assert_eq!(
            *recorder.pushes.lock().unwrap(),
            vec![(99, b"notice".to_vec())]
        );
        assert!(recorder.terminals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broken_link_spends_one_retry_per_running_task() {
        let (mut scheduler, recorder) = scheduler_with(NetworkKind::Wifi);

        let mut task = Task::new(1, 10);
        task.retry_count = 1;
        scheduler.submit(task);
        // mark as dispatched by hand since no live connection exists here
        scheduler.tasks[0].running = true;

        scheduler.on_broken(ErrClass::Socket, codes::socket::REMOTE_SHUTDOWN);
        assert!(scheduler.has_task(1));
        assert_eq!(scheduler.tasks[0].remain_retry_count, 0);
        assert!(!scheduler.tasks[0].running);

        scheduler.tasks[0].running = true;
        scheduler.on_broken(ErrClass::Socket, codes::socket::REMOTE_SHUTDOWN);
        assert!(!scheduler.has_task(1));
        assert_eq!(
            *recorder.terminals.lock().unwrap(),
            vec![(1, ErrClass::Socket, codes::socket::REMOTE_SHUTDOWN)]
        );
    }
}
