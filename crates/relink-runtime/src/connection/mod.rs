//! Persistent-connection engine
//!
//! Owns at most one live socket. Each connect cycle runs inside a single
//! worker task: rank candidates, race connects, optionally run the identity
//! exchange, then serve a read/write loop until something tears the
//! connection down. Commands arrive over an mpsc channel, which doubles as
//! the wake-up for the readiness wait — queueing data, stopping a task or
//! requesting a disconnect all interrupt the loop immediately.

mod connector;
mod heartbeat;

pub use connector::{race, RaceOutcome};
pub use heartbeat::HeartbeatPacer;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use relink_core::errors::{NetError, RelinkError};
use relink_core::frame::{self, Decode, Frame, HEADER_LEN, IDENTITY_TASK_ID, NOOP_TASK_ID};
use relink_core::profile::{ConnectProfile, DisconnectReason};
use relink_core::{ConnectStatus, TransportConfig};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::LinkEvent;
use crate::source::EndpointSource;
use crate::traits::IdentityVerifier;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

#[derive(Debug)]
enum EngineCmd {
    Send {
        task_id: u32,
        cmd_id: u32,
        body: Vec<u8>,
    },
    /// Best-effort send accepted only when the backlog is empty
    SendWhenIdle {
        task_id: u32,
        cmd_id: u32,
        body: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        task_id: u32,
        reply: oneshot::Sender<bool>,
    },
    EnsureConnected,
    Disconnect {
        reason: DisconnectReason,
    },
    Shutdown,
}

struct PendingSend {
    task_id: u32,
    buf: Vec<u8>,
    offset: usize,
}

impl PendingSend {
    fn frame(frame: &Frame) -> Self {
        Self {
            task_id: frame.task_id,
            buf: frame.encode(),
            offset: 0,
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Handle
// ----------------------------------------------------------------------------

/// Handle to the connection worker. Cloneable operations go through the
/// command channel; dropping the handle aborts the worker.
pub struct ConnectionEngine {
    cmd_tx: mpsc::UnboundedSender<EngineCmd>,
    status_rx: watch::Receiver<ConnectStatus>,
    profile: Arc<Mutex<ConnectProfile>>,
    worker: JoinHandle<()>,
}

impl ConnectionEngine {
    pub fn new(
        config: Arc<TransportConfig>,
        source: Arc<EndpointSource>,
        identity: Arc<dyn IdentityVerifier>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectStatus::Idle);
        let profile = Arc::new(Mutex::new(ConnectProfile::new()));

        let worker = EngineWorker {
            pacer: HeartbeatPacer::new(config.heartbeat.clone()),
            config,
            source,
            identity,
            events,
            status_tx,
            cmd_rx,
            profile: profile.clone(),
            queue: VecDeque::new(),
        };
        let worker = tokio::spawn(worker.run());

        Self {
            cmd_tx,
            status_rx,
            profile,
            worker,
        }
    }

    pub fn status(&self) -> ConnectStatus {
        *self.status_rx.borrow()
    }

    /// Snapshot of the current connect cycle's record.
    pub fn profile(&self) -> ConnectProfile {
        self.profile.lock().unwrap().clone()
    }

    /// Queue a framed buffer; connects first if idle.
    pub fn send(&self, task_id: u32, cmd_id: u32, body: Vec<u8>) {
        let _ = self.cmd_tx.send(EngineCmd::Send {
            task_id,
            cmd_id,
            body,
        });
    }

    /// Send only if connected with an empty backlog. Used for best-effort
    /// keepalive traffic.
    pub async fn send_when_idle(&self, task_id: u32, cmd_id: u32, body: Vec<u8>) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(EngineCmd::SendWhenIdle {
                task_id,
                cmd_id,
                body,
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Cancel a queued buffer. Returns false when the buffer is gone or
    /// already partially flushed — a half-sent request cannot be unsent.
    pub async fn stop(&self, task_id: u32) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(EngineCmd::Stop { task_id, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Idempotent: a no-op while connecting or connected.
    pub fn ensure_connected(&self) {
        let _ = self.cmd_tx.send(EngineCmd::EnsureConnected);
    }

    pub fn disconnect(&self, reason: DisconnectReason) {
        let _ = self.cmd_tx.send(EngineCmd::Disconnect { reason });
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCmd::Shutdown);
    }
}

impl Drop for ConnectionEngine {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// Whether a finished cycle returns the worker to idle or ends it.
enum CycleExit {
    Idle,
    Shutdown,
}

struct EngineWorker {
    config: Arc<TransportConfig>,
    source: Arc<EndpointSource>,
    identity: Arc<dyn IdentityVerifier>,
    events: mpsc::UnboundedSender<LinkEvent>,
    status_tx: watch::Sender<ConnectStatus>,
    cmd_rx: mpsc::UnboundedReceiver<EngineCmd>,
    profile: Arc<Mutex<ConnectProfile>>,
    queue: VecDeque<PendingSend>,
    pacer: HeartbeatPacer,
}

impl EngineWorker {
    async fn run(mut self) {
        loop {
            // Idle: wait for something that warrants a connect cycle
            let Some(cmd) = self.cmd_rx.recv().await else {
                break;
            };
            match cmd {
                EngineCmd::EnsureConnected => {}
                EngineCmd::Send {
                    task_id,
                    cmd_id,
                    body,
                } => {
                    self.enqueue(task_id, cmd_id, body);
                }
                EngineCmd::SendWhenIdle { reply, .. } => {
                    let _ = reply.send(false);
                    continue;
                }
                EngineCmd::Stop { task_id, reply } => {
                    let _ = reply.send(self.remove_unsent(task_id));
                    continue;
                }
                EngineCmd::Disconnect { .. } => {
                    self.queue.clear();
                    continue;
                }
                EngineCmd::Shutdown => break,
            }

            if let CycleExit::Shutdown = self.run_cycle().await {
                break;
            }
        }
        debug!("connection worker ended");
    }

    fn transition(&self, status: ConnectStatus) {
        let _ = self.status_tx.send(status);
        let _ = self.events.send(LinkEvent::StatusChanged(status));
    }

    fn enqueue(&mut self, task_id: u32, cmd_id: u32, body: Vec<u8>) {
        self.queue
            .push_back(PendingSend::frame(&Frame::new(cmd_id, task_id, body)));
    }

    fn remove_unsent(&mut self, task_id: u32) -> bool {
        if let Some(pos) = self.queue.iter().position(|entry| entry.task_id == task_id) {
            if self.queue[pos].offset == 0 {
                self.queue.remove(pos);
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Connect cycle
    // ------------------------------------------------------------------

    async fn run_cycle(&mut self) -> CycleExit {
        self.transition(ConnectStatus::Connecting);
        *self.profile.lock().unwrap() = ConnectProfile::new();

        let stream = match self.connect_phase().await {
            Ok(stream) => stream,
            Err(ConnectEnd::Exit(exit)) => return exit,
            Err(ConnectEnd::Failed(err)) => {
                self.fail_connect(err);
                return CycleExit::Idle;
            }
        };

        self.io_loop(stream).await
    }

    /// Resolve and race candidates, staying responsive to commands.
    async fn connect_phase(&mut self) -> Result<TcpStream, ConnectEnd> {
        let source = self.source.clone();
        let resolve = async move { source.make_candidates().await };
        tokio::pin!(resolve);
        let candidates = loop {
            tokio::select! {
                list = &mut resolve => break list,
                cmd = self.cmd_rx.recv() => self.background_cmd(cmd)?,
            }
        };
        self.profile.lock().unwrap().dns_time = Some(std::time::Instant::now());

        if candidates.is_empty() {
            let hosts = self.config.hosts.clone();
            return Err(ConnectEnd::Failed(NetError::DnsEmpty { hosts }));
        }

        let race_candidates = candidates.clone();
        let connect_config = self.config.connect.clone();
        let race = async move { connector::race(&race_candidates, &connect_config).await };
        tokio::pin!(race);
        let outcome = loop {
            tokio::select! {
                outcome = &mut race => break outcome,
                cmd = self.cmd_rx.recv() => self.background_cmd(cmd)?,
            }
        };

        match outcome {
            Ok(RaceOutcome {
                stream,
                index,
                rtt,
                failed,
            }) => {
                for lost in failed {
                    let ep = &candidates[lost];
                    self.source.report(ep.ip, ep.port, false);
                }
                let winner = candidates[index].clone();
                self.source.report(winner.ip, winner.port, true);
                {
                    let mut profile = self.profile.lock().unwrap();
                    profile.endpoint = Some(winner);
                    profile.attempt_index = index;
                    profile.connect_rtt = Some(rtt);
                    profile.connected_time = Some(std::time::Instant::now());
                }
                Ok(stream)
            }
            Err((err, failed)) => {
                for lost in failed {
                    let ep = &candidates[lost];
                    self.source.report(ep.ip, ep.port, false);
                }
                Err(ConnectEnd::Failed(err))
            }
        }
    }

    /// Handle a command received while resolving or racing. `Err` aborts the
    /// cycle.
    fn background_cmd(&mut self, cmd: Option<EngineCmd>) -> Result<(), ConnectEnd> {
        match cmd {
            None | Some(EngineCmd::Shutdown) => Err(ConnectEnd::Exit(CycleExit::Shutdown)),
            Some(EngineCmd::Disconnect { reason }) => {
                self.queue.clear();
                self.record_disconnect(reason);
                self.transition(ConnectStatus::Disconnected);
                Err(ConnectEnd::Exit(CycleExit::Idle))
            }
            Some(EngineCmd::Send {
                task_id,
                cmd_id,
                body,
            }) => {
                self.enqueue(task_id, cmd_id, body);
                Ok(())
            }
            Some(EngineCmd::SendWhenIdle { reply, .. }) => {
                let _ = reply.send(false);
                Ok(())
            }
            Some(EngineCmd::Stop { task_id, reply }) => {
                let _ = reply.send(self.remove_unsent(task_id));
                Ok(())
            }
            // already connecting
            Some(EngineCmd::EnsureConnected) => Ok(()),
        }
    }

    fn fail_connect(&mut self, err: NetError) {
        let (class, code) = err.classify();
        warn!(%err, "connect cycle failed");
        self.record_disconnect(DisconnectReason::Fatal(class, code));
        self.transition(ConnectStatus::ConnectFailed);
        let _ = self.events.send(LinkEvent::Broken { class, code });
        self.queue.clear();
    }

    fn record_disconnect(&self, reason: DisconnectReason) {
        let mut profile = self.profile.lock().unwrap();
        profile.disconnect_time = Some(std::time::Instant::now());
        profile.disconnect_reason = Some(reason);
    }

    // ------------------------------------------------------------------
    // Read/write loop
    // ------------------------------------------------------------------

    async fn io_loop(&mut self, stream: TcpStream) -> CycleExit {
        let mut buf: Vec<u8> = Vec::with_capacity(4096);
        let mut verifying = false;

        if let Some((body, cmd_id)) = self.identity.challenge() {
            self.queue.push_front(PendingSend::frame(&Frame::new(
                cmd_id,
                IDENTITY_TASK_ID,
                body,
            )));
            verifying = true;
            self.transition(ConnectStatus::Verifying);
        } else {
            self.transition(ConnectStatus::Connected);
        }

        let mut heartbeat_at = Instant::now() + self.pacer.interval();
        // doubles as the identity-exchange deadline
        let mut reply_deadline = verifying.then(|| Instant::now() + self.config.connect.connect_timeout);

        loop {
            let want_write = self.has_writable(verifying);
            let mut interest = tokio::io::Interest::READABLE;
            if want_write {
                interest = interest | tokio::io::Interest::WRITABLE;
            }

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(EngineCmd::Shutdown) => {
                            self.teardown_requested(DisconnectReason::Requested);
                            return CycleExit::Shutdown;
                        }
                        Some(EngineCmd::Disconnect { reason }) => {
                            self.teardown_requested(reason);
                            return CycleExit::Idle;
                        }
                        Some(EngineCmd::Send { task_id, cmd_id, body }) => {
                            self.enqueue(task_id, cmd_id, body);
                        }
                        Some(EngineCmd::SendWhenIdle { task_id, cmd_id, body, reply }) => {
                            let accept = !verifying && self.queue.is_empty();
                            if accept {
                                self.enqueue(task_id, cmd_id, body);
                            }
                            let _ = reply.send(accept);
                        }
                        Some(EngineCmd::Stop { task_id, reply }) => {
                            let _ = reply.send(self.remove_unsent(task_id));
                        }
                        Some(EngineCmd::EnsureConnected) => {}
                    }
                }

                ready = stream.ready(interest) => {
                    let ready = match ready {
                        Ok(ready) => ready,
                        Err(err) => {
                            self.teardown_fatal(NetError::Io(err).into());
                            return CycleExit::Idle;
                        }
                    };

                    if ready.is_readable() {
                        match self.drain_readable(&stream, &mut buf) {
                            Ok((read_any, closed)) => {
                                if read_any {
                                    heartbeat_at = Instant::now() + self.pacer.interval();
                                    if let Err(err) = self.consume_frames(
                                        &mut buf,
                                        &mut verifying,
                                        &mut reply_deadline,
                                    ) {
                                        self.teardown_fatal(err);
                                        return CycleExit::Idle;
                                    }
                                }
                                if closed {
                                    // frames that rode in with the close
                                    // were delivered above
                                    self.teardown_fatal(NetError::RemoteShutdown.into());
                                    return CycleExit::Idle;
                                }
                            }
                            Err(err) => {
                                self.teardown_fatal(err.into());
                                return CycleExit::Idle;
                            }
                        }
                    }

                    if ready.is_writable() && self.has_writable(verifying) {
                        match self.flush_queue(&stream, verifying) {
                            Ok(wrote) => {
                                if wrote {
                                    heartbeat_at = Instant::now() + self.pacer.interval();
                                }
                            }
                            Err(err) => {
                                self.teardown_fatal(NetError::Io(err).into());
                                return CycleExit::Idle;
                            }
                        }
                    }
                }

                _ = tokio::time::sleep_until(heartbeat_at) => {
                    if !verifying && reply_deadline.is_none() {
                        debug!("heartbeat interval elapsed, sending noop");
                        self.queue.push_back(PendingSend::frame(&Frame::heartbeat(
                            self.config.heartbeat_cmd_id,
                        )));
                        reply_deadline = Some(Instant::now() + self.pacer.reply_timeout());
                    }
                    heartbeat_at = Instant::now() + self.pacer.interval();
                }

                _ = sleep_until_opt(reply_deadline), if reply_deadline.is_some() => {
                    if verifying {
                        self.teardown_fatal(NetError::IdentityRejected.into());
                    } else {
                        self.pacer.on_miss();
                        self.teardown_fatal(NetError::HeartbeatTimeout.into());
                    }
                    return CycleExit::Idle;
                }

                _ = tokio::time::sleep(self.config.connect.idle_ceiling) => {
                    debug!("readiness wait hit the idle ceiling");
                }
            }
        }
    }

    fn has_writable(&self, verifying: bool) -> bool {
        if verifying {
            self.queue
                .front()
                .is_some_and(|entry| frame::is_reserved_task_id(entry.task_id))
        } else {
            !self.queue.is_empty()
        }
    }

    /// Read whatever the socket holds. Returns whether any bytes arrived and
    /// whether a 0-byte read signalled remote shutdown. The caller must
    /// deframe the buffered bytes before acting on the shutdown, so a
    /// response written right before the peer closed still gets delivered.
    fn drain_readable(
        &self,
        stream: &TcpStream,
        buf: &mut Vec<u8>,
    ) -> Result<(bool, bool), NetError> {
        let mut read_any = false;
        let mut chunk = [0u8; 4096];
        loop {
            match stream.try_read(&mut chunk) {
                Ok(0) => return Ok((read_any, true)),
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    read_any = true;
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(NetError::Io(err)),
            }
        }
        Ok((read_any, false))
    }

    /// Deframe everything buffered; partial frames stay for the next read.
    fn consume_frames(
        &mut self,
        buf: &mut Vec<u8>,
        verifying: &mut bool,
        reply_deadline: &mut Option<Instant>,
    ) -> Result<(), RelinkError> {
        loop {
            match frame::decode(buf)? {
                Decode::Packet { frame, consumed } => {
                    buf.drain(..consumed);
                    self.handle_frame(frame, verifying, reply_deadline)?;
                }
                Decode::Continue => {
                    // a partial frame with a parsed header still counts as
                    // response activity for its task
                    if buf.len() >= HEADER_LEN {
                        let task_id =
                            u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
                        if !frame::is_reserved_task_id(task_id) {
                            let _ = self.events.send(LinkEvent::Receiving {
                                task_id,
                                received: buf.len() as u64,
                            });
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: Frame,
        verifying: &mut bool,
        reply_deadline: &mut Option<Instant>,
    ) -> Result<(), NetError> {
        match frame.task_id {
            IDENTITY_TASK_ID => {
                if self.identity.accept_response(&frame.body) {
                    info!("identity check passed");
                    *verifying = false;
                    *reply_deadline = None;
                    self.transition(ConnectStatus::Connected);
                    Ok(())
                } else {
                    Err(NetError::IdentityRejected)
                }
            }
            NOOP_TASK_ID => {
                debug!("heartbeat reply received");
                *reply_deadline = None;
                self.pacer.on_success();
                Ok(())
            }
            task_id if frame::is_reserved_task_id(task_id) => {
                // keepalive acks carry no payload the scheduler cares about
                Ok(())
            }
            _ => {
                let _ = self.events.send(LinkEvent::Response(frame));
                Ok(())
            }
        }
    }

    /// Scatter-write as much of the queue as the socket accepts, consuming
    /// partial writes without double-counting.
    fn flush_queue(&mut self, stream: &TcpStream, verifying: bool) -> std::io::Result<bool> {
        let sendable = if verifying {
            usize::from(self.has_writable(true))
        } else {
            self.queue.len()
        };
        if sendable == 0 {
            return Ok(false);
        }

        let written = {
            let slices: Vec<std::io::IoSlice<'_>> = self
                .queue
                .iter()
                .take(sendable)
                .map(|entry| std::io::IoSlice::new(&entry.buf[entry.offset..]))
                .collect();
            match stream.try_write_vectored(&slices) {
                Ok(n) => n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) => return Err(err),
            }
        };

        let mut remaining = written;
        while remaining > 0 {
            let entry = match self.queue.front_mut() {
                Some(entry) => entry,
                None => break,
            };
            let left = entry.buf.len() - entry.offset;
            if remaining >= left {
                remaining -= left;
                let task_id = entry.task_id;
                self.queue.pop_front();
                if !frame::is_reserved_task_id(task_id) {
                    let _ = self.events.send(LinkEvent::Sent { task_id });
                }
            } else {
                entry.offset += remaining;
                remaining = 0;
            }
        }
        Ok(written > 0)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn teardown_requested(&mut self, reason: DisconnectReason) {
        info!(?reason, "disconnecting");
        self.queue.clear();
        self.record_disconnect(reason);
        self.transition(ConnectStatus::Disconnected);
    }

    fn teardown_fatal(&mut self, err: RelinkError) {
        let (class, code) = err.classify();
        error!(%err, ?class, code, "connection torn down");
        self.queue.clear();
        self.record_disconnect(DisconnectReason::Fatal(class, code));

        // score the endpoint that just failed us
        if !class.skip_endpoint_report() {
            if let Some(endpoint) = self.profile.lock().unwrap().endpoint.clone() {
                self.source.report(endpoint.ip, endpoint.port, false);
            }
        }

        self.transition(ConnectStatus::Disconnected);
        let _ = self.events.send(LinkEvent::Broken { class, code });
    }
}

enum ConnectEnd {
    /// The cycle ends and the worker idles or shuts down
    Exit(CycleExit),
    /// The connect attempt itself failed
    Failed(NetError),
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}
