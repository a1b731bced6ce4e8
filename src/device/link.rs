use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use futures::channel::mpsc::{channel, Sender};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::channel::{CommandChannel, DropReason, SendOutcome};
use crate::device::scan::ScanSession;
use crate::device::transport::{
    Capabilities, ConnectionEvent, Discovered, PermissionGate, Transport,
};
use crate::device::types::{DeviceEvent, DeviceIdentity, DisconnectReason, LinkTuning};
use crate::error::{LinkError, TransportError};
use crate::input::joystick::StickVector;
use crate::protocol::DriveCommand;

#[derive(Debug)]
enum LinkCommand {
    StartScan,
    Drive(DriveCommand),
    PermissionResult { granted: bool },
    Disconnect,
}

/**
 * Completions flowing back into the link task from its helper tasks. Every
 * event arrives stamped with the attempt generation it was spawned under;
 * events from a superseded attempt are discarded on arrival, so a stale
 * timer or a late write completion can never fire against fresh state.
 */
pub enum LinkEvent<D, C> {
    DeviceSeen { seen: Discovered<D> },
    ScanExpired,
    ScanFailed { error: TransportError },
    Connection { event: ConnectionEvent },
    ConnectFailed { detail: String },
    SettleElapsed,
    DiscoveryFinished { result: Result<Capabilities<C>, TransportError> },
    WriteFinished { seq: u64, result: Result<(), TransportError> },
}

/**
 * The caller-facing side of the link: submit stick positions, start scans,
 * disconnect. Handles are cheap to clone and every clone talks to the same
 * link task. All methods hand off to the task without waiting for it.
 */
#[derive(Debug, Clone)]
pub struct LinkHandle {
    commands: Sender<LinkCommand>,
    ready: Arc<AtomicBool>,
    next_seq: Arc<AtomicU64>,
}

impl LinkHandle {
    /**
     * Whether the link currently accepts drive commands.
     */
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /**
     * Submits a new stick position. Returns `Dropped(NotReady)` when no
     * device is ready for commands; positions arriving faster than the link
     * can take them are coalesced or dropped further down.
     */
    pub fn drive(&mut self, vector: StickVector) -> SendOutcome {
        if !self.is_ready() {
            return SendOutcome::Dropped(DropReason::NotReady);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let command = DriveCommand::new(vector, seq);
        match self.commands.try_send(LinkCommand::Drive(command)) {
            Ok(()) => SendOutcome::Enqueued,
            Err(err) if err.is_full() => SendOutcome::Dropped(DropReason::Busy),
            Err(_) => SendOutcome::Dropped(DropReason::NotReady),
        }
    }

    pub fn start_scan(&mut self) {
        self.send_command(LinkCommand::StartScan);
    }

    pub fn disconnect(&mut self) {
        self.send_command(LinkCommand::Disconnect);
    }

    /**
     * Delivers the outcome of a permission prompt. A granted result while a
     * request is pending resumes the scan that needed it.
     */
    pub fn permission_result(&mut self, granted: bool) {
        self.send_command(LinkCommand::PermissionResult { granted });
    }

    fn send_command(&mut self, command: LinkCommand) {
        if let Err(err) = self.commands.try_send(command) {
            warn!("Failed to hand a command to the link task: {:?}", err);
        }
    }
}

enum ConnectionState<D, C> {
    Idle,
    Scanning {
        deadline: Instant,
        session: ScanSession,
    },
    Connecting {
        device: D,
        address: String,
    },
    Discovering {
        device: D,
        address: String,
        attempts: u32,
    },
    Ready {
        device: D,
        write_channel: C,
        commands: CommandChannel,
    },
    Disconnected {
        reason: DisconnectReason,
    },
}

impl<D, C> ConnectionState<D, C> {
    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning { .. } => "scanning",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Discovering { .. } => "discovering",
            ConnectionState::Ready { .. } => "ready",
            ConnectionState::Disconnected { .. } => "disconnected",
        }
    }
}

struct Link<T: Transport, G: PermissionGate> {
    transport: Arc<T>,
    gate: G,
    identity: DeviceIdentity,
    tuning: LinkTuning,
    state: ConnectionState<T::Device, T::Channel>,
    subscribers: Vec<Sender<DeviceEvent>>,
    events_tx: Sender<(u64, LinkEvent<T::Device, T::Channel>)>,
    generation: u64,
    attempt_cancel: CancellationToken,
    permission_requested: bool,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl<T: Transport, G: PermissionGate> Link<T, G> {
    async fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::StartScan => self.start_scan().await,
            LinkCommand::Drive(command) => self.drive(command).await,
            LinkCommand::PermissionResult { granted } => self.permission_result(granted).await,
            LinkCommand::Disconnect => self.disconnect().await,
        }
    }

    async fn handle_event(&mut self, generation: u64, event: LinkEvent<T::Device, T::Channel>) {
        if generation != self.generation {
            debug!(
                "Ignoring an event from attempt {} (the current attempt is {})",
                generation, self.generation,
            );
            return;
        }

        match event {
            LinkEvent::DeviceSeen { seen } => self.device_seen(seen).await,
            LinkEvent::ScanExpired => self.scan_expired().await,
            LinkEvent::ScanFailed { error } => self.scan_failed(error).await,
            LinkEvent::Connection { event } => self.connection_event(event).await,
            LinkEvent::ConnectFailed { detail } => self.connect_failed(detail).await,
            LinkEvent::SettleElapsed => self.settle_elapsed().await,
            LinkEvent::DiscoveryFinished { result } => self.discovery_finished(result).await,
            LinkEvent::WriteFinished { seq, result } => self.write_finished(seq, result).await,
        }
    }

    async fn start_scan(&mut self) {
        if let ConnectionState::Scanning { deadline, .. } = &self.state {
            let remaining = deadline.saturating_duration_since(Instant::now());
            debug!("Scan requested, but one is already running for another {:?}", remaining);
            self.emit(DeviceEvent::Error(LinkError::AlreadyActive)).await;
            return;
        }
        if !matches!(self.state, ConnectionState::Idle) {
            debug!("Scan requested while {}", self.state.name());
            self.emit(DeviceEvent::Error(LinkError::AlreadyActive)).await;
            return;
        }

        if !self.gate.has_permission() {
            info!("Missing bluetooth permission, requesting it");
            self.permission_requested = true;
            self.gate.request_permission();
            return;
        }

        self.begin_scan().await;
    }

    async fn begin_scan(&mut self) {
        let deadline = Instant::now() + self.tuning.scan_timeout;
        let session = ScanSession::spawn(
            Arc::clone(&self.transport),
            self.tuning.scan_timeout,
            self.generation,
            self.events_tx.clone(),
            self.attempt_cancel.child_token(),
        );
        self.state = ConnectionState::Scanning { deadline, session };

        info!("Scanning for {}...", self.identity.name);
        self.emit(DeviceEvent::ScanStarted).await;
    }

    async fn permission_result(&mut self, granted: bool) {
        if !self.permission_requested {
            debug!("Ignoring a permission result that was never requested");
            return;
        }
        self.permission_requested = false;

        if !granted {
            warn!("Bluetooth permission was denied");
            self.emit(DeviceEvent::Error(LinkError::PermissionDenied)).await;
            return;
        }

        if matches!(self.state, ConnectionState::Idle) {
            info!("Bluetooth permission granted, starting the scan");
            self.begin_scan().await;
        }
    }

    async fn drive(&mut self, command: DriveCommand) {
        let seq = command.seq;
        let outcome = match &mut self.state {
            ConnectionState::Ready { commands, .. } => commands.submit(command, Instant::now()),
            other => {
                debug!("Dropping drive command #{}: link is {}", seq, other.name());
                return;
            },
        };

        match outcome {
            SendOutcome::Enqueued => self.pump_writes(),
            SendOutcome::Dropped(reason) => debug!("Drive command #{} dropped: {:?}", seq, reason),
        }
    }

    fn pump_writes(&mut self) {
        if let ConnectionState::Ready { device, write_channel, commands } = &mut self.state {
            if let Some(command) = commands.next_write(Instant::now()) {
                debug!("Writing drive command #{}", command.seq);

                let transport = Arc::clone(&self.transport);
                let device = device.clone();
                let write_channel = write_channel.clone();
                let generation = self.generation;
                let mut events = self.events_tx.clone();
                spawn(async move {
                    let result = transport.write(&device, &write_channel, &command.payload).await;
                    let event = LinkEvent::WriteFinished { seq: command.seq, result };
                    let _ = events.send((generation, event)).await;
                });
            }
        }
    }

    async fn write_finished(&mut self, seq: u64, result: Result<(), TransportError>) {
        match &mut self.state {
            ConnectionState::Ready { commands, .. } => commands.write_finished(),
            other => {
                debug!("Ignoring a write completion in {}", other.name());
                return;
            },
        }

        match result {
            Ok(()) => debug!("Write #{} confirmed", seq),
            Err(err) => {
                // tolerated in place: the next position supersedes the lost one
                warn!("Write #{} failed: {}", seq, err);
                let detail = err.to_string();
                self.emit(DeviceEvent::Error(LinkError::LinkWriteFailed { detail })).await;
            },
        }

        self.pump_writes();
    }

    async fn device_seen(&mut self, seen: Discovered<T::Device>) {
        if seen.name != self.identity.name {
            debug!("Ignoring {} ({})", seen.name, seen.address);
            return;
        }

        match std::mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Scanning { session, .. } => {
                session.shutdown().await;
                info!("Found {} at {}", seen.name, seen.address);
                self.emit(DeviceEvent::DeviceFound { name: seen.name.clone() }).await;
                self.connect(seen).await;
            },
            other => {
                debug!("Ignoring a scan result in {}", other.name());
                self.state = other;
            },
        }
    }

    async fn scan_expired(&mut self) {
        match std::mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Scanning { session, .. } => {
                session.shutdown().await;
                warn!("{} was not found before the scan timed out", self.identity.name);
                let name = self.identity.name.clone();
                self.emit(DeviceEvent::Error(LinkError::DeviceNotFound { name })).await;
            },
            other => {
                self.state = other;
            },
        }
    }

    async fn scan_failed(&mut self, error: TransportError) {
        match std::mem::replace(&mut self.state, ConnectionState::Idle) {
            ConnectionState::Scanning { session, .. } => {
                session.shutdown().await;
                let error = match error {
                    TransportError::PermissionDenied => LinkError::PermissionDenied,
                    other => LinkError::ScanFailed { detail: other.to_string() },
                };
                warn!("The scan did not start: {}", error);
                self.emit(DeviceEvent::Error(error)).await;
            },
            other => {
                self.state = other;
            },
        }
    }

    async fn connect(&mut self, seen: Discovered<T::Device>) {
        info!("Connecting to {}...", seen.address);
        self.state = ConnectionState::Connecting {
            device: seen.device.clone(),
            address: seen.address.clone(),
        };
        self.emit(DeviceEvent::Connecting { address: seen.address.clone() }).await;

        let transport = Arc::clone(&self.transport);
        let generation = self.generation;
        let mut events = self.events_tx.clone();
        let cancel = self.attempt_cancel.clone();
        spawn(async move {
            let mut connection = match transport.connect(&seen.device).await {
                Ok(stream) => stream,
                Err(err) => {
                    let event = LinkEvent::ConnectFailed { detail: err.to_string() };
                    let _ = events.send((generation, event)).await;
                    return;
                },
            };

            'forward: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'forward;
                    },
                    next = connection.next() => {
                        let event = match next {
                            Some(event) => event,
                            // the stream ended without a disconnect, treat it as one
                            None => ConnectionEvent::Disconnected,
                        };
                        let over = event != ConnectionEvent::Connected;
                        if events.send((generation, LinkEvent::Connection { event })).await.is_err() {
                            break 'forward;
                        }
                        if over {
                            break 'forward;
                        }
                    },
                }
            }
        });
    }

    async fn connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => self.connected().await,
            ConnectionEvent::Failed => {
                self.connect_failed(String::from("the transport reported failure")).await;
            },
            ConnectionEvent::Disconnected => self.link_dropped().await,
        }
    }

    async fn connected(&mut self) {
        let (device, address) = match &self.state {
            ConnectionState::Connecting { device, address } => (device.clone(), address.clone()),
            other => {
                debug!("Ignoring a connect notification in {}", other.name());
                return;
            },
        };

        info!("Connected to {}", address);
        self.state = ConnectionState::Discovering { device, address, attempts: 0 };
        self.emit(DeviceEvent::Connected).await;
        self.start_settle();
    }

    fn start_settle(&mut self) {
        let delay = self.tuning.settle_delay;
        let generation = self.generation;
        let mut events = self.events_tx.clone();
        let cancel = self.attempt_cancel.clone();
        spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = sleep(delay) => {
                    let _ = events.send((generation, LinkEvent::SettleElapsed)).await;
                },
            }
        });
    }

    async fn settle_elapsed(&mut self) {
        let device = match &mut self.state {
            ConnectionState::Discovering { device, attempts, .. } => {
                *attempts += 1;
                info!("Discovering services (attempt {})...", attempts);
                device.clone()
            },
            other => {
                debug!("Ignoring an elapsed settle delay in {}", other.name());
                return;
            },
        };

        let transport = Arc::clone(&self.transport);
        let service = self.identity.service;
        let characteristic = self.identity.characteristic;
        let generation = self.generation;
        let mut events = self.events_tx.clone();
        spawn(async move {
            let result = transport.discover_capabilities(&device, service, characteristic).await;
            let _ = events.send((generation, LinkEvent::DiscoveryFinished { result })).await;
        });
    }

    async fn discovery_finished(
        &mut self,
        result: Result<Capabilities<T::Channel>, TransportError>,
    ) {
        let attempts = match &self.state {
            ConnectionState::Discovering { attempts, .. } => *attempts,
            other => {
                debug!("Ignoring a discovery result in {}", other.name());
                return;
            },
        };

        match result {
            Ok(Capabilities { channel: Some(write_channel), .. }) => {
                self.capabilities_ready(write_channel).await;
            },
            Ok(Capabilities { service_found, .. }) => {
                if service_found {
                    warn!("The drive service is present but its characteristic is missing");
                } else {
                    warn!("The drive service is missing");
                }
                self.fail(LinkError::CapabilityNotFound, DisconnectReason::CapabilityNotFound).await;
            },
            Err(err) if attempts < self.tuning.max_discovery_attempts => {
                warn!("Service discovery failed (attempt {}), retrying: {}", attempts, err);
                self.start_settle();
            },
            Err(err) => {
                warn!("Service discovery failed after {} attempts: {}", attempts, err);
                let detail = err.to_string();
                self.fail(LinkError::DiscoveryFailed { detail }, DisconnectReason::DiscoveryFailed).await;
            },
        }
    }

    async fn capabilities_ready(&mut self, write_channel: T::Channel) {
        let (device, address) = match &self.state {
            ConnectionState::Discovering { device, address, .. } => (device.clone(), address.clone()),
            other => {
                debug!("Ignoring a discovered capability in {}", other.name());
                return;
            },
        };

        let mut commands = CommandChannel::new(self.tuning.min_send_interval, self.tuning.send_policy);
        commands.arm();
        self.state = ConnectionState::Ready { device, write_channel, commands };
        self.ready.store(true, Ordering::Relaxed);

        info!("{} at {} is ready for drive commands", self.identity.name, address);
        self.emit(DeviceEvent::CapabilitiesReady).await;
    }

    async fn connect_failed(&mut self, detail: String) {
        let address = match &self.state {
            ConnectionState::Connecting { address, .. } => address.clone(),
            other => {
                debug!("Ignoring a connect failure in {}", other.name());
                return;
            },
        };

        warn!("Failed to connect to {}: {}", address, detail);
        self.fail(
            LinkError::ConnectFailed { address, detail },
            DisconnectReason::ConnectFailed,
        ).await;
    }

    async fn link_dropped(&mut self) {
        match &self.state {
            ConnectionState::Connecting { .. } => {
                self.connect_failed(String::from("the link dropped during connect")).await;
            },
            ConnectionState::Discovering { .. } | ConnectionState::Ready { .. } => {
                warn!("The connection to {} was lost", self.identity.name);
                self.fail(LinkError::LinkLost, DisconnectReason::LinkLost).await;
            },
            other => {
                debug!("Ignoring a disconnect notification in {}", other.name());
            },
        }
    }

    async fn disconnect(&mut self) {
        if matches!(self.state, ConnectionState::Idle) {
            debug!("Disconnect requested while idle");
            return;
        }

        info!("Disconnecting...");
        self.tear_down(DisconnectReason::Requested).await;
    }

    /**
     * Cleans up after an error that ends the connection attempt, then
     * surfaces the error. Resources are always released first.
     */
    async fn fail(&mut self, error: LinkError, reason: DisconnectReason) {
        self.tear_down(reason).await;
        self.emit(DeviceEvent::Error(error)).await;
    }

    /**
     * Releases everything the current attempt holds: helper tasks are
     * cancelled, their not-yet-delivered events are invalidated by bumping
     * the generation, the scan or connection is closed. Ends in `Idle`, so
     * a new scan may start right away.
     */
    async fn tear_down(&mut self, reason: DisconnectReason) {
        self.attempt_cancel.cancel();
        self.attempt_cancel = self.cancel.child_token();
        self.generation += 1;
        self.ready.store(false, Ordering::Relaxed);

        match std::mem::replace(&mut self.state, ConnectionState::Disconnected { reason }) {
            ConnectionState::Idle | ConnectionState::Disconnected { .. } => {},
            ConnectionState::Scanning { session, .. } => {
                session.shutdown().await;
            },
            ConnectionState::Connecting { device, .. } => {
                self.transport.close(&device).await;
            },
            ConnectionState::Discovering { device, .. } => {
                self.transport.close(&device).await;
            },
            ConnectionState::Ready { device, mut commands, .. } => {
                commands.disarm();
                self.transport.close(&device).await;
            },
        }

        if let ConnectionState::Disconnected { reason } = &self.state {
            let reason = *reason;
            self.emit(DeviceEvent::Disconnected { reason }).await;
        }
        self.state = ConnectionState::Idle;
    }

    async fn emit(&mut self, event: DeviceEvent) {
        for sender in &mut self.subscribers {
            if let Err(err) = sender.send(event.clone()).await {
                debug!("A device event subscriber went away: {:?}", err);
            }
        }
    }

    fn flush_deadline(&self) -> Option<Instant> {
        match &self.state {
            ConnectionState::Ready { commands, .. } => commands.flush_deadline(),
            _ => None,
        }
    }

    async fn shutdown(mut self) {
        if !matches!(self.state, ConnectionState::Idle) {
            self.tear_down(DisconnectReason::Shutdown).await;
        }
    }
}

async fn flush_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => futures::future::pending::<()>().await,
    }
}

/**
 * Spawns the link task that owns the connection lifecycle: scanning for the
 * named device, connecting, discovering the drive characteristic, pacing
 * writes while ready, and cleaning up on every exit. All transport
 * completions are marshaled onto this one task before any state changes.
 * Lifecycle and error events are fanned out to every subscriber.
 */
pub fn link_task<T, G>(
    transport: T,
    gate: G,
    identity: DeviceIdentity,
    tuning: LinkTuning,
    subscribers: Vec<Sender<DeviceEvent>>,
    cancel: CancellationToken,
) -> (LinkHandle, JoinHandle<()>)
where
    T: Transport,
    G: PermissionGate,
{
    let (command_sender, mut command_receiver) = channel::<LinkCommand>(128);
    let (event_sender, mut event_receiver) =
        channel::<(u64, LinkEvent<T::Device, T::Channel>)>(128);
    let ready = Arc::new(AtomicBool::new(false));

    let handle = LinkHandle {
        commands: command_sender,
        ready: Arc::clone(&ready),
        next_seq: Arc::new(AtomicU64::new(0)),
    };

    let task_cancel = cancel;
    let join = spawn(async move {
        let mut link = Link {
            transport: Arc::new(transport),
            gate,
            identity,
            tuning,
            state: ConnectionState::Idle,
            subscribers,
            events_tx: event_sender,
            generation: 0,
            attempt_cancel: task_cancel.child_token(),
            permission_requested: false,
            ready,
            cancel: task_cancel.clone(),
        };

        'mainloop: loop {
            let flush_at = link.flush_deadline();

            tokio::select! {
                _ = task_cancel.cancelled() => {
                    break 'mainloop;
                },
                Some(command) = command_receiver.next() => {
                    link.handle_command(command).await;
                },
                Some((generation, event)) = event_receiver.next() => {
                    link.handle_event(generation, event).await;
                },
                _ = flush_due(flush_at) => {
                    link.pump_writes();
                },
            }
        }

        link.shutdown().await;
    });

    (handle, join)
}
