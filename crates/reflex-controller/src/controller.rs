//! The reflex controller
//!
//! Owns the address→processor table, the pin index, the scheduler state, and
//! the current sync token. All mutation happens on one worker task draining
//! the controller mailbox; producers only ever enqueue commands through a
//! [`ControllerHandle`]. No error escapes the worker loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reflex_core::{
    DeviceAddress, LifecycleState, Message, PlatformMessage, ProtocolBody, ProtocolMessage,
};
use reflex_driver::DriverCache;
use reflex_engine::{HandleResult, Processor};
use reflex_store::{DeviceTable, StateStore};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::ControllerConfig;
use crate::pins::{pin_digest, PinIndex};
use crate::scheduler::{spawn_wheel, Schedule, TaskOutcome, TimerId, WheelHandle};
use crate::sync::SyncReason;
use crate::traits::{Gateway, ProtocolStack};
use crate::wire::SyncResponse;

/// Capability namespace of hub-level control messages
pub const HUB_CAPABILITY: &str = "hub";

/// Hub became authorized against the cloud
pub const MSG_AUTHORIZED: &str = "authorized";
/// New-device acknowledgment
pub const MSG_DEVICE_ADDED: &str = "device_added";
/// Device removed from the platform
pub const MSG_DEVICE_REMOVED: &str = "device_removed";
/// Unpairing force-remove
pub const MSG_FORCE_REMOVE: &str = "force_remove";
/// Explicit sync-needed signal
pub const MSG_SYNC_NEEDED: &str = "sync_needed";

/// Work items drained by the controller worker
#[derive(Debug)]
pub enum Command {
    /// Inbound platform or protocol message
    Inbound(Message),
    /// A scheduled deadline lapsed
    TimerFired(TimerId),
    /// Start a sync cycle
    SyncNeeded(SyncReason),
    /// The cloud answered a sync upload
    SyncResponse(SyncResponse),
    /// Stop the worker
    Shutdown,
}

type TaskFn = Box<dyn FnMut(&mut Controller) -> TaskOutcome + Send>;

pub(crate) struct ScheduledTask {
    /// Owning device; `None` for controller-scoped work (sync retries)
    pub(crate) address: Option<DeviceAddress>,
    pub(crate) schedule: Schedule,
    pub(crate) runs: u32,
    pub(crate) run: TaskFn,
}

/// Enqueue-only handle held by producers
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    /// Enqueue a command; returns false once the controller has stopped
    pub async fn send(&self, command: Command) -> bool {
        self.tx.send(command).await.is_ok()
    }

    /// Enqueue an inbound message
    pub async fn dispatch(&self, message: Message) -> bool {
        self.send(Command::Inbound(message)).await
    }

    /// Enqueue without awaiting (for synchronous receive callbacks); drops
    /// the message when the mailbox is full
    pub fn try_dispatch(&self, message: Message) -> bool {
        self.tx.try_send(Command::Inbound(message)).is_ok()
    }

    /// Request a sync cycle
    pub async fn sync_needed(&self, reason: SyncReason) -> bool {
        self.send(Command::SyncNeeded(reason)).await
    }

    /// Deliver a cloud sync response
    pub async fn sync_response(&self, response: SyncResponse) -> bool {
        self.send(Command::SyncResponse(response)).await
    }

    /// Stop the controller worker
    pub async fn shutdown(&self) -> bool {
        self.send(Command::Shutdown).await
    }
}

/// Single-writer owner of all per-device processors
pub struct Controller {
    pub(crate) config: ControllerConfig,
    pub(crate) store: Arc<StateStore>,
    pub(crate) cache: Arc<DriverCache>,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) stacks: HashMap<String, Arc<dyn ProtocolStack>>,

    pub(crate) processors: HashMap<DeviceAddress, Processor>,
    pub(crate) pins: PinIndex,
    pub(crate) tasks: HashMap<TimerId, ScheduledTask>,
    next_timer_id: u64,
    wheel: Option<WheelHandle>,

    pub(crate) current_sync: Option<String>,
    pub(crate) sync_attempt: u32,
}

impl Controller {
    /// Create a controller; call [`Controller::restore`] to rebuild
    /// processors from persisted state, then [`Controller::spawn`]
    pub fn new(
        config: ControllerConfig,
        store: Arc<StateStore>,
        cache: Arc<DriverCache>,
        gateway: Arc<dyn Gateway>,
        stacks: Vec<Arc<dyn ProtocolStack>>,
    ) -> Self {
        let stacks = stacks
            .into_iter()
            .map(|s| (s.protocol().to_string(), s))
            .collect();

        Self {
            config,
            store,
            cache,
            gateway,
            stacks,
            processors: HashMap::new(),
            pins: PinIndex::default(),
            tasks: HashMap::new(),
            next_timer_id: 1,
            wheel: None,
            current_sync: None,
            sync_attempt: 0,
        }
    }

    /// Start the worker task and the timer wheel; consumes the controller
    pub fn spawn(mut self) -> ControllerHandle {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity);
        self.wheel = Some(spawn_wheel(tx.clone()));

        tokio::spawn(self.run(rx));

        ControllerHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(
            devices = self.processors.len(),
            local_processing = !self.config.disable_local_processing,
            "Reflex controller running"
        );

        while let Some(command) = rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.process(command);
        }

        info!("Reflex controller stopped");
    }

    /// Process one command; every path logs its own failures so the worker
    /// never dies
    pub fn process(&mut self, command: Command) {
        match command {
            Command::Inbound(Message::Platform(message)) => self.dispatch_platform(message),
            Command::Inbound(Message::Protocol(message)) => self.dispatch_protocol(message),
            Command::TimerFired(id) => self.on_timer_fired(id),
            Command::SyncNeeded(reason) => self.on_sync_needed(reason),
            Command::SyncResponse(response) => self.on_sync_response(response),
            Command::Shutdown => {}
        }
    }

    /// Number of live processors
    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Lifecycle state of a device's processor, if one exists
    pub fn processor_state(&self, address: &DeviceAddress) -> Option<LifecycleState> {
        self.processors.get(address).map(Processor::current_state)
    }

    /// Hash candidate pin with the place salt and look it up in the index
    ///
    /// No network or disk I/O; this is safe on the hot path.
    pub fn verify_pin(&self, candidate: &str) -> Option<String> {
        let digest = pin_digest(&self.config.pin_salt, candidate);
        self.pins.verify(&digest).map(String::from)
    }

    /// Schedule a one-shot task for a device; the fire is dropped silently
    /// if the device no longer exists at fire time
    pub fn schedule_once(
        &mut self,
        address: DeviceAddress,
        delay: Duration,
        task: impl FnMut(&mut Controller) -> TaskOutcome + Send + 'static,
    ) -> TimerId {
        self.schedule_internal(Some(address), Schedule::Once(delay), task)
    }

    /// Schedule a periodic task for a device; it reschedules after each run
    /// that returns [`TaskOutcome::Continue`]
    pub fn schedule_periodic(
        &mut self,
        address: DeviceAddress,
        schedule: Schedule,
        task: impl FnMut(&mut Controller) -> TaskOutcome + Send + 'static,
    ) -> TimerId {
        self.schedule_internal(Some(address), schedule, task)
    }

    pub(crate) fn schedule_internal(
        &mut self,
        address: Option<DeviceAddress>,
        schedule: Schedule,
        task: impl FnMut(&mut Controller) -> TaskOutcome + Send + 'static,
    ) -> TimerId {
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;

        let delay = schedule.next_delay(0);
        self.tasks.insert(
            id,
            ScheduledTask {
                address,
                schedule,
                runs: 0,
                run: Box::new(task),
            },
        );
        if let Some(wheel) = &self.wheel {
            wheel.arm(id, delay);
        }
        id
    }

    fn on_timer_fired(&mut self, id: TimerId) {
        // Late fires for cancelled or consumed timers are expected races
        let Some(mut task) = self.tasks.remove(&id) else {
            return;
        };

        if let Some(address) = &task.address {
            if !self.processors.contains_key(address) {
                trace!(address = %address, "Dropping scheduled work for removed device");
                return;
            }
        }

        let outcome = (task.run)(self);

        if task.schedule.is_periodic() {
            match outcome {
                TaskOutcome::Continue => {
                    task.runs = task.runs.saturating_add(1);
                    let delay = task.schedule.next_delay(task.runs);
                    self.tasks.insert(id, task);
                    if let Some(wheel) = &self.wheel {
                        wheel.arm(id, delay);
                    }
                }
                TaskOutcome::Cancel => {
                    trace!("Periodic task cancelled itself");
                }
            }
        }
    }

    fn dispatch_platform(&mut self, message: PlatformMessage) {
        if message.capability == HUB_CAPABILITY {
            self.handle_hub_message(message);
            return;
        }

        match self.processors.get_mut(&message.address) {
            Some(processor) => {
                let result = processor.handle_platform(&message);
                // A consumed write counts as locally owned even when the
                // overall message went unhandled
                let forward = !result.handled && result.consumed.is_empty();
                self.route_outbound(&message.address, result, Some(&message));
                if forward {
                    self.gateway.forward(&Message::Platform(message));
                }
            }
            None => self.gateway.forward(&Message::Platform(message)),
        }
    }

    fn dispatch_protocol(&mut self, message: ProtocolMessage) {
        if self.config.disable_local_processing {
            self.gateway.forward(&Message::Protocol(message));
            return;
        }

        match &message.body {
            ProtocolBody::Online | ProtocolBody::Offline => {
                let target = if message.body == ProtocolBody::Online {
                    LifecycleState::Connected
                } else {
                    LifecycleState::Disconnected
                };
                if let Some(processor) = self.processors.get_mut(&message.address) {
                    let result = processor.set_current_state(target);
                    self.route_outbound(&message.address, result, None);
                }
                // Transport events always continue upstream
                self.gateway.forward(&Message::Protocol(message));
            }
            ProtocolBody::Data(_) => match self.processors.get_mut(&message.address) {
                Some(processor) => {
                    let result = processor.handle_protocol(&message);
                    let forward = !result.handled;
                    self.route_outbound(&message.address, result, None);
                    if forward {
                        self.gateway.forward(&Message::Protocol(message));
                    }
                }
                None => self.gateway.forward(&Message::Protocol(message)),
            },
        }
    }

    fn handle_hub_message(&mut self, message: PlatformMessage) {
        match message.name.as_str() {
            MSG_AUTHORIZED => self.on_sync_needed(SyncReason::Authorized),
            MSG_DEVICE_ADDED => self.on_sync_needed(SyncReason::DeviceAcknowledged),
            MSG_SYNC_NEEDED => self.on_sync_needed(SyncReason::Requested),
            MSG_DEVICE_REMOVED | MSG_FORCE_REMOVE => {
                let address = message.address.clone();
                self.remove_device(&address);
            }
            other => {
                debug!(name = other, "Unrecognized hub message, forwarding");
                self.gateway.forward(&Message::Platform(message));
            }
        }
    }

    /// Tear down a device: shut its processor down and delete every
    /// persisted row for the address
    pub fn remove_device(&mut self, address: &DeviceAddress) {
        if let Some(mut processor) = self.processors.remove(address) {
            debug!(address = %address, "Removing processor");
            let result = processor.shutdown();
            self.route_outbound(address, result, None);
        }

        for table in [DeviceTable::Reflexes, DeviceTable::Drivers] {
            if let Err(e) = self.store.delete_all(table, address) {
                warn!(address = %address, error = %e, "Failed to delete persisted rows");
            }
        }
    }

    /// Route a processor's staged outbound batch through the gateway and
    /// protocol stacks
    pub(crate) fn route_outbound(
        &self,
        address: &DeviceAddress,
        result: HandleResult,
        respond_to: Option<&PlatformMessage>,
    ) {
        if !result.emissions.is_empty() {
            self.gateway.emit(reflex_core::Emission {
                address: address.clone(),
                attributes: result.emissions,
            });
        }

        for payload in result.sends {
            match self.stacks.get(address.protocol()) {
                Some(stack) => stack.send(address, payload),
                None => warn!(
                    protocol = address.protocol(),
                    "No protocol stack for outbound send"
                ),
            }
        }

        if let (Some(body), Some(message)) = (result.response, respond_to) {
            self.gateway
                .respond(address, message.correlation_id.as_deref(), body);
        }
    }

    /// Push a driver's offline-timeout hint to the owning protocol stack
    pub(crate) fn push_offline_timeout(
        &self,
        address: &DeviceAddress,
        timeout: Option<Duration>,
    ) {
        let Some(timeout) = timeout else {
            return;
        };
        match self.stacks.get(address.protocol()) {
            Some(stack) => stack.set_offline_timeout(address, timeout),
            None => warn!(
                protocol = address.protocol(),
                "Unknown protocol for offline-timeout hint"
            ),
        }
    }
}
