//! # State Hub
//!
//! The hub owns the [`MowerState`] and the set of connected clients. It runs as a single task
//! which is the only writer of both: client registration, operator commands, and telemetry from
//! the sampling loop all arrive as [`HubEvent`]s on one bounded queue and are applied in order.
//!
//! The state is published to every client on a fixed period, and immediately after each accepted
//! command. Publishing never waits on a client: a client whose send queue is full is dropped.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Per connection send and receive tasks
pub mod client;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc
};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use serde::{Serialize, Deserialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};

use util::time::seconds_to_period_or;
use comms_if::{
    tc::Tc,
    tm::{MowerState, PlatformState, STATUS_LOW, STATUS_OK}
};

use crate::{orient_est::Orientation, tc_processor};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Lower bound on the publish period, the timer cannot run with a zero period
const MIN_PUBLISH_PERIOD: Duration = Duration::from_millis(1);

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Unique identifier of a client connection.
pub type ClientId = u64;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubParams {
    /// Period between state publications
    pub publish_period_s: f64,

    /// Capacity of the hub's event queue
    pub event_queue_len: usize,
}

/// Handle used to send events to the hub. Cheap to clone.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
    next_id: Arc<AtomicU64>,
}

pub struct StateHub {
    state: MowerState,
    clients: HashMap<ClientId, mpsc::Sender<String>>,
    rx: mpsc::Receiver<HubEvent>,
    publish_period: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Events processed by the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// Add a client, published states will be pushed onto its queue
    Register {
        id: ClientId,
        queue: mpsc::Sender<String>
    },

    /// Remove a client and close its queue
    Unregister(ClientId),

    /// A raw command message received from a client
    Command(String),

    /// New values from the sampling loop
    Telemetry(TelemetryUpdate),
}

/// Sensor and host data produced by the sampling loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryUpdate {
    /// Power monitor readings, `None` if the read failed this cycle
    Power {
        voltage: Option<f64>,
        current: Option<f64>
    },

    Orientation(Orientation),

    Platform(PlatformState),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    #[error("The state hub has stopped")]
    Closed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HubHandle {
    /// Allocate a new client ID.
    pub fn next_client_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register(&self, id: ClientId, queue: mpsc::Sender<String>) -> Result<(), HubError> {
        self.send(HubEvent::Register { id, queue }).await
    }

    pub async fn unregister(&self, id: ClientId) -> Result<(), HubError> {
        self.send(HubEvent::Unregister(id)).await
    }

    /// Forward a raw command message to the hub.
    pub async fn command(&self, text: String) -> Result<(), HubError> {
        self.send(HubEvent::Command(text)).await
    }

    /// Send telemetry from a thread outside the async runtime, blocking while the queue is full.
    pub fn blocking_telemetry(&self, update: TelemetryUpdate) -> Result<(), HubError> {
        self.tx
            .blocking_send(HubEvent::Telemetry(update))
            .map_err(|_| HubError::Closed)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_| HubError::Closed)
    }
}

impl StateHub {
    /// Create a new hub owning the given state, along with a handle to it.
    pub fn new(state: MowerState, params: &HubParams) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(params.event_queue_len.max(1));

        let hub = Self {
            state,
            clients: HashMap::new(),
            rx,
            publish_period: seconds_to_period_or(params.publish_period_s, MIN_PUBLISH_PERIOD),
        };

        let handle = HubHandle {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
        };

        (hub, handle)
    }

    /// Run the hub until shutdown is signalled, returning the final state.
    ///
    /// On exit all client queues are closed, which causes each connection to send a close frame
    /// once its queue has drained.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> MowerState {
        let mut publish_timer = time::interval(self.publish_period);
        publish_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("StateHub running, publishing every {:?}", self.publish_period);

        loop {
            if *shutdown.borrow() {
                break
            }

            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() {
                        break
                    }
                },
                event = self.rx.recv() => match event {
                    Some(e) => {
                        if self.handle_event(e) {
                            self.publish();
                        }
                    },
                    None => break,
                },
                _ = publish_timer.tick() => self.publish(),
            }
        }

        info!("StateHub stopping, closing {} client queue(s)", self.clients.len());
        self.clients.clear();

        self.state
    }

    /// Apply an event. Returns `true` if the state should be published immediately.
    pub fn handle_event(&mut self, event: HubEvent) -> bool {
        match event {
            HubEvent::Register { id, queue } => {
                debug!("Client {} registered", id);
                self.clients.insert(id, queue);
                false
            },
            HubEvent::Unregister(id) => {
                if self.clients.remove(&id).is_some() {
                    debug!("Client {} unregistered", id);
                }
                false
            },
            HubEvent::Command(text) => {
                debug!("Command: {}", text);
                match Tc::from_json(&text) {
                    Ok(tc) => {
                        tc_processor::exec(&mut self.state, &tc);
                        true
                    },
                    Err(e) => {
                        warn!("Ignoring command: {}", e);
                        false
                    }
                }
            },
            HubEvent::Telemetry(update) => {
                self.apply_telemetry(update);
                false
            }
        }
    }

    /// Serialise the state and push it onto every client's queue, dropping clients whose queue is
    /// full or closed.
    pub fn publish(&mut self) {
        if self.clients.is_empty() {
            return
        }

        let text = match self.state.to_message_json() {
            Ok(t) => t,
            Err(e) => {
                error!("Could not serialise the mower state: {}", e);
                return
            }
        };

        self.clients.retain(|id, queue| match queue.try_send(text.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Client {} is not keeping up with the state, dropping it", id);
                false
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Client {} queue closed, dropping it", id);
                false
            }
        });

        trace!("State published to {} client(s)", self.clients.len());
    }

    pub fn state(&self) -> &MowerState {
        &self.state
    }

    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn has_client(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    fn apply_telemetry(&mut self, update: TelemetryUpdate) {
        match update {
            TelemetryUpdate::Power { voltage, current } => {
                let battery = &mut self.state.battery;

                if let Some(v) = voltage {
                    battery.voltage = v;
                    battery.status = if v < battery.voltage_warn {
                        STATUS_LOW.into()
                    }
                    else {
                        STATUS_OK.into()
                    };
                }
                if let Some(c) = current {
                    battery.current = c;
                }
            },
            TelemetryUpdate::Orientation(o) => {
                trace!("Orientation: roll {:.2} deg, pitch {:.2} deg", o.roll_deg, o.pitch_deg);

                if let Some(h) = o.heading {
                    let compass = &mut self.state.orientation;
                    compass.heading = h.degrees;
                    compass.bearing = h.bearing.into();
                    compass.status = STATUS_OK.into();
                }
            },
            TelemetryUpdate::Platform(p) => {
                self.state.platform = p;
            }
        }
    }
}
