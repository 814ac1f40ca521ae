//! Refill driver
//! Runs a [`RefillMachine`] on a tokio task, feeding it scale readings,
//! timer expirations and commands from any number of [`RefillHandle`]s.

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::refill_config::RefillConfig;
use crate::core::refill::machine::{
    RefillError, RefillEvent, RefillMachine, RefillSnapshot, ResetCause,
};
use crate::core::refill::session::{Checkout, Product};
use crate::core::scale::ScaleFeed;

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

/// Session changes that only need an acknowledgement
#[derive(Debug)]
enum SessionUpdate {
    Reset,
    SelectProduct(Product),
    SetPurchaseContainer(bool),
    InjectWeight(u32),
    Activity,
}

#[derive(Debug)]
enum RefillCommand {
    ConfirmTare(oneshot::Sender<Result<u32, RefillError>>),
    ConfirmFill(oneshot::Sender<Result<Checkout, RefillError>>),
    Update(SessionUpdate, oneshot::Sender<()>),
}

/// Cloneable handle to a running refill driver.
///
/// The driver stops when [`RefillHandle::shutdown`] is called or when the
/// last handle is dropped.
#[derive(Clone)]
pub struct RefillHandle {
    commands: mpsc::Sender<RefillCommand>,
    snapshot: watch::Receiver<RefillSnapshot>,
    events: broadcast::Sender<RefillEvent>,
    shutdown: CancellationToken,
}

impl RefillHandle {
    /// Starts the driver on the current runtime.
    pub fn spawn(config: RefillConfig, feed: ScaleFeed) -> (Self, JoinHandle<()>) {
        let machine = RefillMachine::new(config, Instant::now());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            machine,
            feed,
            snapshot: snapshot_tx,
            events: events_tx.clone(),
        };
        let task = tokio::spawn(driver.run(commands_rx, shutdown.clone()));

        let handle = Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            events: events_tx,
            shutdown,
        };
        (handle, task)
    }

    /// Captures the settled container weight.
    pub async fn confirm_tare(&self) -> Result<u32, RefillError> {
        let (tx, rx) = oneshot::channel();
        self.send(RefillCommand::ConfirmTare(tx)).await?;
        rx.await.map_err(|_| RefillError::DriverStopped)?
    }

    /// Prices the settled fill and completes the session.
    pub async fn confirm_fill(&self) -> Result<Checkout, RefillError> {
        let (tx, rx) = oneshot::channel();
        self.send(RefillCommand::ConfirmFill(tx)).await?;
        rx.await.map_err(|_| RefillError::DriverStopped)?
    }

    pub async fn reset(&self) -> Result<(), RefillError> {
        self.update(SessionUpdate::Reset).await
    }

    pub async fn select_product(&self, product: Product) -> Result<(), RefillError> {
        self.update(SessionUpdate::SelectProduct(product)).await
    }

    pub async fn set_purchase_container(&self, purchase: bool) -> Result<(), RefillError> {
        self.update(SessionUpdate::SetPurchaseContainer(purchase)).await
    }

    /// Feeds a reading as if the scale had sent it. Used for simulation.
    pub async fn inject_weight(&self, grams: u32) -> Result<(), RefillError> {
        self.update(SessionUpdate::InjectWeight(grams)).await
    }

    pub async fn record_activity(&self) -> Result<(), RefillError> {
        self.update(SessionUpdate::Activity).await
    }

    pub fn snapshot(&self) -> RefillSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Snapshot updates, for UIs that redraw on change
    pub fn watch_snapshot(&self) -> watch::Receiver<RefillSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefillEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn update(&self, update: SessionUpdate) -> Result<(), RefillError> {
        let (tx, rx) = oneshot::channel();
        self.send(RefillCommand::Update(update, tx)).await?;
        rx.await.map_err(|_| RefillError::DriverStopped)
    }

    async fn send(&self, command: RefillCommand) -> Result<(), RefillError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RefillError::DriverStopped)
    }
}

struct Driver {
    machine: RefillMachine,
    feed: ScaleFeed,
    snapshot: watch::Sender<RefillSnapshot>,
    events: broadcast::Sender<RefillEvent>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<RefillCommand>, shutdown: CancellationToken) {
        info!("Refill driver started.");
        self.sync_scale(Instant::now());

        let mut weight_open = true;
        let mut connection_open = true;

        loop {
            let deadline = self.machine.next_deadline();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!("All refill handles dropped.");
                        break;
                    }
                },
                changed = self.feed.weight.changed(), if weight_open => {
                    if changed.is_err() {
                        warn!("Scale weight feed closed.");
                        weight_open = false;
                    }
                    let grams = *self.feed.weight.borrow_and_update();
                    self.machine.observe_weight(grams, Instant::now());
                }
                changed = self.feed.connection.changed(), if connection_open => {
                    if changed.is_err() {
                        warn!("Scale connection feed closed.");
                        connection_open = false;
                    }
                    let connected = self.feed.connection.borrow_and_update().is_connected();
                    self.machine.set_scale_connected(connected, Instant::now());
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }

            self.machine.poll(Instant::now());
            self.publish();
        }

        info!("Refill driver stopped.");
    }

    /// Commands win the biased select, so readings that arrived alongside
    /// one are applied before it runs.
    fn absorb_scale(&mut self, now: Instant) {
        if self.feed.connection.has_changed().unwrap_or(false) {
            let connected = self.feed.connection.borrow_and_update().is_connected();
            self.machine.set_scale_connected(connected, now);
        }
        if self.feed.weight.has_changed().unwrap_or(false) {
            let grams = *self.feed.weight.borrow_and_update();
            self.machine.observe_weight(grams, now);
        }
    }

    fn sync_scale(&mut self, now: Instant) {
        let connected = self.feed.connection.borrow_and_update().is_connected();
        let grams = *self.feed.weight.borrow_and_update();
        self.machine.set_scale_connected(connected, now);
        self.machine.observe_weight(grams, now);
        self.publish();
    }

    /// Applies a command. State is published before the caller hears back.
    fn handle(&mut self, command: RefillCommand) {
        let now = Instant::now();
        self.absorb_scale(now);
        match command {
            RefillCommand::ConfirmTare(reply) => {
                let result = self.machine.confirm_tare(now);
                self.publish();
                let _ = reply.send(result);
            }
            RefillCommand::ConfirmFill(reply) => {
                let result = self.machine.confirm_fill(now);
                self.publish();
                let _ = reply.send(result);
            }
            RefillCommand::Update(update, reply) => {
                self.machine.poll(now);
                match update {
                    SessionUpdate::Reset => self.machine.reset(ResetCause::Requested, now),
                    SessionUpdate::SelectProduct(product) => {
                        self.machine.select_product(product, now)
                    }
                    SessionUpdate::SetPurchaseContainer(purchase) => {
                        self.machine.set_purchase_container(purchase, now)
                    }
                    SessionUpdate::InjectWeight(grams) => self.machine.observe_weight(grams, now),
                    SessionUpdate::Activity => self.machine.record_activity(now),
                }
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    /// Snapshot first, so an event listener always reads the state it describes.
    fn publish(&mut self) {
        let snapshot = self.machine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        for event in self.machine.drain_events() {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}
