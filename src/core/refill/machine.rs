//! Refill state machine
//! Drives the tare → fill → price sequence from weight readings, timer
//! expirations and customer actions.
//!
//! ```text
//! Welcome ──dwell──▶ ConnectScale ──connected──▶ EmptyContainer
//!    └────dwell, already connected──────────────────▲    │ confirm tare
//!                                                        ▼
//!                 Done ◀──confirm fill── FillProduct ◀──delay── TareWeight
//! ```
//!
//! The machine is pure: every input carries the current instant, and the
//! caller asks [`RefillMachine::next_deadline`] when to call
//! [`RefillMachine::poll`] next. Each state owns its own deadline or
//! stability window, so leaving a state drops its timers with it.

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::refill_config::RefillConfig;
use crate::core::refill::session::{Checkout, Product, RefillSession, total_price};
use crate::core::refill::stability::StabilityFilter;

/// Step identifier for the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillStep {
    Welcome,
    ConnectScale,
    EmptyContainer,
    TareWeight,
    FillProduct,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetCause {
    Requested,
    IdleTimeout,
}

/// Observable outputs of the machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RefillEvent {
    StepChanged { from: RefillStep, to: RefillStep },
    /// Edge-triggered: the confirm action became available or was lost
    ConfirmAvailability { step: RefillStep, enabled: bool },
    TareCaptured { bottle_weight: u32 },
    Completed { checkout: Checkout },
    SessionReset { cause: ResetCause },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefillError {
    #[error("not available in step {actual:?} (needs {expected:?})")]
    WrongStep {
        expected: RefillStep,
        actual: RefillStep,
    },
    #[error("weight has not settled yet")]
    NotStable,
    #[error("no product selected")]
    NoProductSelected,
    #[error("container weight was never captured")]
    MissingTare,
    #[error("price exceeds the supported range")]
    PriceOverflow,
    #[error("refill driver is not running")]
    DriverStopped,
}

/// Everything the UI needs to render the current step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefillSnapshot {
    pub step: RefillStep,
    pub weight: u32,
    pub scale_connected: bool,
    pub confirm_enabled: bool,
    pub session: RefillSession,
    /// Live price while filling
    pub price_preview: Option<u64>,
}

enum Phase {
    Welcome { dwell_until: Instant },
    ConnectScale,
    EmptyContainer { filter: StabilityFilter },
    TareWeight { advance_at: Instant },
    FillProduct { filter: StabilityFilter },
    Done,
}

impl Phase {
    fn step(&self) -> RefillStep {
        match self {
            Self::Welcome { .. } => RefillStep::Welcome,
            Self::ConnectScale => RefillStep::ConnectScale,
            Self::EmptyContainer { .. } => RefillStep::EmptyContainer,
            Self::TareWeight { .. } => RefillStep::TareWeight,
            Self::FillProduct { .. } => RefillStep::FillProduct,
            Self::Done => RefillStep::Done,
        }
    }

    fn filter(&self) -> Option<&StabilityFilter> {
        match self {
            Self::EmptyContainer { filter } | Self::FillProduct { filter } => Some(filter),
            _ => None,
        }
    }

    fn filter_mut(&mut self) -> Option<&mut StabilityFilter> {
        match self {
            Self::EmptyContainer { filter } | Self::FillProduct { filter } => Some(filter),
            _ => None,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Welcome { dwell_until } => Some(*dwell_until),
            Self::TareWeight { advance_at } => Some(*advance_at),
            Self::EmptyContainer { filter } | Self::FillProduct { filter } => filter.deadline(),
            Self::ConnectScale | Self::Done => None,
        }
    }
}

/// What `poll` found due
enum Due {
    WelcomeElapsed,
    TareShown,
    Settled(RefillStep),
}

pub struct RefillMachine {
    config: RefillConfig,
    phase: Phase,
    session: RefillSession,
    weight: u32,
    scale_connected: bool,
    idle_deadline: Option<Instant>,
    events: Vec<RefillEvent>,
}

impl RefillMachine {
    pub fn new(config: RefillConfig, now: Instant) -> Self {
        let phase = Phase::Welcome {
            dwell_until: now + config.welcome_dwell(),
        };
        let mut machine = Self {
            config,
            phase,
            session: RefillSession::default(),
            weight: 0,
            scale_connected: false,
            idle_deadline: None,
            events: Vec::new(),
        };
        machine.touch(now);
        machine
    }

    pub fn step(&self) -> RefillStep {
        self.phase.step()
    }

    pub fn session(&self) -> &RefillSession {
        &self.session
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn scale_connected(&self) -> bool {
        self.scale_connected
    }

    pub fn confirm_enabled(&self) -> bool {
        self.phase.filter().is_some_and(StabilityFilter::is_stable)
    }

    /// Price the customer would pay for the weight currently on the scale.
    pub fn price_preview(&self) -> Option<u64> {
        if self.step() != RefillStep::FillProduct {
            return None;
        }
        let bottle = self.session.bottle_weight?;
        let product = self.session.selected_product.as_ref()?;
        let fill = self.weight.checked_sub(bottle).filter(|fill| *fill > 0)?;
        total_price(product.price_per_gram, fill, self.container_fee())
    }

    pub fn snapshot(&self) -> RefillSnapshot {
        RefillSnapshot {
            step: self.step(),
            weight: self.weight,
            scale_connected: self.scale_connected,
            confirm_enabled: self.confirm_enabled(),
            session: self.session.clone(),
            price_preview: self.price_preview(),
        }
    }

    /// The earliest instant at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.idle_deadline, self.phase.deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn drain_events(&mut self) -> Vec<RefillEvent> {
        std::mem::take(&mut self.events)
    }

    /// Feeds a weight reading, live or injected.
    pub fn observe_weight(&mut self, grams: u32, now: Instant) {
        self.weight = grams;
        let step = self.step();
        if let Some(filter) = self.phase.filter_mut() {
            if filter.observe(grams, now) {
                debug!("Weight moved to {} g, confirm disabled", grams);
                self.events.push(RefillEvent::ConfirmAvailability {
                    step,
                    enabled: false,
                });
            }
        }
    }

    /// Connection changes never move the machine backwards.
    pub fn set_scale_connected(&mut self, connected: bool, now: Instant) {
        if self.scale_connected == connected {
            return;
        }
        self.scale_connected = connected;
        if !connected {
            warn!("Scale disconnected during {:?}.", self.step());
            return;
        }
        if self.step() == RefillStep::ConnectScale {
            self.enter(self.empty_container(), now);
        }
    }

    /// Fires every timer that is due at `now`.
    pub fn poll(&mut self, now: Instant) {
        if self.idle_deadline.is_some_and(|deadline| now >= deadline) {
            info!("No activity for {:?}, resetting session.", self.config.idle_timeout());
            self.reset(ResetCause::IdleTimeout, now);
            return;
        }

        let step = self.step();
        let due = match &mut self.phase {
            Phase::Welcome { dwell_until } => {
                (now >= *dwell_until).then_some(Due::WelcomeElapsed)
            }
            Phase::TareWeight { advance_at } => (now >= *advance_at).then_some(Due::TareShown),
            Phase::EmptyContainer { filter } | Phase::FillProduct { filter } => {
                filter.poll(now).then_some(Due::Settled(step))
            }
            Phase::ConnectScale | Phase::Done => None,
        };

        match due {
            Some(Due::WelcomeElapsed) => {
                let next = if self.scale_connected {
                    self.empty_container()
                } else {
                    Phase::ConnectScale
                };
                self.enter(next, now);
            }
            Some(Due::TareShown) => {
                let threshold = self.session.bottle_weight.unwrap_or(0);
                let next = Phase::FillProduct {
                    filter: StabilityFilter::new(self.config.stability_window(), threshold),
                };
                self.enter(next, now);
            }
            Some(Due::Settled(step)) => {
                info!("Weight settled at {} g, confirm enabled.", self.weight);
                self.events.push(RefillEvent::ConfirmAvailability {
                    step,
                    enabled: true,
                });
            }
            None => {}
        }
    }

    /// Stores the settled container weight and moves to the tare display.
    pub fn confirm_tare(&mut self, now: Instant) -> Result<u32, RefillError> {
        self.poll(now);
        self.touch(now);
        self.expect_step(RefillStep::EmptyContainer)?;

        let bottle_weight = self
            .phase
            .filter()
            .and_then(StabilityFilter::stable_weight)
            .ok_or(RefillError::NotStable)?;

        info!("Container weighs {} g.", bottle_weight);
        self.session.bottle_weight = Some(bottle_weight);
        self.events.push(RefillEvent::TareCaptured { bottle_weight });
        self.enter(
            Phase::TareWeight {
                advance_at: now + self.config.tare_advance(),
            },
            now,
        );
        Ok(bottle_weight)
    }

    /// Prices the settled fill and completes the session.
    pub fn confirm_fill(&mut self, now: Instant) -> Result<Checkout, RefillError> {
        self.poll(now);
        self.touch(now);
        self.expect_step(RefillStep::FillProduct)?;

        let combined_weight = self
            .phase
            .filter()
            .and_then(StabilityFilter::stable_weight)
            .ok_or(RefillError::NotStable)?;
        let bottle_weight = self.session.bottle_weight.ok_or(RefillError::MissingTare)?;
        let product = self
            .session
            .selected_product
            .as_ref()
            .ok_or(RefillError::NoProductSelected)?;
        let fill_weight = combined_weight
            .checked_sub(bottle_weight)
            .ok_or(RefillError::NotStable)?;
        let container_fee = self.container_fee();
        let total = total_price(product.price_per_gram, fill_weight, container_fee)
            .ok_or(RefillError::PriceOverflow)?;

        let checkout = Checkout {
            product_id: product.id.clone(),
            bottle_weight,
            combined_weight,
            fill_weight,
            price_per_gram: product.price_per_gram,
            container_fee: container_fee.unwrap_or(0),
            total_price: total,
            completed_at: Utc::now(),
        };
        info!(
            "Refill complete: {} g of {} for {}.",
            fill_weight, checkout.product_id, total
        );

        self.session.combined_weight = Some(combined_weight);
        self.session.total_price = Some(total);
        self.events.push(RefillEvent::Completed {
            checkout: checkout.clone(),
        });
        self.enter(Phase::Done, now);
        Ok(checkout)
    }

    /// Clears the session and returns to `Welcome`.
    pub fn reset(&mut self, cause: ResetCause, now: Instant) {
        info!("Resetting refill session ({:?}).", cause);
        self.session = RefillSession::default();
        self.events.push(RefillEvent::SessionReset { cause });
        self.touch(now);
        self.enter(
            Phase::Welcome {
                dwell_until: now + self.config.welcome_dwell(),
            },
            now,
        );
    }

    pub fn select_product(&mut self, product: Product, now: Instant) {
        info!("Product {} selected at {}/g.", product.id, product.price_per_gram);
        self.session.selected_product = Some(product);
        self.touch(now);
    }

    pub fn set_purchase_container(&mut self, purchase: bool, now: Instant) {
        self.session.purchase_container = purchase;
        self.touch(now);
    }

    /// Customer activity; pushes the idle timeout back.
    pub fn record_activity(&mut self, now: Instant) {
        self.touch(now);
    }

    fn touch(&mut self, now: Instant) {
        self.idle_deadline = self.config.idle_timeout().map(|timeout| now + timeout);
    }

    fn container_fee(&self) -> Option<u64> {
        self.session
            .purchase_container
            .then_some(self.config.container_fee)
    }

    fn empty_container(&self) -> Phase {
        Phase::EmptyContainer {
            filter: StabilityFilter::new(self.config.stability_window(), 0),
        }
    }

    fn expect_step(&self, expected: RefillStep) -> Result<(), RefillError> {
        let actual = self.step();
        if actual == expected {
            Ok(())
        } else {
            Err(RefillError::WrongStep { expected, actual })
        }
    }

    /// Replaces the current state. The old state's timers go with it.
    fn enter(&mut self, next: Phase, now: Instant) {
        let from = self.step();
        self.phase = next;
        let to = self.step();
        if from != to {
            info!("Step changed: {:?} -> {:?}", from, to);
            self.events.push(RefillEvent::StepChanged { from, to });
        }
        // Whatever is already on the scale starts the new window.
        let weight = self.weight;
        if let Some(filter) = self.phase.filter_mut() {
            filter.observe(weight, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn shampoo() -> Product {
        Product {
            id: "shampoo".into(),
            name: "Shampoo".into(),
            price_per_gram: 10,
            original_price: Some(12_000),
            original_gram: Some(500),
        }
    }

    fn steps(events: &[RefillEvent]) -> Vec<RefillStep> {
        events
            .iter()
            .filter_map(|e| match e {
                RefillEvent::StepChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    /// A machine sitting in EmptyContainer with a connected scale.
    fn at_empty_container(t0: Instant) -> RefillMachine {
        let mut machine = RefillMachine::new(RefillConfig::default(), t0);
        machine.set_scale_connected(true, t0);
        machine.poll(t0 + ms(2_000));
        assert_eq!(machine.step(), RefillStep::EmptyContainer);
        machine.drain_events();
        machine
    }

    /// A machine sitting in FillProduct with a 50 g bottle tared.
    fn at_fill_product(t0: Instant) -> (RefillMachine, Instant) {
        let mut machine = at_empty_container(t0);
        let t = t0 + ms(2_000);
        machine.observe_weight(50, t);
        machine.confirm_tare(t + ms(1_000)).unwrap();
        let t = t + ms(4_000);
        machine.poll(t);
        assert_eq!(machine.step(), RefillStep::FillProduct);
        machine.drain_events();
        (machine, t)
    }

    #[test]
    fn welcome_goes_to_connect_scale_without_scale() {
        let t0 = Instant::now();
        let mut machine = RefillMachine::new(RefillConfig::default(), t0);
        assert_eq!(machine.step(), RefillStep::Welcome);

        machine.poll(t0 + ms(1_999));
        assert_eq!(machine.step(), RefillStep::Welcome);
        machine.poll(t0 + ms(2_000));
        assert_eq!(machine.step(), RefillStep::ConnectScale);
        assert_eq!(machine.next_deadline(), Some(t0 + ms(300_000)));

        machine.set_scale_connected(true, t0 + ms(5_000));
        assert_eq!(machine.step(), RefillStep::EmptyContainer);
        assert_eq!(
            steps(&machine.drain_events()),
            vec![RefillStep::ConnectScale, RefillStep::EmptyContainer]
        );
    }

    #[test]
    fn welcome_skips_connect_when_scale_present() {
        let t0 = Instant::now();
        let mut machine = RefillMachine::new(RefillConfig::default(), t0);
        machine.set_scale_connected(true, t0);
        assert_eq!(machine.step(), RefillStep::Welcome);
        machine.poll(t0 + ms(2_000));
        assert_eq!(machine.step(), RefillStep::EmptyContainer);
    }

    #[test]
    fn tare_enables_exactly_at_window_end() {
        let t0 = Instant::now();
        let mut machine = at_empty_container(t0);
        let t = t0 + ms(3_000);
        machine.observe_weight(48, t);
        assert_eq!(machine.next_deadline(), Some(t + ms(1_000)));

        machine.poll(t + ms(999));
        assert!(!machine.confirm_enabled());
        assert_eq!(machine.confirm_tare(t + ms(999)), Err(RefillError::NotStable));

        machine.poll(t + ms(1_000));
        assert!(machine.confirm_enabled());
        machine.poll(t + ms(1_500));
        let enabled: Vec<_> = machine
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, RefillEvent::ConfirmAvailability { enabled: true, .. }))
            .collect();
        assert_eq!(enabled.len(), 1);
    }

    #[test]
    fn zero_weight_never_enables_tare() {
        let t0 = Instant::now();
        let mut machine = at_empty_container(t0);
        machine.observe_weight(0, t0 + ms(2_000));
        machine.poll(t0 + ms(60_000));
        assert!(!machine.confirm_enabled());
    }

    #[test]
    fn weight_already_on_scale_arms_on_entry() {
        let t0 = Instant::now();
        let mut machine = RefillMachine::new(RefillConfig::default(), t0);
        machine.set_scale_connected(true, t0);
        machine.observe_weight(60, t0 + ms(500));
        machine.poll(t0 + ms(2_000));
        assert_eq!(machine.step(), RefillStep::EmptyContainer);
        machine.poll(t0 + ms(3_000));
        assert!(machine.confirm_enabled());
    }

    #[test]
    fn weight_change_disables_confirm() {
        let t0 = Instant::now();
        let mut machine = at_empty_container(t0);
        let t = t0 + ms(2_000);
        machine.observe_weight(48, t);
        machine.poll(t + ms(1_000));
        assert!(machine.confirm_enabled());

        machine.observe_weight(52, t + ms(1_200));
        assert!(!machine.confirm_enabled());
        assert!(machine.drain_events().contains(&RefillEvent::ConfirmAvailability {
            step: RefillStep::EmptyContainer,
            enabled: false,
        }));
        machine.poll(t + ms(2_200));
        assert!(machine.confirm_enabled());
        assert_eq!(machine.confirm_tare(t + ms(2_200)), Ok(52));
    }

    #[test]
    fn tare_then_fill_after_delay() {
        let t0 = Instant::now();
        let mut machine = at_empty_container(t0);
        let t = t0 + ms(2_000);
        machine.observe_weight(50, t);
        assert_eq!(machine.confirm_tare(t + ms(1_000)), Ok(50));
        assert_eq!(machine.step(), RefillStep::TareWeight);
        assert_eq!(machine.session().bottle_weight, Some(50));

        machine.poll(t + ms(3_999));
        assert_eq!(machine.step(), RefillStep::TareWeight);
        machine.poll(t + ms(4_000));
        assert_eq!(machine.step(), RefillStep::FillProduct);
    }

    #[test]
    fn fill_never_enables_at_or_below_bottle_weight() {
        let t0 = Instant::now();
        let (mut machine, t) = at_fill_product(t0);
        machine.poll(t + ms(10_000));
        assert!(!machine.confirm_enabled());

        machine.observe_weight(40, t + ms(10_000));
        machine.poll(t + ms(30_000));
        assert!(!machine.confirm_enabled());
        assert_eq!(machine.price_preview(), None);
        assert_eq!(
            machine.confirm_fill(t + ms(30_000)),
            Err(RefillError::NotStable)
        );
    }

    #[test]
    fn fill_prices_the_refill() {
        let t0 = Instant::now();
        let (mut machine, t) = at_fill_product(t0);
        machine.select_product(shampoo(), t);
        machine.set_purchase_container(true, t);
        machine.observe_weight(250, t);
        assert_eq!(machine.price_preview(), Some(2_500));
        machine.poll(t + ms(1_000));

        let checkout = machine.confirm_fill(t + ms(1_000)).unwrap();
        assert_eq!(checkout.fill_weight, 200);
        assert_eq!(checkout.container_fee, 500);
        assert_eq!(checkout.total_price, 2_500);
        assert_eq!(machine.step(), RefillStep::Done);
        assert_eq!(machine.session().combined_weight, Some(250));
        assert_eq!(machine.session().total_price, Some(2_500));
        assert!(
            machine
                .drain_events()
                .iter()
                .any(|e| matches!(e, RefillEvent::Completed { .. }))
        );
        assert_eq!(machine.next_deadline(), Some(t + ms(301_000)));
    }

    #[test]
    fn fill_without_product_is_refused() {
        let t0 = Instant::now();
        let (mut machine, t) = at_fill_product(t0);
        machine.observe_weight(250, t);
        assert_eq!(
            machine.confirm_fill(t + ms(1_000)),
            Err(RefillError::NoProductSelected)
        );
        assert_eq!(machine.step(), RefillStep::FillProduct);
    }

    #[test]
    fn confirm_in_wrong_step_is_refused() {
        let t0 = Instant::now();
        let mut machine = RefillMachine::new(RefillConfig::default(), t0);
        assert_eq!(
            machine.confirm_fill(t0),
            Err(RefillError::WrongStep {
                expected: RefillStep::FillProduct,
                actual: RefillStep::Welcome,
            })
        );
    }

    #[test]
    fn tare_timer_is_dropped_by_reset() {
        let t0 = Instant::now();
        let mut machine = at_empty_container(t0);
        let t = t0 + ms(2_000);
        machine.observe_weight(50, t);
        machine.confirm_tare(t + ms(1_000)).unwrap();

        machine.reset(ResetCause::Requested, t + ms(1_500));
        // The tare delay would have fired here; the welcome dwell has not.
        machine.poll(t + ms(3_400));
        assert_eq!(machine.step(), RefillStep::Welcome);
    }

    #[test]
    fn reset_clears_session_from_any_step() {
        let t0 = Instant::now();
        let (mut machine, t) = at_fill_product(t0);
        machine.select_product(shampoo(), t);
        machine.set_purchase_container(true, t);

        machine.reset(ResetCause::Requested, t);
        assert_eq!(machine.step(), RefillStep::Welcome);
        assert_eq!(*machine.session(), RefillSession::default());
        assert!(
            machine
                .drain_events()
                .contains(&RefillEvent::SessionReset {
                    cause: ResetCause::Requested
                })
        );
    }

    #[test]
    fn idle_timeout_resets_session() {
        let t0 = Instant::now();
        let mut machine = at_empty_container(t0);
        machine.select_product(shampoo(), t0 + ms(10_000));
        machine.poll(t0 + ms(309_999));
        assert_eq!(machine.step(), RefillStep::EmptyContainer);

        machine.poll(t0 + ms(310_000));
        assert_eq!(machine.step(), RefillStep::Welcome);
        assert_eq!(machine.session().selected_product, None);
    }

    #[test]
    fn disconnect_does_not_move_backwards() {
        let t0 = Instant::now();
        let (mut machine, t) = at_fill_product(t0);
        machine.set_scale_connected(false, t);
        machine.observe_weight(0, t);
        assert_eq!(machine.step(), RefillStep::FillProduct);
        assert!(!machine.snapshot().scale_connected);
    }
}
