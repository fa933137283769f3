//! Heartbeat Publication state machine.
//!
//! The publication is Active while a timer is armed. A Set cancels any running
//! timer, applies the new state and, when both count and period are nonzero,
//! arms a grace delay before the first heartbeat. Each expiry emits one
//! heartbeat, decrements the remaining count and re-arms for the period until
//! the count is exhausted.

use crate::timer::{Scheduler, TimerHandle};
use crate::transport::ControlPdu;
use mesh_wire::heartbeat::HeartbeatPublicationStatus;
use mesh_wire::{
    expand_count_log, expand_period_log, log_of, Features, HeartbeatMessage,
    HeartbeatPublicationSet, StatusCode, COUNT_INFINITE, HEARTBEAT_CONTROL_OPCODE,
    UNASSIGNED_ADDRESS,
};
use std::time::Duration;
use tracing::{debug, info};

/// Features a heartbeat publication may be triggered by
pub const SUPPORTED_FEATURES: Features = Features::all();

/// Heartbeat publication state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// No timer armed
    Disabled,
    /// Timer armed, heartbeats pending
    Active,
}

/// Heartbeat Publication state of a configuration server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPublication {
    /// Destination of heartbeats; unassigned disables publication
    pub destination: u16,
    /// Heartbeats still to send; [`COUNT_INFINITE`] never runs out
    pub count: u32,
    /// Seconds between heartbeats
    pub period_secs: u32,
    /// TTL heartbeats are sent with
    pub ttl: u8,
    /// Features that trigger heartbeats
    pub features: Features,
    /// NetKey index heartbeats are sent under
    pub netkey_index: u16,
    timer: Option<TimerHandle>,
}

impl Default for HeartbeatPublication {
    fn default() -> Self {
        Self {
            destination: UNASSIGNED_ADDRESS,
            count: 0,
            period_secs: 0,
            ttl: 0,
            features: Features::empty(),
            netkey_index: 0,
            timer: None,
        }
    }
}

impl HeartbeatPublication {
    /// Current state
    pub fn state(&self) -> HeartbeatState {
        if self.timer.is_some() {
            HeartbeatState::Active
        } else {
            HeartbeatState::Disabled
        }
    }

    /// Handle of the armed timer, if any
    pub fn timer(&self) -> Option<TimerHandle> {
        self.timer
    }

    /// Interval between heartbeats
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs as u64)
    }

    /// Status message reflecting the current state
    pub fn status(&self, status: StatusCode) -> HeartbeatPublicationStatus {
        HeartbeatPublicationStatus {
            status,
            destination: self.destination,
            count_log: log_of(self.count),
            period_log: log_of(self.period_secs),
            ttl: self.ttl,
            features: self.features,
            netkey_index: self.netkey_index,
        }
    }

    /// Apply a validated Set. Any running timer is cancelled; call
    /// [`HeartbeatPublication::start`] once the status has been sent.
    pub fn apply(&mut self, set: &HeartbeatPublicationSet, scheduler: &mut dyn Scheduler) {
        if let Some(handle) = self.timer.take() {
            scheduler.cancel(handle);
        }

        self.destination = set.destination;
        self.ttl = set.ttl;
        self.features = set.features & SUPPORTED_FEATURES;
        self.netkey_index = set.netkey_index;

        if set.destination == UNASSIGNED_ADDRESS {
            self.count = 0;
            self.period_secs = 0;
            info!(component = "heartbeat", "Heartbeat publication disabled");
            return;
        }

        self.count = expand_count_log(set.count_log).unwrap_or(0);
        self.period_secs = expand_period_log(set.period_log).unwrap_or(0);

        info!(
            component = "heartbeat",
            "Heartbeat publication set: dst=0x{:04x} count={} period={}s ttl={} features={:?}",
            self.destination,
            self.count,
            self.period_secs,
            self.ttl,
            self.features
        );
    }

    /// Arm the first heartbeat after `grace` if publication is enabled.
    /// Returns whether a timer was armed.
    pub fn start(&mut self, scheduler: &mut dyn Scheduler, grace: Duration) -> bool {
        if self.timer.is_some()
            || self.destination == UNASSIGNED_ADDRESS
            || self.count == 0
            || self.period_secs == 0
        {
            return false;
        }

        self.timer = Some(scheduler.arm(grace));
        debug!(component = "heartbeat", "First heartbeat in {:?}", grace);
        true
    }

    /// Handle an expired timer. Returns the heartbeat to send, if any.
    pub fn on_timer(
        &mut self,
        handle: TimerHandle,
        scheduler: &mut dyn Scheduler,
        src: u16,
    ) -> Option<ControlPdu> {
        if self.timer != Some(handle) {
            debug!(component = "heartbeat", "Ignoring stale timer {}", handle.id());
            return None;
        }
        self.timer = None;

        if self.count == 0 {
            info!(component = "heartbeat", "Heartbeat publication exhausted");
            return None;
        }

        let heartbeat = HeartbeatMessage {
            init_ttl: self.ttl,
            features: self.features,
        };
        let pdu = ControlPdu {
            netkey_index: self.netkey_index,
            ttl: self.ttl,
            src,
            dst: self.destination,
            opcode: HEARTBEAT_CONTROL_OPCODE,
            parameters: heartbeat.encode(),
        };

        if self.count != COUNT_INFINITE {
            self.count -= 1;
            // 0x10000 counts down past the indefinite marker
            if self.count == COUNT_INFINITE {
                self.count -= 1;
            }
        }

        debug!(
            component = "heartbeat",
            "Heartbeat to 0x{:04x}, {} remaining",
            self.destination,
            self.count
        );

        if self.count == 0 {
            info!(component = "heartbeat", "Heartbeat publication complete");
        } else {
            self.timer = Some(scheduler.arm(self.period()));
        }

        Some(pdu)
    }
}
