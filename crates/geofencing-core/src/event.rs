//! Geofence events and trigger evaluation.
//!
//! An [`Event`] pairs a [`Trigger`] with an [`EventAction`]. The action is a
//! closed set of variants persisted with a `type` discriminator. Evaluating
//! an event against an incoming direction yields an [`Evaluation`]: suppress,
//! fire now, or re-check after the trigger delay.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::counter::CounterMode;
use crate::error::{GeofencingError, Result};
use crate::storage::Document;
use crate::types::{CounterId, Direction, EventId, Minor};

/// Longest accepted trigger delay: 30 days.
pub const MAX_DELAY_SECS: u64 = 30 * 24 * 60 * 60;

/// When an event reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Trigger {
    /// Presence change the event reacts to.
    pub direction: Direction,
    /// Seconds to wait before re-checking and firing. Zero fires at once.
    #[serde(default)]
    #[schema(example = 0)]
    pub delay_secs: u64,
}

impl Trigger {
    /// A trigger firing as soon as `direction` happens.
    #[must_use]
    pub const fn immediate(direction: Direction) -> Self {
        Self {
            direction,
            delay_secs: 0,
        }
    }

    /// A trigger firing `delay_secs` after `direction` if the condition still
    /// holds.
    #[must_use]
    pub const fn delayed(direction: Direction, delay_secs: u64) -> Self {
        Self {
            direction,
            delay_secs,
        }
    }

    /// Delay before firing.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Rejects delays above [`MAX_DELAY_SECS`].
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::DelayOutOfRange`] for an oversized delay.
    pub fn validate(&self) -> Result<()> {
        if self.delay_secs > MAX_DELAY_SECS {
            return Err(GeofencingError::DelayOutOfRange {
                delay_secs: self.delay_secs,
                max_secs: MAX_DELAY_SECS,
            });
        }
        Ok(())
    }
}

/// What an event does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum EventAction {
    /// Change a counter. A fresh counter is allocated when none is bound.
    ModifyCounter {
        /// Bound counter.
        #[serde(default)]
        counter_id: Option<CounterId>,
        /// Change to apply.
        mode: CounterMode,
    },

    /// Count devices inside the geofence: enter increments, leave
    /// decrements. Always gets a fresh counter and reacts to both directions
    /// whatever its trigger says.
    GeofenceCounter {
        /// Bound counter, assigned when the event is added.
        #[serde(default)]
        counter_id: Option<CounterId>,
    },

    /// Mail a confirmed recipient.
    SendMail {
        /// Recipient address; must complete the opt-in to receive mail.
        recipient: String,
        /// Subject line.
        subject: String,
        /// Body text.
        message: String,
    },

    /// Push a notification to every administrator.
    AdminNotification {
        /// Notification title.
        title: String,
        /// Notification body.
        message: String,
    },

    /// Push a notification to the triggering device.
    DeviceNotification {
        /// Notification title.
        title: String,
        /// Notification body.
        message: String,
    },
}

impl EventAction {
    /// Variant name as shown in listings.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ModifyCounter { .. } => "ModifyCounterEvent",
            Self::GeofenceCounter { .. } => "GeofenceCounterEvent",
            Self::SendMail { .. } => "SendMailEvent",
            Self::AdminNotification { .. } => "AdminNotificationEvent",
            Self::DeviceNotification { .. } => "DeviceNotificationEvent",
        }
    }

    /// Counter bound to a counter action.
    #[must_use]
    pub const fn counter_id(&self) -> Option<CounterId> {
        match self {
            Self::ModifyCounter { counter_id, .. } | Self::GeofenceCounter { counter_id } => {
                *counter_id
            }
            _ => None,
        }
    }
}

/// Outcome of evaluating an event against a presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The event does not react.
    Suppressed,
    /// Run the action now for the given direction.
    Fire(Direction),
    /// Re-check the condition after the delay, then fire.
    Defer(Duration),
}

/// An event attached to a geofence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    /// Identifier, sequential within the geofence.
    pub event_id: EventId,
    /// Owning geofence.
    pub minor: Minor,
    /// Operator description.
    pub description: String,
    /// When the event reacts.
    pub trigger: Trigger,
    /// What the event does.
    pub action: EventAction,
}

impl Event {
    /// Decides how the event reacts to `direction`.
    #[must_use]
    pub fn evaluate(&self, direction: Direction) -> Evaluation {
        if matches!(self.action, EventAction::GeofenceCounter { .. }) {
            return Evaluation::Fire(direction);
        }

        if self.trigger.direction != direction {
            Evaluation::Suppressed
        } else if self.trigger.delay_secs == 0 {
            Evaluation::Fire(direction)
        } else {
            Evaluation::Defer(self.trigger.delay())
        }
    }

    /// Summary for listings.
    #[must_use]
    pub fn listing(&self) -> EventListing {
        EventListing {
            event_id: self.event_id,
            minor: self.minor,
            description: self.description.clone(),
            kind: self.action.name().to_string(),
            trigger: self.trigger,
        }
    }
}

impl Document for Event {
    type Key = (Minor, EventId);
    const COLLECTION: &'static str = "events";

    fn key(&self) -> (Minor, EventId) {
        (self.minor, self.event_id)
    }
}

/// An event to be added to a geofence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewEvent {
    /// Operator description.
    #[schema(example = "Count visitors")]
    pub description: String,
    /// When the event reacts.
    pub trigger: Trigger,
    /// What the event does.
    pub action: EventAction,
}

/// Event summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EventListing {
    /// Identifier within the geofence.
    pub event_id: EventId,
    /// Owning geofence.
    pub minor: Minor,
    /// Operator description.
    pub description: String,
    /// Variant name, e.g. `SendMailEvent`.
    pub kind: String,
    /// When the event reacts.
    pub trigger: Trigger,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(trigger: Trigger, action: EventAction) -> Event {
        Event {
            event_id: 1,
            minor: 1,
            description: "test".into(),
            trigger,
            action,
        }
    }

    fn notify() -> EventAction {
        EventAction::AdminNotification {
            title: "t".into(),
            message: "m".into(),
        }
    }

    #[test]
    fn test_direction_mismatch_is_suppressed() {
        let e = event(Trigger::immediate(Direction::Enter), notify());
        assert_eq!(e.evaluate(Direction::Leave), Evaluation::Suppressed);
    }

    #[test]
    fn test_immediate_trigger_fires() {
        let e = event(Trigger::immediate(Direction::Leave), notify());
        assert_eq!(e.evaluate(Direction::Leave), Evaluation::Fire(Direction::Leave));
    }

    #[test]
    fn test_delayed_trigger_defers() {
        let e = event(Trigger::delayed(Direction::Enter, 30), notify());
        assert_eq!(
            e.evaluate(Direction::Enter),
            Evaluation::Defer(Duration::from_secs(30))
        );
        assert_eq!(e.evaluate(Direction::Leave), Evaluation::Suppressed);
    }

    #[test]
    fn test_delay_limit() {
        assert!(Trigger::delayed(Direction::Enter, MAX_DELAY_SECS).validate().is_ok());
        let err = Trigger::delayed(Direction::Enter, u64::MAX).validate().unwrap_err();
        assert!(matches!(err, GeofencingError::DelayOutOfRange { delay_secs: u64::MAX, .. }));
        assert_eq!(err.http_status_code(), 400);
    }

    #[test]
    fn test_geofence_counter_ignores_trigger() {
        let e = event(
            Trigger::delayed(Direction::Enter, 60),
            EventAction::GeofenceCounter { counter_id: Some(3) },
        );
        assert_eq!(e.evaluate(Direction::Enter), Evaluation::Fire(Direction::Enter));
        assert_eq!(e.evaluate(Direction::Leave), Evaluation::Fire(Direction::Leave));
    }

    #[test]
    fn test_action_is_tagged() {
        let action = EventAction::ModifyCounter {
            counter_id: None,
            mode: CounterMode::Increment,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "ModifyCounter");
        assert_eq!(json["mode"], "Increment");

        let parsed: EventAction =
            serde_json::from_str(r#"{"type":"GeofenceCounter"}"#).unwrap();
        assert_eq!(parsed, EventAction::GeofenceCounter { counter_id: None });
    }

    #[test]
    fn test_listing_names_variant() {
        let e = event(
            Trigger::immediate(Direction::Enter),
            EventAction::SendMail {
                recipient: "a@example.org".into(),
                subject: "s".into(),
                message: "m".into(),
            },
        );
        let listing = e.listing();
        assert_eq!(listing.kind, "SendMailEvent");
        assert_eq!(listing.event_id, 1);
    }
}
