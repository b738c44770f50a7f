//! The geofencing engine.
//!
//! [`GeofenceEngine`] is the single entry point for every operation: the
//! registry of geofences, beacons and events, device registration, beacon
//! reports and the trigger pipeline that turns a presence change into
//! counter updates, notifications and mail.
//!
//! A beacon report flows through the engine like this:
//!
//! 1. unknown beacons are dropped and the rest diffed against the stored
//!    snapshot of the device;
//! 2. if nothing changed the operation ends without writing;
//! 3. otherwise the snapshot is replaced and the geofence of every entered
//!    or left beacon is triggered, entered beacons first;
//! 4. each event of a triggered geofence is evaluated in identifier order and
//!    either fires now, is suppressed, or is handed to the delay scheduler
//!    for a re-check against live state.
//!
//! Failures while running an action are logged and never reach the caller
//! of the operation that caused the trigger.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::beacon::{Beacon, BeaconChange, BeaconKey, BeaconSet};
use crate::config::{Config, ConfigSection};
use crate::counter::{Counter, CounterStore};
use crate::device::Device;
use crate::dispatch::{MailTransport, PushDestination, PushGateway, PushMessage};
use crate::error::{GeofencingError, OrNotFound, Result};
use crate::event::{Evaluation, Event, EventAction, EventListing, NewEvent};
use crate::geofence::{Geofence, GeofenceRecord};
use crate::mail::{self, MailOptIn, VerificationOutcome};
use crate::scheduler::{DelayScheduler, DelayedCheck, DelayedCheckHandler};
use crate::storage::{Store, StoreError};
use crate::types::{CounterId, DeviceId, Direction, EventId, Major, Minor};

const MINOR_SEQUENCE: &str = "minor";
const DEVICE_ID_ATTEMPTS: usize = 16;

fn major_sequence(minor: Minor) -> String {
    format!("major:{minor}")
}

fn event_sequence(minor: Minor) -> String {
    format!("event:{minor}")
}

/// The beacon geofencing engine.
pub struct GeofenceEngine {
    config: Config,
    system_uuid: Uuid,
    store: Arc<Store>,
    counters: CounterStore,
    mail: MailOptIn,
    push: Arc<dyn PushGateway>,
    scheduler: DelayScheduler,
}

impl std::fmt::Debug for GeofenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceEngine")
            .field("system_uuid", &self.system_uuid)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl GeofenceEngine {
    /// Creates an engine. Call [`Self::start`] before reporting beacons so
    /// delayed triggers can be scheduled.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `system.uuid` is unset or invalid.
    pub fn new(
        config: Config,
        store: Arc<Store>,
        push: Arc<dyn PushGateway>,
        mail_transport: Arc<dyn MailTransport>,
    ) -> Result<Self> {
        let system_uuid = config.system.require_uuid()?;
        let counters = CounterStore::new(Arc::clone(&store));
        let mail = MailOptIn::new(Arc::clone(&store), config.mail.clone(), mail_transport);

        Ok(Self {
            config,
            system_uuid,
            store,
            counters,
            mail,
            push,
            scheduler: DelayScheduler::new(),
        })
    }

    /// Starts the delay scheduler on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine was already started.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handler: Weak<dyn DelayedCheckHandler> = weak;
        self.scheduler.start(handler)?;
        tracing::info!(system_uuid = %self.system_uuid, "Geofence engine started");
        Ok(())
    }

    /// Stops the delay scheduler. Pending re-checks are dropped.
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        tracing::info!("Geofence engine stopped");
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Beacon namespace of this installation.
    #[must_use]
    pub const fn system_uuid(&self) -> Uuid {
        self.system_uuid
    }

    /// Counter operations.
    #[must_use]
    pub const fn counters(&self) -> &CounterStore {
        &self.counters
    }

    /// Mail opt-in workflow.
    #[must_use]
    pub const fn mail(&self) -> &MailOptIn {
        &self.mail
    }

    // =========================================================================
    // AUTHORIZATION
    // =========================================================================

    /// Returns `true` if `secret` is the administrator secret. Always `false`
    /// while no secret is configured.
    #[must_use]
    pub fn is_admin(&self, secret: &str) -> bool {
        match self.config.server.require_admin_secret() {
            Ok(expected) => expected == secret,
            Err(_) => {
                tracing::debug!("Administrator secret not configured");
                false
            }
        }
    }

    /// Fails with [`GeofencingError::Unauthorized`] unless `secret` is the
    /// administrator secret.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn check_admin(&self, secret: &str) -> Result<()> {
        if self.is_admin(secret) {
            Ok(())
        } else {
            Err(GeofencingError::Unauthorized)
        }
    }

    /// Returns the device if `address` is its registered address.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::DeviceNotFound`] for an unknown device and
    /// [`GeofencingError::Unauthorized`] for a wrong address.
    pub fn authenticate_device(&self, device_id: DeviceId, address: &str) -> Result<Device> {
        let device = self.get_device(device_id)?;
        if device.address == address {
            Ok(device)
        } else {
            Err(GeofencingError::Unauthorized)
        }
    }

    // =========================================================================
    // GEOFENCES
    // =========================================================================

    /// Creates a geofence and returns its minor.
    ///
    /// # Errors
    ///
    /// Returns an error if every minor has been used or the store fails.
    pub fn add_geofence(&self, description: impl Into<String>) -> Result<Minor> {
        let scan_max = self
            .store
            .geofences()
            .find_all()?
            .iter()
            .map(|g| u32::from(g.minor))
            .max()
            .unwrap_or(0);
        let next = self.store.next_id(MINOR_SEQUENCE, scan_max)?;
        let minor =
            Minor::try_from(next).map_err(|_| GeofencingError::IdentifierSpaceExhausted("geofences"))?;

        self.store.geofences().insert(GeofenceRecord {
            minor,
            description: description.into(),
        })?;
        tracing::info!(minor, "Geofence added");
        Ok(minor)
    }

    /// Returns every geofence record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn list_geofences(&self) -> Result<Vec<GeofenceRecord>> {
        Ok(self.store.geofences().find_all()?)
    }

    fn geofence_record(&self, minor: Minor) -> Result<GeofenceRecord> {
        self.store
            .geofences()
            .find(&minor)
            .or_not_found(|| GeofencingError::GeofenceNotFound(minor))
    }

    fn ensure_geofence(&self, minor: Minor) -> Result<()> {
        self.geofence_record(minor).map(|_| ())
    }

    /// Returns the geofence with its beacons and events.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceNotFound`] for an unknown minor.
    pub fn get_geofence(&self, minor: Minor) -> Result<Geofence> {
        let record = self.geofence_record(minor)?;
        let beacons = self.store.beacons().find_where(|b| b.minor == minor)?;
        let events = self.store.events().find_where(|e| e.minor == minor)?;
        Ok(Geofence::assemble(record, beacons, events))
    }

    /// Deletes a geofence that owns no beacons and no events.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceNotEmpty`] while anything remains
    /// and [`GeofencingError::GeofenceNotFound`] for an unknown minor.
    pub fn remove_geofence(&self, minor: Minor) -> Result<()> {
        let geofence = self.get_geofence(minor)?;
        if !geofence.is_empty() {
            return Err(GeofencingError::GeofenceNotEmpty {
                minor,
                beacons: geofence.beacons.len(),
                events: geofence.events.len(),
            });
        }

        self.store
            .geofences()
            .delete(&minor)
            .or_not_found(|| GeofencingError::GeofenceNotFound(minor))?;
        tracing::info!(minor, "Geofence removed");
        Ok(())
    }

    // =========================================================================
    // BEACONS
    // =========================================================================

    /// Returns a new beacon for the geofence without registering it. Its
    /// major has never been used in the geofence.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceNotFound`] for an unknown minor.
    pub fn generate_beacon(&self, minor: Minor) -> Result<Beacon> {
        self.ensure_geofence(minor)?;
        let scan_max = self
            .store
            .beacons()
            .find_where(|b| b.minor == minor)?
            .iter()
            .map(|b| u32::from(b.major))
            .max()
            .unwrap_or(0);
        let next = self.store.next_id(&major_sequence(minor), scan_max)?;
        let major =
            Major::try_from(next).map_err(|_| GeofencingError::IdentifierSpaceExhausted("beacons"))?;

        Ok(Beacon::new(self.system_uuid, major, minor))
    }

    /// Registers a beacon in the geofence. Returns `false` if the beacon
    /// already exists or does not belong to this installation and geofence.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceNotFound`] for an unknown minor.
    pub fn add_beacon(&self, minor: Minor, beacon: Beacon) -> Result<bool> {
        self.ensure_geofence(minor)?;

        if beacon.uuid != self.system_uuid || beacon.minor != minor {
            tracing::debug!(
                minor,
                major = beacon.major,
                uuid = %beacon.uuid,
                "Beacon does not belong to this geofence"
            );
            return Ok(false);
        }

        let major = beacon.major;
        match self.store.beacons().insert(beacon) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        self.store
            .record_id(&major_sequence(minor), u32::from(major))?;

        tracing::info!(minor, major, "Beacon added");
        Ok(true)
    }

    fn beacon_key(&self, minor: Minor, major: Major) -> BeaconKey {
        BeaconKey {
            uuid: self.system_uuid,
            major,
            minor,
        }
    }

    /// Returns one beacon of the geofence.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::BeaconNotFound`] if it does not exist.
    pub fn get_beacon(&self, minor: Minor, major: Major) -> Result<Beacon> {
        self.store
            .beacons()
            .find(&self.beacon_key(minor, major))
            .or_not_found(|| GeofencingError::BeaconNotFound { minor, major })
    }

    /// Returns the beacons of the geofence.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceNotFound`] for an unknown minor.
    pub fn list_beacons(&self, minor: Minor) -> Result<Vec<Beacon>> {
        self.ensure_geofence(minor)?;
        Ok(self.store.beacons().find_where(|b| b.minor == minor)?)
    }

    /// Unregisters a beacon.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::BeaconNotFound`] if it does not exist.
    pub fn remove_beacon(&self, minor: Minor, major: Major) -> Result<()> {
        self.store
            .beacons()
            .delete(&self.beacon_key(minor, major))
            .or_not_found(|| GeofencingError::BeaconNotFound { minor, major })?;
        tracing::info!(minor, major, "Beacon removed");
        Ok(())
    }

    /// Attaches stored location labels to reported beacons. Unknown beacons
    /// are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn describe_beacons(&self, reported: Vec<Beacon>) -> Result<Vec<Beacon>> {
        reported
            .into_iter()
            .map(|beacon| match self.store.beacons().find(&beacon.key()) {
                Ok(stored) => Ok(stored),
                Err(StoreError::NotFound { .. }) => Ok(beacon),
                Err(e) => Err(e.into()),
            })
            .collect()
    }

    /// Keeps only registered beacons, taking their stored form.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn filter_registered(&self, reported: &BeaconSet) -> Result<BeaconSet> {
        let mut registered = BeaconSet::new();
        for beacon in reported {
            match self.store.beacons().find(&beacon.key()) {
                Ok(stored) => {
                    registered.insert(stored);
                }
                Err(StoreError::NotFound { .. }) => {
                    tracing::trace!(major = beacon.major, minor = beacon.minor, "Ignoring unknown beacon");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(registered)
    }

    // =========================================================================
    // DEVICES
    // =========================================================================

    /// Registers a device under `address` and returns its new identifier.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::InvalidMailAddress`] for a malformed
    /// address and [`GeofencingError::DeviceAlreadyRegistered`] if the
    /// address is taken.
    pub fn register_device(&self, address: &str) -> Result<DeviceId> {
        if !mail::is_valid_address(address) {
            return Err(GeofencingError::InvalidMailAddress(address.to_string()));
        }
        if !self
            .store
            .devices()
            .find_where(|d| d.address == address)?
            .is_empty()
        {
            return Err(GeofencingError::DeviceAlreadyRegistered(address.to_string()));
        }

        for _ in 0..DEVICE_ID_ATTEMPTS {
            let bytes = Uuid::new_v4().into_bytes();
            let device_id = DeviceId::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            if device_id == 0 {
                continue;
            }

            match self
                .store
                .devices()
                .insert(Device::new(device_id, address, Utc::now()))
            {
                Ok(()) => {
                    tracing::info!(device_id, "Device registered");
                    return Ok(device_id);
                }
                Err(StoreError::AlreadyExists { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(GeofencingError::IdentifierSpaceExhausted("devices"))
    }

    /// Returns a device.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::DeviceNotFound`] if it does not exist.
    pub fn get_device(&self, device_id: DeviceId) -> Result<Device> {
        self.store
            .devices()
            .find(&device_id)
            .or_not_found(|| GeofencingError::DeviceNotFound(device_id))
    }

    /// Returns the device registered under `address`.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::DeviceAddressNotFound`] if there is none.
    pub fn get_device_by_address(&self, address: &str) -> Result<Device> {
        self.store
            .devices()
            .find_where(|d| d.address == address)?
            .into_iter()
            .next()
            .ok_or_else(|| GeofencingError::DeviceAddressNotFound(address.to_string()))
    }

    /// Returns every device.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.store.devices().find_all()?)
    }

    /// Unregisters a device.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::DeviceNotFound`] if it does not exist.
    pub fn remove_device(&self, device_id: DeviceId) -> Result<()> {
        self.store
            .devices()
            .delete(&device_id)
            .or_not_found(|| GeofencingError::DeviceNotFound(device_id))?;
        tracing::info!(device_id, "Device removed");
        Ok(())
    }

    /// Sets or clears the push token of a device.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::DeviceNotFound`] if it does not exist.
    pub fn update_push_token(&self, device_id: DeviceId, token: Option<String>) -> Result<()> {
        let token = token.filter(|t| !t.trim().is_empty());
        self.store
            .devices()
            .update(&device_id, |device| device.push_token = token)
            .or_not_found(|| GeofencingError::DeviceNotFound(device_id))?;
        tracing::debug!(device_id, "Push token updated");
        Ok(())
    }

    /// Replaces the beacon snapshot of a device with `reported` and triggers
    /// the affected geofences. Returns `None` if nothing changed.
    ///
    /// Unknown beacons are ignored. Every entered or left beacon triggers its
    /// geofence once, entered beacons first.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::DeviceNotFound`] for an unknown device.
    /// Failures of triggered actions are logged, not returned.
    pub async fn update_device_beacons(
        &self,
        device_id: DeviceId,
        reported: BeaconSet,
    ) -> Result<Option<BeaconChange>> {
        let registered = self.filter_registered(&reported)?;
        let now = Utc::now();

        let change = self
            .store
            .devices()
            .update_if(&device_id, |device| device.update_beacons(registered, now))
            .or_not_found(|| GeofencingError::DeviceNotFound(device_id))?;

        let Some(change) = change else {
            tracing::trace!(device_id, "Beacon report without change");
            return Ok(None);
        };

        tracing::debug!(
            device_id,
            entered = change.entered().len(),
            left = change.left().len(),
            "Beacon snapshot changed"
        );

        let triggers: Vec<(Minor, Direction)> = change
            .entered()
            .iter()
            .map(|beacon| (beacon.minor, Direction::Enter))
            .chain(
                change
                    .left()
                    .iter()
                    .map(|beacon| (beacon.minor, Direction::Leave)),
            )
            .collect();

        for (minor, direction) in triggers {
            match self.trigger_geofence(minor, direction, device_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(device_id, minor, %direction, error = %e, "Trigger skipped");
                }
                Err(e) => {
                    tracing::warn!(device_id, minor, %direction, error = %e, "Trigger failed");
                }
            }
        }

        Ok(Some(change))
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Attaches an event to the geofence and returns its identifier.
    ///
    /// The event's add hook runs first: counter events get their counter,
    /// mail events start the opt-in for their recipient and notification
    /// events check the push settings. If the hook fails the event is
    /// discarded, no identifier is consumed and `None` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceNotFound`] for an unknown minor
    /// and [`GeofencingError::DelayOutOfRange`] for a trigger delay above
    /// [`MAX_DELAY_SECS`](crate::event::MAX_DELAY_SECS).
    pub async fn add_event(&self, minor: Minor, event: NewEvent) -> Result<Option<EventId>> {
        self.ensure_geofence(minor)?;
        event.trigger.validate()?;

        let kind = event.action.name();
        let action = match self.attach(event.action).await {
            Ok(action) => action,
            Err(e) => {
                if e.is_config_error() {
                    self.generate_template(kind);
                }
                tracing::warn!(minor, kind, error = %e, "Event discarded");
                return Ok(None);
            }
        };

        let scan_max = self
            .store
            .events()
            .find_where(|e| e.minor == minor)?
            .iter()
            .map(|e| e.event_id)
            .max()
            .unwrap_or(0);
        let event_id = self.store.next_id(&event_sequence(minor), scan_max)?;

        self.store.events().insert(Event {
            event_id,
            minor,
            description: event.description,
            trigger: event.trigger,
            action,
        })?;

        tracing::info!(minor, event_id, kind, "Event added");
        Ok(Some(event_id))
    }

    async fn attach(&self, action: EventAction) -> Result<EventAction> {
        match action {
            EventAction::ModifyCounter {
                counter_id: None,
                mode,
            } => Ok(EventAction::ModifyCounter {
                counter_id: Some(self.counters.create()?),
                mode,
            }),
            EventAction::ModifyCounter {
                counter_id: Some(counter_id),
                mode,
            } => {
                if !self.counters.exists(counter_id)? {
                    return Err(GeofencingError::CounterNotFound(counter_id));
                }
                Ok(EventAction::ModifyCounter {
                    counter_id: Some(counter_id),
                    mode,
                })
            }
            EventAction::GeofenceCounter { .. } => Ok(EventAction::GeofenceCounter {
                counter_id: Some(self.counters.create()?),
            }),
            EventAction::SendMail {
                recipient,
                subject,
                message,
            } => match self.mail.request_verification(&recipient).await? {
                VerificationOutcome::Pending => Err(GeofencingError::VerificationPending(recipient)),
                VerificationOutcome::Sent | VerificationOutcome::AlreadyConfirmed => {
                    Ok(EventAction::SendMail {
                        recipient,
                        subject,
                        message,
                    })
                }
            },
            action @ EventAction::AdminNotification { .. } => {
                self.config.push.require_admin()?;
                Ok(action)
            }
            action @ EventAction::DeviceNotification { .. } => {
                self.config.push.require_device()?;
                Ok(action)
            }
        }
    }

    fn generate_template(&self, kind: &str) {
        let section = if kind == "SendMailEvent" {
            ConfigSection::Mail
        } else {
            ConfigSection::Push
        };
        if let Err(e) = self.config.write_template(section) {
            tracing::warn!(section = section.name(), error = %e, "Could not write configuration template");
        }
    }

    /// Returns the events of the geofence as listings, in evaluation order.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceNotFound`] for an unknown minor.
    pub fn list_events(&self, minor: Minor) -> Result<Vec<EventListing>> {
        Ok(self.events_of(minor)?.iter().map(Event::listing).collect())
    }

    fn events_of(&self, minor: Minor) -> Result<Vec<Event>> {
        self.ensure_geofence(minor)?;
        let mut events = self.store.events().find_where(|e| e.minor == minor)?;
        events.sort_by_key(|e| e.event_id);
        Ok(events)
    }

    /// Returns one event.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::EventNotFound`] if it does not exist.
    pub fn get_event(&self, minor: Minor, event_id: EventId) -> Result<Event> {
        self.store
            .events()
            .find(&(minor, event_id))
            .or_not_found(|| GeofencingError::EventNotFound { minor, event_id })
    }

    /// Detaches an event. Its counter, if any, is kept.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::EventNotFound`] if it does not exist.
    pub fn remove_event(&self, minor: Minor, event_id: EventId) -> Result<()> {
        self.store
            .events()
            .delete(&(minor, event_id))
            .or_not_found(|| GeofencingError::EventNotFound { minor, event_id })?;
        tracing::info!(minor, event_id, "Event removed");
        Ok(())
    }

    // =========================================================================
    // TRIGGERS
    // =========================================================================

    /// Evaluates every event of the geofence for a presence change of the
    /// device.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceNotFound`] for an unknown minor.
    pub async fn trigger_geofence(
        &self,
        minor: Minor,
        direction: Direction,
        device_id: DeviceId,
    ) -> Result<()> {
        for event in self.events_of(minor)? {
            match event.evaluate(direction) {
                Evaluation::Suppressed => {
                    tracing::debug!(device_id, minor, event_id = event.event_id, %direction, "Event suppressed");
                }
                Evaluation::Fire(direction) => self.fire(&event, direction, device_id).await,
                Evaluation::Defer(delay) => {
                    let check = DelayedCheck {
                        device_id,
                        minor,
                        event_id: event.event_id,
                        direction,
                    };
                    match self.scheduler.schedule(check, delay) {
                        Ok(()) => tracing::debug!(
                            device_id,
                            minor,
                            event_id = event.event_id,
                            %direction,
                            delay_secs = delay.as_secs(),
                            "Re-check scheduled"
                        ),
                        Err(e) => tracing::warn!(
                            device_id,
                            minor,
                            event_id = event.event_id,
                            error = %e,
                            "Could not schedule re-check"
                        ),
                    }
                }
            }
        }
        Ok(())
    }

    async fn fire(&self, event: &Event, direction: Direction, device_id: DeviceId) {
        match self.execute(event, direction, device_id).await {
            Ok(()) => tracing::info!(
                device_id,
                minor = event.minor,
                event_id = event.event_id,
                %direction,
                kind = event.action.name(),
                "Event fired"
            ),
            Err(e) => tracing::warn!(
                device_id,
                minor = event.minor,
                event_id = event.event_id,
                %direction,
                kind = event.action.name(),
                error = %e,
                "Event action failed"
            ),
        }
    }

    async fn execute(&self, event: &Event, direction: Direction, device_id: DeviceId) -> Result<()> {
        match &event.action {
            EventAction::ModifyCounter { counter_id, mode } => {
                let counter_id = Self::bound_counter(event, *counter_id)?;
                self.counters.apply(counter_id, *mode)?;
            }
            EventAction::GeofenceCounter { counter_id } => {
                let counter_id = Self::bound_counter(event, *counter_id)?;
                match direction {
                    Direction::Enter => self.counters.increment(counter_id)?,
                    Direction::Leave => self.counters.decrement(counter_id)?,
                };
            }
            EventAction::SendMail {
                recipient,
                subject,
                message,
            } => {
                self.mail.send_to_confirmed(recipient, subject, message).await?;
            }
            EventAction::AdminNotification { title, message } => {
                let message = PushMessage {
                    title: title.clone(),
                    body: message.clone(),
                };
                self.push.send(&message, &PushDestination::admins()).await?;
            }
            EventAction::DeviceNotification { title, message } => {
                let Some(token) = self.get_device(device_id)?.push_token else {
                    tracing::debug!(device_id, "Device has no push token");
                    return Ok(());
                };
                let message = PushMessage {
                    title: title.clone(),
                    body: message.clone(),
                };
                self.push.send(&message, &PushDestination::Device(token)).await?;
            }
        }
        Ok(())
    }

    fn bound_counter(event: &Event, counter_id: Option<CounterId>) -> Result<CounterId> {
        counter_id.ok_or_else(|| {
            GeofencingError::PersistenceError(format!(
                "Event {} of geofence {} has no counter bound",
                event.event_id, event.minor
            ))
        })
    }

    /// Re-validates a delayed trigger against live state and fires it if the
    /// condition still holds: the device still sees the geofence for an
    /// enter, or no longer sees it for a leave.
    ///
    /// A missing event or device ends the check quietly.
    pub async fn recheck(&self, check: DelayedCheck) {
        let DelayedCheck {
            device_id,
            minor,
            event_id,
            direction,
        } = check;

        let event = match self.get_event(minor, event_id) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(device_id, minor, event_id, error = %e, "Re-check skipped");
                return;
            }
        };
        let device = match self.get_device(device_id) {
            Ok(device) => device,
            Err(e) => {
                tracing::debug!(device_id, minor, event_id, error = %e, "Re-check skipped");
                return;
            }
        };

        let present = device.is_in_geofence(minor);
        let holds = match direction {
            Direction::Enter => present,
            Direction::Leave => !present,
        };

        if holds {
            self.fire(&event, direction, device_id).await;
        } else {
            tracing::debug!(device_id, minor, event_id, %direction, "Re-check suppressed");
        }
    }

    // =========================================================================
    // COUNTERS & MAIL
    // =========================================================================

    /// Value of the geofence counter of the geofence (the one of its first
    /// geofence counter event).
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::GeofenceCounterNotFound`] if the geofence
    /// has no geofence counter event.
    pub fn geofence_counter_value(&self, minor: Minor) -> Result<u32> {
        let counter_id = self
            .events_of(minor)?
            .iter()
            .find_map(|e| match e.action {
                EventAction::GeofenceCounter { counter_id } => counter_id,
                _ => None,
            })
            .ok_or(GeofencingError::GeofenceCounterNotFound(minor))?;
        self.counters.value(counter_id)
    }

    /// Creates a counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn create_counter(&self) -> Result<CounterId> {
        self.counters.create()
    }

    /// Returns a counter's value.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn counter_value(&self, counter_id: CounterId) -> Result<u32> {
        self.counters.value(counter_id)
    }

    /// Returns every counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn list_counters(&self) -> Result<Vec<Counter>> {
        self.counters.list()
    }

    /// Deletes a counter.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::CounterNotFound`] if it does not exist.
    pub fn remove_counter(&self, counter_id: CounterId) -> Result<()> {
        self.counters.remove(counter_id)
    }

    /// Confirms a mail address from its verification link.
    ///
    /// # Errors
    ///
    /// See [`MailOptIn::confirm`].
    pub fn confirm_mail_address(&self, address: &str) -> Result<bool> {
        self.mail.confirm(address)
    }

    /// Unsubscribes a confirmed mail address.
    ///
    /// # Errors
    ///
    /// See [`MailOptIn::unregister`].
    pub fn unregister_mail_address(&self, address: &str) -> Result<()> {
        self.mail.unregister(address)
    }
}

#[async_trait]
impl DelayedCheckHandler for GeofenceEngine {
    async fn run_delayed_check(&self, check: DelayedCheck) {
        self.recheck(check).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{MailConfig, PushConfig};
    use crate::counter::CounterMode;
    use crate::dispatch::{RecordingMailTransport, RecordingPushGateway};
    use crate::event::{Trigger, MAX_DELAY_SECS};

    const SYSTEM_UUID: &str = "f7826da6-4fa2-4e98-8024-bc5b71e0893e";
    const RECIPIENT: &str = "ops@example.org";

    struct Harness {
        engine: Arc<GeofenceEngine>,
        push: Arc<RecordingPushGateway>,
        mail: Arc<RecordingMailTransport>,
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.server.admin_secret = Some("admin".into());
        config.system.uuid = Some(SYSTEM_UUID.into());
        config.mail = MailConfig {
            service_url: Some("https://geo.example.org/".into()),
            sender_address: Some("noreply@example.org".into()),
            confirmation_timeout_secs: Some(3600),
            delete_timeout_secs: Some(86400),
            ..MailConfig::default()
        };
        config.push = PushConfig {
            admin_server_key: Some("admin-key".into()),
            device_server_key: Some("device-key".into()),
            ..PushConfig::default()
        };
        config
    }

    fn harness_with(config: Config) -> Harness {
        let push = Arc::new(RecordingPushGateway::new());
        let mail = Arc::new(RecordingMailTransport::new());
        let engine = Arc::new(
            GeofenceEngine::new(
                config,
                Arc::new(Store::in_memory()),
                push.clone(),
                mail.clone(),
            )
            .unwrap(),
        );
        engine.start().unwrap();
        Harness { engine, push, mail }
    }

    fn harness() -> Harness {
        harness_with(config())
    }

    fn event(trigger: Trigger, action: EventAction) -> NewEvent {
        NewEvent {
            description: "test".into(),
            trigger,
            action,
        }
    }

    fn increment() -> EventAction {
        EventAction::ModifyCounter {
            counter_id: None,
            mode: CounterMode::Increment,
        }
    }

    fn admin_notification() -> EventAction {
        EventAction::AdminNotification {
            title: "Alert".into(),
            message: "Someone arrived".into(),
        }
    }

    /// Adds a geofence with one registered beacon and returns both.
    fn zone(engine: &GeofenceEngine, name: &str) -> (Minor, Beacon) {
        let minor = engine.add_geofence(name).unwrap();
        let beacon = engine.generate_beacon(minor).unwrap();
        assert!(engine.add_beacon(minor, beacon.clone()).unwrap());
        (minor, beacon)
    }

    fn set(beacons: &[&Beacon]) -> BeaconSet {
        beacons.iter().map(|b| (*b).clone()).collect()
    }

    fn bound_counter(engine: &GeofenceEngine, minor: Minor, event_id: EventId) -> CounterId {
        engine
            .get_event(minor, event_id)
            .unwrap()
            .action
            .counter_id()
            .unwrap()
    }

    #[tokio::test]
    async fn test_admin_check() {
        let h = harness();
        assert!(h.engine.is_admin("admin"));
        assert!(!h.engine.is_admin("guess"));
        assert!(matches!(
            h.engine.check_admin("guess"),
            Err(GeofencingError::Unauthorized)
        ));

        let mut no_secret = config();
        no_secret.server.admin_secret = Some(String::new());
        let h = harness_with(no_secret);
        assert!(!h.engine.is_admin(""));
    }

    #[tokio::test]
    async fn test_remove_geofence_requires_empty() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        let event_id = h
            .engine
            .add_event(minor, event(Trigger::immediate(Direction::Enter), increment()))
            .await
            .unwrap()
            .unwrap();

        let err = h.engine.remove_geofence(minor).unwrap_err();
        assert!(matches!(
            err,
            GeofencingError::GeofenceNotEmpty {
                beacons: 1,
                events: 1,
                ..
            }
        ));

        h.engine.remove_beacon(minor, beacon.major).unwrap();
        assert!(h.engine.remove_geofence(minor).is_err());
        h.engine.remove_event(minor, event_id).unwrap();
        h.engine.remove_geofence(minor).unwrap();

        assert!(matches!(
            h.engine.get_geofence(minor),
            Err(GeofencingError::GeofenceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_minors_and_majors_are_never_reused() {
        let h = harness();
        let first = h.engine.add_geofence("A").unwrap();
        h.engine.remove_geofence(first).unwrap();
        let second = h.engine.add_geofence("B").unwrap();
        assert!(second > first);

        let beacon = h.engine.generate_beacon(second).unwrap();
        h.engine.add_beacon(second, beacon.clone()).unwrap();
        h.engine.remove_beacon(second, beacon.major).unwrap();
        let next = h.engine.generate_beacon(second).unwrap();
        assert!(next.major > beacon.major);
    }

    #[tokio::test]
    async fn test_event_ids_are_sequential_per_geofence() {
        let h = harness();
        let a = h.engine.add_geofence("A").unwrap();
        let b = h.engine.add_geofence("B").unwrap();

        let first_b = h
            .engine
            .add_event(b, event(Trigger::immediate(Direction::Enter), increment()))
            .await
            .unwrap()
            .unwrap();
        h.engine.remove_event(b, first_b).unwrap();

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(
                h.engine
                    .add_event(a, event(Trigger::immediate(Direction::Enter), increment()))
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let listed: Vec<EventId> = h
            .engine
            .list_events(a)
            .unwrap()
            .iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_add_beacon_rejections() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");

        assert!(!h.engine.add_beacon(minor, beacon.clone()).unwrap());

        let foreign = Beacon::new(Uuid::nil(), 99, minor);
        assert!(!h.engine.add_beacon(minor, foreign).unwrap());

        let other_minor = Beacon::new(h.engine.system_uuid(), 99, minor + 1);
        assert!(!h.engine.add_beacon(minor, other_minor).unwrap());

        assert!(matches!(
            h.engine.add_beacon(500, beacon),
            Err(GeofencingError::GeofenceNotFound(500))
        ));
    }

    #[tokio::test]
    async fn test_describe_attaches_locations() {
        let h = harness();
        let minor = h.engine.add_geofence("Hall").unwrap();
        let beacon = h.engine.generate_beacon(minor).unwrap().with_location("Door");
        h.engine.add_beacon(minor, beacon.clone()).unwrap();

        let unknown = Beacon::new(Uuid::nil(), 1, 1);
        let plain = Beacon::new(beacon.uuid, beacon.major, beacon.minor);
        let described = h
            .engine
            .describe_beacons(vec![plain, unknown.clone()])
            .unwrap();

        assert_eq!(described[0].location.as_deref(), Some("Door"));
        assert_eq!(described[1], unknown);
        assert!(described[1].location.is_none());
    }

    #[tokio::test]
    async fn test_register_device() {
        let h = harness();
        let id = h.engine.register_device("phone@example.org").unwrap();
        assert_ne!(id, 0);
        assert_eq!(
            h.engine.get_device_by_address("phone@example.org").unwrap().device_id,
            id
        );

        assert!(matches!(
            h.engine.register_device("phone@example.org"),
            Err(GeofencingError::DeviceAlreadyRegistered(_))
        ));
        assert!(matches!(
            h.engine.register_device("nonsense"),
            Err(GeofencingError::InvalidMailAddress(_))
        ));

        assert!(h.engine.authenticate_device(id, "phone@example.org").is_ok());
        assert!(matches!(
            h.engine.authenticate_device(id, "other@example.org"),
            Err(GeofencingError::Unauthorized)
        ));

        h.engine.remove_device(id).unwrap();
        assert!(matches!(
            h.engine.get_device(id),
            Err(GeofencingError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_entering_second_geofence_increments_its_counter() {
        let h = harness();
        let (m1, b1) = zone(&h.engine, "First");
        let (m2, b2) = zone(&h.engine, "Second");
        let e1 = h
            .engine
            .add_event(m1, event(Trigger::immediate(Direction::Enter), increment()))
            .await
            .unwrap()
            .unwrap();
        let e2 = h
            .engine
            .add_event(m2, event(Trigger::immediate(Direction::Enter), increment()))
            .await
            .unwrap()
            .unwrap();
        let c1 = bound_counter(&h.engine, m1, e1);
        let c2 = bound_counter(&h.engine, m2, e2);

        let device = h.engine.register_device("d@example.org").unwrap();
        h.engine
            .update_device_beacons(device, set(&[&b1]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.engine.counter_value(c1).unwrap(), 1);

        let change = h
            .engine
            .update_device_beacons(device, set(&[&b1, &b2]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.entered(), &set(&[&b2]));
        assert!(change.left().is_empty());
        assert_eq!(h.engine.counter_value(c1).unwrap(), 1);
        assert_eq!(h.engine.counter_value(c2).unwrap(), 1);

        // Same report again: no change, nothing fires.
        assert!(h
            .engine
            .update_device_beacons(device, set(&[&b1, &b2]))
            .await
            .unwrap()
            .is_none());
        assert_eq!(h.engine.counter_value(c2).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_beacons_are_ignored() {
        let h = harness();
        let (_, b1) = zone(&h.engine, "Hall");
        let device = h.engine.register_device("d@example.org").unwrap();

        let stranger = Beacon::new(Uuid::nil(), 4, 4);
        assert!(h
            .engine
            .update_device_beacons(device, set(&[&stranger]))
            .await
            .unwrap()
            .is_none());

        h.engine
            .update_device_beacons(device, set(&[&b1, &stranger]))
            .await
            .unwrap()
            .unwrap();
        let stored = h.engine.get_device(device).unwrap();
        assert_eq!(stored.beacons, set(&[&b1]));
    }

    #[tokio::test]
    async fn test_geofence_counter_tracks_presence() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Lab");
        h.engine
            .add_event(
                minor,
                event(
                    Trigger::delayed(Direction::Leave, 300),
                    EventAction::GeofenceCounter { counter_id: None },
                ),
            )
            .await
            .unwrap()
            .unwrap();

        let d1 = h.engine.register_device("one@example.org").unwrap();
        let d2 = h.engine.register_device("two@example.org").unwrap();

        h.engine.update_device_beacons(d1, set(&[&beacon])).await.unwrap();
        h.engine.update_device_beacons(d2, set(&[&beacon])).await.unwrap();
        assert_eq!(h.engine.geofence_counter_value(minor).unwrap(), 2);

        h.engine.update_device_beacons(d1, BeaconSet::new()).await.unwrap();
        assert_eq!(h.engine.geofence_counter_value(minor).unwrap(), 1);
        h.engine.update_device_beacons(d2, BeaconSet::new()).await.unwrap();
        h.engine.update_device_beacons(d2, BeaconSet::new()).await.unwrap();
        assert_eq!(h.engine.geofence_counter_value(minor).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_geofence_counter_missing() {
        let h = harness();
        let minor = h.engine.add_geofence("Empty").unwrap();
        assert!(matches!(
            h.engine.geofence_counter_value(minor),
            Err(GeofencingError::GeofenceCounterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_modify_counter_with_missing_counter_is_discarded() {
        let h = harness();
        let minor = h.engine.add_geofence("Hall").unwrap();
        let discarded = h
            .engine
            .add_event(
                minor,
                event(
                    Trigger::immediate(Direction::Enter),
                    EventAction::ModifyCounter {
                        counter_id: Some(77),
                        mode: CounterMode::Reset,
                    },
                ),
            )
            .await
            .unwrap();
        assert!(discarded.is_none());

        // No identifier was consumed.
        let counter = h.engine.create_counter().unwrap();
        let kept = h
            .engine
            .add_event(
                minor,
                event(
                    Trigger::immediate(Direction::Enter),
                    EventAction::ModifyCounter {
                        counter_id: Some(counter),
                        mode: CounterMode::Reset,
                    },
                ),
            )
            .await
            .unwrap();
        assert_eq!(kept, Some(1));
    }

    #[tokio::test]
    async fn test_notification_event_requires_push_config() {
        let mut without_push = config();
        without_push.push = PushConfig::default();
        let h = harness_with(without_push);
        let minor = h.engine.add_geofence("Hall").unwrap();

        let discarded = h
            .engine
            .add_event(minor, event(Trigger::immediate(Direction::Enter), admin_notification()))
            .await
            .unwrap();
        assert!(discarded.is_none());
        assert!(h.engine.list_events(minor).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_event_to_unknown_geofence() {
        let h = harness();
        assert!(matches!(
            h.engine
                .add_event(9, event(Trigger::immediate(Direction::Enter), increment()))
                .await,
            Err(GeofencingError::GeofenceNotFound(9))
        ));
    }

    #[tokio::test]
    async fn test_admin_and_device_notifications() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        h.engine
            .add_event(minor, event(Trigger::immediate(Direction::Enter), admin_notification()))
            .await
            .unwrap()
            .unwrap();
        h.engine
            .add_event(
                minor,
                event(
                    Trigger::immediate(Direction::Leave),
                    EventAction::DeviceNotification {
                        title: "Bye".into(),
                        message: "See you".into(),
                    },
                ),
            )
            .await
            .unwrap()
            .unwrap();

        let device = h.engine.register_device("d@example.org").unwrap();
        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();
        h.engine
            .update_push_token(device, Some("fresh-token".into()))
            .unwrap();
        h.engine.update_device_beacons(device, BeaconSet::new()).await.unwrap();

        let sent = h.push.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, PushDestination::admins());
        assert_eq!(sent[0].0.title, "Alert");
        assert_eq!(sent[1].1, PushDestination::Device("fresh-token".into()));
    }

    #[tokio::test]
    async fn test_action_failures_do_not_reach_caller() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        h.engine
            .add_event(minor, event(Trigger::immediate(Direction::Enter), admin_notification()))
            .await
            .unwrap()
            .unwrap();
        h.push.set_failing(true);

        let device = h.engine.register_device("d@example.org").unwrap();
        let change = h
            .engine
            .update_device_beacons(device, set(&[&beacon]))
            .await
            .unwrap();
        assert!(change.is_some());
        assert!(h.push.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_mail_event_opt_in() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        let mail_event = || {
            event(
                Trigger::immediate(Direction::Enter),
                EventAction::SendMail {
                    recipient: RECIPIENT.into(),
                    subject: "Arrival".into(),
                    message: "A device arrived".into(),
                },
            )
        };

        assert_eq!(h.engine.add_event(minor, mail_event()).await.unwrap(), Some(1));
        let verification = h.mail.sent();
        assert_eq!(verification.len(), 1);
        assert_eq!(verification[0].subject, mail::VERIFICATION_SUBJECT);

        // A second event for the same pending recipient is refused.
        assert_eq!(h.engine.add_event(minor, mail_event()).await.unwrap(), None);

        let device = h.engine.register_device("d@example.org").unwrap();
        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();
        assert_eq!(h.mail.sent().len(), 1, "unconfirmed recipient gets nothing");

        assert!(h.engine.confirm_mail_address(RECIPIENT).unwrap());
        h.engine.update_device_beacons(device, BeaconSet::new()).await.unwrap();
        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();

        let sent = h.mail.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].subject, "Arrival");
        assert_eq!(sent[1].recipient, RECIPIENT);

        // Confirmed recipients may be reused without a new verification.
        assert_eq!(h.engine.add_event(minor, mail_event()).await.unwrap(), Some(2));
        assert_eq!(h.mail.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_enter_suppressed_after_leave() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        let event_id = h
            .engine
            .add_event(minor, event(Trigger::delayed(Direction::Enter, 30), increment()))
            .await
            .unwrap()
            .unwrap();
        let counter = bound_counter(&h.engine, minor, event_id);
        let device = h.engine.register_device("d@example.org").unwrap();

        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        h.engine.update_device_beacons(device, BeaconSet::new()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.engine.counter_value(counter).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_enter_fires_when_still_present() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        let event_id = h
            .engine
            .add_event(minor, event(Trigger::delayed(Direction::Enter, 30), increment()))
            .await
            .unwrap()
            .unwrap();
        let counter = bound_counter(&h.engine, minor, event_id);
        let device = h.engine.register_device("d@example.org").unwrap();

        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(h.engine.counter_value(counter).unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.engine.counter_value(counter).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_each_entered_beacon_triggers_its_geofence() {
        let h = harness();
        let (minor, b1) = zone(&h.engine, "Hall");
        let b2 = h.engine.generate_beacon(minor).unwrap();
        assert!(h.engine.add_beacon(minor, b2.clone()).unwrap());
        let event_id = h
            .engine
            .add_event(minor, event(Trigger::immediate(Direction::Enter), increment()))
            .await
            .unwrap()
            .unwrap();
        let counter = bound_counter(&h.engine, minor, event_id);
        let device = h.engine.register_device("d@example.org").unwrap();

        h.engine
            .update_device_beacons(device, set(&[&b1, &b2]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.engine.counter_value(counter).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_oversized_delay_is_rejected() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");

        let err = h
            .engine
            .add_event(minor, event(Trigger::delayed(Direction::Enter, u64::MAX), increment()))
            .await
            .unwrap_err();
        assert!(matches!(err, GeofencingError::DelayOutOfRange { .. }));
        assert!(h.engine.list_events(minor).unwrap().is_empty());
        assert!(h.engine.list_counters().unwrap().is_empty());

        let longest = h
            .engine
            .add_event(
                minor,
                event(Trigger::delayed(Direction::Enter, MAX_DELAY_SECS), increment()),
            )
            .await
            .unwrap();
        assert!(longest.is_some());

        let device = h.engine.register_device("d@example.org").unwrap();
        let change = h
            .engine
            .update_device_beacons(device, set(&[&beacon]))
            .await
            .unwrap();
        assert!(change.is_some());
        h.engine.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_leave_fires_when_still_absent() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        let event_id = h
            .engine
            .add_event(minor, event(Trigger::delayed(Direction::Leave, 30), increment()))
            .await
            .unwrap()
            .unwrap();
        let counter = bound_counter(&h.engine, minor, event_id);
        let device = h.engine.register_device("d@example.org").unwrap();

        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();
        h.engine.update_device_beacons(device, BeaconSet::new()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(h.engine.counter_value(counter).unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.engine.counter_value(counter).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_leave_suppressed_after_reentry() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        let event_id = h
            .engine
            .add_event(minor, event(Trigger::delayed(Direction::Leave, 30), increment()))
            .await
            .unwrap()
            .unwrap();
        let counter = bound_counter(&h.engine, minor, event_id);
        let device = h.engine.register_device("d@example.org").unwrap();

        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();
        h.engine.update_device_beacons(device, BeaconSet::new()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.engine.counter_value(counter).unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_check_for_removed_event_is_harmless() {
        let h = harness();
        let (minor, beacon) = zone(&h.engine, "Hall");
        let event_id = h
            .engine
            .add_event(minor, event(Trigger::delayed(Direction::Enter, 5), increment()))
            .await
            .unwrap()
            .unwrap();
        let counter = bound_counter(&h.engine, minor, event_id);
        let device = h.engine.register_device("d@example.org").unwrap();

        h.engine.update_device_beacons(device, set(&[&beacon])).await.unwrap();
        h.engine.remove_event(minor, event_id).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.engine.counter_value(counter).unwrap(), 0);
        h.engine.stop().await;
    }
}
