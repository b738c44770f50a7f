//! Mail double opt-in.
//!
//! An address moves from unknown to *on hold* when a mail event names it as
//! recipient, and to *confirmed* once its owner follows the verification
//! link. Only confirmed addresses ever receive event mail.
//!
//! Two timeouts govern the on-hold state:
//!
//! - the confirmation timeout bounds how long a verification link is accepted
//!   and how long a second request for the same address is refused;
//! - the delete timeout is the age after which on-hold records are purged.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{MailConfig, MailTimeouts};
use crate::dispatch::{MailMessage, MailTransport};
use crate::error::{GeofencingError, OrNotFound, Result};
use crate::storage::{Document, Store};

/// Subject of the verification mail.
pub const VERIFICATION_SUBJECT: &str = "E-Mail Verification Request";

static ADDRESS_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").ok()
});

/// Returns `true` if `address` looks like a deliverable mail address.
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    (*ADDRESS_PATTERN)
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(address))
}

/// An address waiting for confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressOnHold {
    /// Mail address.
    pub address: String,
    /// When the most recent verification was requested.
    pub requested_at: DateTime<Utc>,
}

impl Document for AddressOnHold {
    type Key = String;
    const COLLECTION: &'static str = "addresses_on_hold";

    fn key(&self) -> String {
        self.address.clone()
    }
}

/// A verified address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedAddress {
    /// Mail address.
    pub address: String,
    /// When the owner confirmed it.
    pub confirmed_at: DateTime<Utc>,
}

impl Document for ConfirmedAddress {
    type Key = String;
    const COLLECTION: &'static str = "confirmed_addresses";

    fn key(&self) -> String {
        self.address.clone()
    }
}

/// Result of [`MailOptIn::request_verification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The address is already confirmed; nothing was sent.
    AlreadyConfirmed,
    /// A verification mail was sent.
    Sent,
    /// An unexpired request is already pending; nothing was sent.
    Pending,
}

fn age(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// The opt-in workflow over the document store.
pub struct MailOptIn {
    store: Arc<Store>,
    config: MailConfig,
    transport: Arc<dyn MailTransport>,
}

impl std::fmt::Debug for MailOptIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailOptIn")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MailOptIn {
    /// Creates the workflow.
    #[must_use]
    pub fn new(store: Arc<Store>, config: MailConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            store,
            config,
            transport,
        }
    }

    /// Mail settings in use.
    #[must_use]
    pub const fn config(&self) -> &MailConfig {
        &self.config
    }

    fn timeouts(&self) -> Result<MailTimeouts> {
        Ok(self.config.timeouts()?)
    }

    fn validate(address: &str) -> Result<()> {
        if is_valid_address(address) {
            Ok(())
        } else {
            Err(GeofencingError::InvalidMailAddress(address.to_string()))
        }
    }

    /// Returns `true` if the address is confirmed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn is_confirmed(&self, address: &str) -> Result<bool> {
        Ok(self
            .store
            .confirmed_addresses()
            .contains(&address.to_string())?)
    }

    /// Puts `address` on hold. See [`Self::add_address_on_hold_at`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_address_on_hold_at`].
    pub fn add_address_on_hold(&self, address: &str) -> Result<bool> {
        self.add_address_on_hold_at(address, Utc::now())
    }

    /// Puts `address` on hold as of `now`.
    ///
    /// Returns `false` only if an unexpired request for the address is
    /// already pending. A confirmed address is accepted without change, an
    /// expired request is replaced by a fresh one. Every call first purges
    /// on-hold records older than the delete timeout.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed address, missing timeouts or an
    /// unavailable store.
    pub fn add_address_on_hold_at(&self, address: &str, now: DateTime<Utc>) -> Result<bool> {
        Self::validate(address)?;
        let timeouts = self.timeouts()?;
        self.purge_expired_at(now, timeouts.delete)?;

        if self.is_confirmed(address)? {
            return Ok(true);
        }

        let on_hold = self.store.addresses_on_hold();
        if let Ok(existing) = on_hold.find(&address.to_string()) {
            if age(now, existing.requested_at) < timeouts.confirmation {
                tracing::debug!(address, "Verification already pending");
                return Ok(false);
            }
            tracing::debug!(address, "Replacing expired verification request");
        }

        on_hold.upsert(AddressOnHold {
            address: address.to_string(),
            requested_at: now,
        })?;
        Ok(true)
    }

    /// Confirms `address`. See [`Self::confirm_at`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::confirm_at`].
    pub fn confirm(&self, address: &str) -> Result<bool> {
        self.confirm_at(address, Utc::now())
    }

    /// Confirms `address` as of `now`.
    ///
    /// Returns `false` if the pending request is older than the confirmation
    /// timeout; the stale record is left for the purge. Confirming a
    /// confirmed address succeeds without change.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::MailAddressNotFound`] if the address is
    /// neither pending nor confirmed.
    pub fn confirm_at(&self, address: &str, now: DateTime<Utc>) -> Result<bool> {
        if self.is_confirmed(address)? {
            return Ok(true);
        }

        let timeouts = self.timeouts()?;
        let key = address.to_string();
        let pending = self
            .store
            .addresses_on_hold()
            .find(&key)
            .or_not_found(|| GeofencingError::MailAddressNotFound(key.clone()))?;

        if age(now, pending.requested_at) >= timeouts.confirmation {
            tracing::debug!(address, "Verification link expired");
            return Ok(false);
        }

        self.store.confirmed_addresses().upsert(ConfirmedAddress {
            address: key.clone(),
            confirmed_at: now,
        })?;
        self.store.addresses_on_hold().delete_where(|a| a.address == key)?;

        tracing::info!(address, "Mail address confirmed");
        Ok(true)
    }

    /// Removes a confirmed address.
    ///
    /// # Errors
    ///
    /// Returns [`GeofencingError::MailAddressNotFound`] if the address is not
    /// confirmed.
    pub fn unregister(&self, address: &str) -> Result<()> {
        let key = address.to_string();
        self.store
            .confirmed_addresses()
            .delete(&key)
            .or_not_found(|| GeofencingError::MailAddressNotFound(key.clone()))?;
        tracing::info!(address, "Mail address unsubscribed");
        Ok(())
    }

    /// Deletes on-hold records older than `ttl` and returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable.
    pub fn purge_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let removed = self
            .store
            .addresses_on_hold()
            .delete_where(|a| age(now, a.requested_at) >= ttl)?;
        if removed > 0 {
            tracing::debug!(removed, "Purged expired verification requests");
        }
        Ok(removed)
    }

    /// Starts the opt-in for `address` and sends the verification mail.
    ///
    /// If sending fails, the on-hold record is removed again so that a later
    /// attempt is not refused as pending.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed address, incomplete mail settings,
    /// an unavailable store or a failed send.
    pub async fn request_verification(&self, address: &str) -> Result<VerificationOutcome> {
        Self::validate(address)?;
        let service_url = self.config.require_service_url()?;
        let timeouts = self.timeouts()?;

        if self.is_confirmed(address)? {
            return Ok(VerificationOutcome::AlreadyConfirmed);
        }
        if !self.add_address_on_hold(address)? {
            return Ok(VerificationOutcome::Pending);
        }

        let message = verification_mail(address, &service_url, timeouts.confirmation);
        if let Err(e) = self.transport.send(&message).await {
            tracing::warn!(address, error = %e, "Verification mail failed");
            let key = address.to_string();
            self.store.addresses_on_hold().delete_where(|a| a.address == key)?;
            return Err(e.into());
        }

        tracing::info!(address, "Verification mail sent");
        Ok(VerificationOutcome::Sent)
    }

    /// Sends a mail to `recipient` if it is confirmed. Returns `false`
    /// (without sending) otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unavailable or the send fails.
    pub async fn send_to_confirmed(&self, recipient: &str, subject: &str, body: &str) -> Result<bool> {
        if !self.is_confirmed(recipient)? {
            tracing::debug!(recipient, "Recipient not confirmed, mail not sent");
            return Ok(false);
        }

        self.transport
            .send(&MailMessage {
                recipient: recipient.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            })
            .await?;
        Ok(true)
    }
}

/// Builds the verification mail for `address`.
#[must_use]
pub fn verification_mail(address: &str, service_url: &Url, expires_in: Duration) -> MailMessage {
    let minutes = expires_in.as_secs() / 60;
    let verify = link(service_url, "verification", address);
    let unsubscribe = link(service_url, "unsubscribe", address);
    let body = format!(
        "Hello,\n\n\
         this address was entered as the recipient of geofence notifications.\n\
         To receive them, open the following link within {minutes} minutes:\n\n\
         {verify}\n\n\
         To stop receiving notifications at any time, open:\n\n\
         {unsubscribe}\n"
    );

    MailMessage {
        recipient: address.to_string(),
        subject: VERIFICATION_SUBJECT.to_string(),
        body,
    }
}

/// Appends `action` and the percent-encoded `address` as path segments.
fn link(service_url: &Url, action: &str, address: &str) -> Url {
    let mut url = service_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(action).push(address);
    }
    url
}
