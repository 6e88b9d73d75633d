//! # Domain Identity Newtypes
//!
//! Newtype wrappers for every identifier the settlement engine handles.
//! Learners and educators share the platform's user namespace, so both are
//! a [`UserId`]; the role is carried by the field name (`actor_id`,
//! `owner_id`, `educator`).

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// A platform user: subscriber, learner, or educator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

/// A monthly settlement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementId(pub Uuid);

/// A subscription billing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

/// An accepted withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithdrawalId(pub Uuid);

macro_rules! impl_uuid_newtype {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            /// Accepts a bare UUID or the prefixed display form.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, ":")).unwrap_or(s);
                Uuid::parse_str(raw.trim())
                    .map(Self)
                    .map_err(|_| CoreError::InvalidIdentifier(s.to_string()))
            }
        }
    };
}

impl_uuid_newtype!(UserId, "user");
impl_uuid_newtype!(SettlementId, "settlement");
impl_uuid_newtype!(SubscriptionId, "subscription");
impl_uuid_newtype!(WithdrawalId, "withdrawal");
