//! Federation levels and partnership capability flags.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ordinal trust tier used to seed a partnership's capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum FederationLevel {
    /// Profiles only.
    Discovery = 1,
    /// Profiles, messaging, listings and events.
    Social = 2,
    /// Social plus transactions.
    Economic = 3,
    /// Everything, including groups.
    Integrated = 4,
}

/// Error for a level outside `1..=4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("federation level must be between 1 and 4, got {0}")]
pub struct InvalidFederationLevel(pub i64);

impl FederationLevel {
    /// Returns the numeric tier.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stored or user-supplied tier.
    pub fn from_i64(value: i64) -> Result<Self, InvalidFederationLevel> {
        match value {
            1 => Ok(Self::Discovery),
            2 => Ok(Self::Social),
            3 => Ok(Self::Economic),
            4 => Ok(Self::Integrated),
            other => Err(InvalidFederationLevel(other)),
        }
    }

    /// Human-readable tier name.
    pub fn label(self) -> &'static str {
        match self {
            Self::Discovery => "Discovery",
            Self::Social => "Social",
            Self::Economic => "Economic",
            Self::Integrated => "Integrated",
        }
    }

    /// Capability flags a new partnership at this level starts with.
    pub fn default_permissions(self) -> PartnershipPermissions {
        let at_least = |level: FederationLevel| self >= level;
        PartnershipPermissions {
            profiles: true,
            messaging: at_least(Self::Social),
            transactions: at_least(Self::Economic),
            listings: at_least(Self::Social),
            events: at_least(Self::Social),
            groups: at_least(Self::Integrated),
        }
    }
}

impl TryFrom<u8> for FederationLevel {
    type Error = InvalidFederationLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_i64(i64::from(value))
    }
}

impl From<FederationLevel> for u8 {
    fn from(level: FederationLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for FederationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u8(), self.label())
    }
}

/// Per-capability switches on a partnership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartnershipPermissions {
    pub profiles: bool,
    pub messaging: bool,
    pub transactions: bool,
    pub listings: bool,
    pub events: bool,
    pub groups: bool,
}

/// A before/after pair for one changed flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagChange {
    pub from: bool,
    pub to: bool,
}

impl PartnershipPermissions {
    /// Flag names in column order.
    pub const FLAGS: [&'static str; 6] = [
        "profiles",
        "messaging",
        "transactions",
        "listings",
        "events",
        "groups",
    ];

    /// Flags paired with their names, in [`Self::FLAGS`] order.
    pub fn as_pairs(&self) -> [(&'static str, bool); 6] {
        [
            ("profiles", self.profiles),
            ("messaging", self.messaging),
            ("transactions", self.transactions),
            ("listings", self.listings),
            ("events", self.events),
            ("groups", self.groups),
        ]
    }

    /// Returns a copy with every flag that `update` specifies overwritten.
    pub fn apply(&self, update: &PermissionsUpdate) -> Self {
        Self {
            profiles: update.profiles.unwrap_or(self.profiles),
            messaging: update.messaging.unwrap_or(self.messaging),
            transactions: update.transactions.unwrap_or(self.transactions),
            listings: update.listings.unwrap_or(self.listings),
            events: update.events.unwrap_or(self.events),
            groups: update.groups.unwrap_or(self.groups),
        }
    }

    /// Flags whose value differs between `self` and `after`.
    pub fn diff(&self, after: &Self) -> BTreeMap<&'static str, FlagChange> {
        self.as_pairs()
            .into_iter()
            .zip(after.as_pairs())
            .filter(|((_, from), (_, to))| from != to)
            .map(|((name, from), (_, to))| (name, FlagChange { from, to }))
            .collect()
    }
}

/// A partial set of capability flags; `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messaging: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listings: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<bool>,
}

impl PermissionsUpdate {
    /// True when no flag is specified.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<PartnershipPermissions> for PermissionsUpdate {
    fn from(p: PartnershipPermissions) -> Self {
        Self {
            profiles: Some(p.profiles),
            messaging: Some(p.messaging),
            transactions: Some(p.transactions),
            listings: Some(p.listings),
            events: Some(p.events),
            groups: Some(p.groups),
        }
    }
}
