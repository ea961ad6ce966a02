//! Remote entities and actions the gateway is allowed to use.

use std::fmt;

/// Entities on the remote allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Contact,
    Email,
    Phone,
    Address,
    Activity,
    Website,
    ActivityContact,
}

impl Entity {
    pub const ALL: [Self; 7] = [
        Self::Contact,
        Self::Email,
        Self::Phone,
        Self::Address,
        Self::Activity,
        Self::Website,
        Self::ActivityContact,
    ];

    /// Remote API spelling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "Contact",
            Self::Email => "Email",
            Self::Phone => "Phone",
            Self::Address => "Address",
            Self::Activity => "Activity",
            Self::Website => "Website",
            Self::ActivityContact => "ActivityContact",
        }
    }

    /// Case-insensitive lookup. `activity-contact` and `activity_contact`
    /// match `ActivityContact`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().to_lowercase() == wanted)
    }

    /// Records of this entity are flagged deleted rather than removed.
    #[must_use]
    pub const fn is_soft_deletable(&self) -> bool {
        matches!(self, Self::Contact | Self::Activity)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote API actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Get,
    Create,
    Update,
    Delete,
    GetChecksum,
    ValidateChecksum,
}

impl Action {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::GetChecksum => "getChecksum",
            Self::ValidateChecksum => "validateChecksum",
        }
    }

    /// Writes bypass the read cache and are suppressed in dry-run mode.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
