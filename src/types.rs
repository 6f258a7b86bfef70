use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one logical device instance (an exhibit display or the controller)
///
/// Regenerated on every process start, so two runs of the same display never
/// share an identity on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier of the form `<prefix>-<uuid>`
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deployment environment, used to namespace topics on a shared broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Environment::Local),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(SyncError::InvalidPayload(format!("unknown environment: {}", other))),
        }
    }
}

/// Category of a physical exhibit display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhibitKind {
    /// Entry room video wall
    Basecamp,
    /// Panoramic video wall with inline playback control
    OverlookWall,
    /// Room-scale carousel of screens
    Carousel,
}

impl ExhibitKind {
    /// Every exhibit kind, in reconciliation priority order
    pub const ALL: [ExhibitKind; 3] = [
        ExhibitKind::Basecamp,
        ExhibitKind::OverlookWall,
        ExhibitKind::Carousel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExhibitKind::Basecamp => "basecamp",
            ExhibitKind::OverlookWall => "overlook-wall",
            ExhibitKind::Carousel => "carousel",
        }
    }

    /// Whether the exhibit renders video that can be paused inline
    pub fn supports_playpause(&self) -> bool {
        matches!(self, ExhibitKind::OverlookWall)
    }
}

impl fmt::Display for ExhibitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExhibitKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExhibitKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::UnsupportedCommand(format!("unknown exhibit kind: {}", s)))
    }
}

/// Recipient segment of a command topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTarget {
    /// One exhibit category
    Exhibit(ExhibitKind),
    /// The remote authority (GEC) that owns tour state
    Gec,
    /// Every exhibit category at once
    All,
}

impl CommandTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandTarget::Exhibit(kind) => kind.as_str(),
            CommandTarget::Gec => "gec",
            CommandTarget::All => "all",
        }
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandTarget {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gec" => Ok(CommandTarget::Gec),
            "all" => Ok(CommandTarget::All),
            other => other.parse().map(CommandTarget::Exhibit),
        }
    }
}

/// One entry of the controller's cached tour list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tour {
    pub id: String,
    pub name: String,
}

impl Tour {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}
