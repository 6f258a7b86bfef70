use crate::envelope::Envelope;
use crate::error::{Result, SyncError};
use crate::types::{DeviceId, ExhibitKind};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Last path segment of a command topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandName {
    GotoBeat,
    LoadTour,
    SetVolume,
    EndTour,
    Sync,
    RepublishSettings,
}

impl CommandName {
    pub const ALL: [CommandName; 6] = [
        CommandName::GotoBeat,
        CommandName::LoadTour,
        CommandName::SetVolume,
        CommandName::EndTour,
        CommandName::Sync,
        CommandName::RepublishSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::GotoBeat => "goto-beat",
            CommandName::LoadTour => "load-tour",
            CommandName::SetVolume => "set-volume",
            CommandName::EndTour => "end-tour",
            CommandName::Sync => "sync",
            CommandName::RepublishSettings => "republish-settings",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = SyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CommandName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| SyncError::UnsupportedCommand(s.to_string()))
    }
}

/// Presence status published on a device's availability topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Online,
    Offline,
}

/// Availability body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub status: AvailabilityStatus,
}

impl Availability {
    pub fn online() -> Self {
        Self {
            status: AvailabilityStatus::Online,
        }
    }

    pub fn offline() -> Self {
        Self {
            status: AvailabilityStatus::Offline,
        }
    }
}

/// Authoritative status of one exhibit, published retained by the exhibit itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExhibitState {
    /// Opaque content position owned by the rendering layer
    pub beat_id: String,
    pub tour_id: Option<String>,
    /// Between 0 and 1
    pub volume_level: f64,
    pub volume_muted: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub play_pause: Option<bool>,
}

impl Default for ExhibitState {
    fn default() -> Self {
        Self {
            beat_id: String::new(),
            tour_id: None,
            volume_level: 1.0,
            volume_muted: false,
            play_pause: None,
        }
    }
}

/// `goto-beat` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GotoBeat {
    #[serde(rename = "beat-id")]
    pub beat_id: String,
    #[serde(rename = "presentation-mode", skip_serializing_if = "Option::is_none", default)]
    pub presentation_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub playpause: Option<bool>,
}

/// `load-tour` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTour {
    #[serde(rename = "tour-id")]
    pub tour_id: String,
}

/// `set-volume` body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetVolume {
    #[serde(rename = "volume-level")]
    pub volume_level: f64,
}

impl SetVolume {
    /// Binary mute model: muted is 0, unmuted is full volume
    pub fn from_muted(muted: bool) -> Self {
        Self {
            volume_level: if muted { 0.0 } else { 1.0 },
        }
    }

    pub fn is_muted(&self) -> bool {
        self.volume_level <= 0.0
    }
}

/// Body for commands that carry no arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoArgs {}

/// A one-way instruction from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GotoBeat(GotoBeat),
    LoadTour(LoadTour),
    SetVolume(SetVolume),
    EndTour,
    Sync,
    RepublishSettings,
}

impl Command {
    /// Topic segment this command is published under
    pub fn name(&self) -> CommandName {
        match self {
            Command::GotoBeat(_) => CommandName::GotoBeat,
            Command::LoadTour(_) => CommandName::LoadTour,
            Command::SetVolume(_) => CommandName::SetVolume,
            Command::EndTour => CommandName::EndTour,
            Command::Sync => CommandName::Sync,
            Command::RepublishSettings => CommandName::RepublishSettings,
        }
    }

    /// Wrap the command body in an envelope and serialize it
    pub fn encode(&self, source: &DeviceId) -> Result<Vec<u8>> {
        match self {
            Command::GotoBeat(body) => Envelope::wrap(source, body).to_bytes(),
            Command::LoadTour(body) => Envelope::wrap(source, body).to_bytes(),
            Command::SetVolume(body) => Envelope::wrap(source, body).to_bytes(),
            Command::EndTour | Command::Sync | Command::RepublishSettings => {
                Envelope::wrap(source, NoArgs {}).to_bytes()
            }
        }
    }

    /// Decode an enveloped command received on the topic for `name`
    pub fn decode(name: CommandName, payload: &[u8]) -> Result<Envelope<Command>> {
        let envelope = match name {
            CommandName::GotoBeat => Envelope::<GotoBeat>::from_slice(payload)?.map(Command::GotoBeat),
            CommandName::LoadTour => Envelope::<LoadTour>::from_slice(payload)?.map(Command::LoadTour),
            CommandName::SetVolume => {
                let envelope = Envelope::<SetVolume>::from_slice(payload)?;
                if !(0.0..=1.0).contains(&envelope.body.volume_level) {
                    return Err(SyncError::InvalidPayload(format!(
                        "volume-level out of range: {}",
                        envelope.body.volume_level
                    )));
                }
                envelope.map(Command::SetVolume)
            }
            CommandName::EndTour => Envelope::<IgnoredAny>::from_slice(payload)?.map(|_| Command::EndTour),
            CommandName::Sync => Envelope::<IgnoredAny>::from_slice(payload)?.map(|_| Command::Sync),
            CommandName::RepublishSettings => {
                Envelope::<IgnoredAny>::from_slice(payload)?.map(|_| Command::RepublishSettings)
            }
        };
        Ok(envelope)
    }
}

/// One exhibit's entry in the authority snapshot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExhibitEntry {
    #[serde(rename = "tour-id", default)]
    pub tour_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Full-state snapshot published retained by the remote authority
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthoritySnapshot {
    /// Keyed by exhibit kind; a null or missing entry means the exhibit is absent
    pub exhibits: BTreeMap<String, Option<ExhibitEntry>>,
    /// Global settings
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl AuthoritySnapshot {
    /// Get the entry for an exhibit kind, if present
    pub fn entry(&self, kind: ExhibitKind) -> Option<&ExhibitEntry> {
        self.exhibits.get(kind.as_str()).and_then(Option::as_ref)
    }

    /// Presence of each known exhibit kind
    pub fn availability(&self) -> BTreeMap<ExhibitKind, bool> {
        ExhibitKind::ALL
            .into_iter()
            .map(|kind| (kind, self.entry(kind).is_some()))
            .collect()
    }

    /// First non-null tour id in exhibit priority order
    ///
    /// Exhibits are expected to agree; when they do not, the first one wins.
    pub fn tour_id(&self) -> Option<&str> {
        ExhibitKind::ALL
            .into_iter()
            .filter_map(|kind| self.entry(kind))
            .find_map(|entry| entry.tour_id.as_deref())
    }
}

/// Error reported by the remote authority for the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityError {
    pub code: String,
    pub detail: String,
    #[serde(rename = "tour-id", default)]
    pub tour_id: Option<String>,
}

/// Phase of a content sync on the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncPhase {
    SyncInProgress,
    SyncComplete,
}

/// `state/sync` body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub status: SyncPhase,
}
