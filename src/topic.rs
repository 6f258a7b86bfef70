//! Canonical topic names
//!
//! Every topic string in the protocol is produced by [`Topic`]'s `Display`
//! implementation. Publishers and subscribers both derive names from the same
//! variant, so they cannot drift apart.

use crate::error::{Result, SyncError};
use crate::protocol::CommandName;
use crate::types::{CommandTarget, DeviceId, Environment, ExhibitKind};
use std::fmt;

const AUTHORITY: &str = "docent-app";

/// A protocol address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `state/<environment>/<deviceId>/availability`
    Availability {
        environment: Environment,
        device: DeviceId,
    },
    /// `cmd/dev/<target>/<command>`
    Command {
        target: CommandTarget,
        command: CommandName,
    },
    /// `state/<exhibitKind>`
    ExhibitState(ExhibitKind),
    /// `state/docent-app`
    AuthoritySnapshot,
    /// `state/docent-app/error`
    AuthorityError,
    /// `state/sync`
    SyncStatus,
}

impl Topic {
    pub fn availability(environment: Environment, device: &DeviceId) -> Self {
        Topic::Availability {
            environment,
            device: device.clone(),
        }
    }

    pub fn command(target: CommandTarget, command: CommandName) -> Self {
        Topic::Command { target, command }
    }

    pub fn exhibit_state(kind: ExhibitKind) -> Self {
        Topic::ExhibitState(kind)
    }

    /// Filter matching every device's availability in one environment
    pub fn availability_filter(environment: Environment) -> String {
        format!("state/{}/+/availability", environment)
    }

    /// Whether publications on this topic are retained by the broker
    pub fn is_retained(&self) -> bool {
        !matches!(self, Topic::Command { .. })
    }

    /// Parse a topic string back into its variant
    pub fn parse(topic: &str) -> Result<Self> {
        let unknown = || SyncError::UnknownTopic(topic.to_string());
        let segments: Vec<&str> = topic.split('/').collect();

        match segments.as_slice() {
            ["cmd", "dev", target, command] => Ok(Topic::Command {
                target: target.parse().map_err(|_| unknown())?,
                command: command.parse().map_err(|_| unknown())?,
            }),
            ["state", AUTHORITY] => Ok(Topic::AuthoritySnapshot),
            ["state", AUTHORITY, "error"] => Ok(Topic::AuthorityError),
            ["state", "sync"] => Ok(Topic::SyncStatus),
            ["state", environment, device, "availability"] if !device.is_empty() => {
                Ok(Topic::Availability {
                    environment: environment.parse().map_err(|_| unknown())?,
                    device: DeviceId::new(*device),
                })
            }
            ["state", kind] => kind.parse().map(Topic::ExhibitState).map_err(|_| unknown()),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Availability {
                environment,
                device,
            } => write!(f, "state/{}/{}/availability", environment, device),
            Topic::Command { target, command } => write!(f, "cmd/dev/{}/{}", target, command),
            Topic::ExhibitState(kind) => write!(f, "state/{}", kind),
            Topic::AuthoritySnapshot => write!(f, "state/{}", AUTHORITY),
            Topic::AuthorityError => write!(f, "state/{}/error", AUTHORITY),
            Topic::SyncStatus => f.write_str("state/sync"),
        }
    }
}

impl From<&Topic> for String {
    fn from(topic: &Topic) -> Self {
        topic.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms() {
        let device = DeviceId::new("basecamp-1");
        assert_eq!(
            Topic::availability(Environment::Staging, &device).to_string(),
            "state/staging/basecamp-1/availability"
        );
        assert_eq!(
            Topic::command(CommandTarget::Exhibit(ExhibitKind::Basecamp), CommandName::GotoBeat)
                .to_string(),
            "cmd/dev/basecamp/goto-beat"
        );
        assert_eq!(
            Topic::command(CommandTarget::Exhibit(ExhibitKind::OverlookWall), CommandName::SetVolume)
                .to_string(),
            "cmd/dev/overlook-wall/set-volume"
        );
        assert_eq!(
            Topic::command(CommandTarget::All, CommandName::EndTour).to_string(),
            "cmd/dev/all/end-tour"
        );
        assert_eq!(
            Topic::command(CommandTarget::Gec, CommandName::RepublishSettings).to_string(),
            "cmd/dev/gec/republish-settings"
        );
        assert_eq!(Topic::exhibit_state(ExhibitKind::Carousel).to_string(), "state/carousel");
        assert_eq!(Topic::AuthoritySnapshot.to_string(), "state/docent-app");
        assert_eq!(Topic::AuthorityError.to_string(), "state/docent-app/error");
        assert_eq!(Topic::SyncStatus.to_string(), "state/sync");
    }

    #[test]
    fn topic_names_are_deterministic() {
        let device = DeviceId::new("controller-7");
        for environment in [Environment::Local, Environment::Staging, Environment::Production] {
            let first = Topic::availability(environment, &device).to_string();
            let second = Topic::availability(environment, &device.clone()).to_string();
            assert_eq!(first, second);
        }
        for kind in ExhibitKind::ALL {
            for command in CommandName::ALL {
                let target = CommandTarget::Exhibit(kind);
                assert_eq!(
                    Topic::command(target, command).to_string(),
                    Topic::command(target, command).to_string()
                );
            }
        }
    }

    #[test]
    fn environments_never_share_availability_topics() {
        let device = DeviceId::new("d");
        let local = Topic::availability(Environment::Local, &device).to_string();
        let production = Topic::availability(Environment::Production, &device).to_string();
        assert_ne!(local, production);
    }

    #[test]
    fn parse_recognises_inbound_topics() {
        assert_eq!(Topic::parse("state/docent-app").unwrap(), Topic::AuthoritySnapshot);
        assert_eq!(Topic::parse("state/docent-app/error").unwrap(), Topic::AuthorityError);
        assert_eq!(Topic::parse("state/sync").unwrap(), Topic::SyncStatus);
        assert_eq!(
            Topic::parse("state/overlook-wall").unwrap(),
            Topic::ExhibitState(ExhibitKind::OverlookWall)
        );
        assert_eq!(
            Topic::parse("cmd/dev/gec/load-tour").unwrap(),
            Topic::command(CommandTarget::Gec, CommandName::LoadTour)
        );
        assert_eq!(
            Topic::parse("state/production/kiosk-3/availability").unwrap(),
            Topic::availability(Environment::Production, &DeviceId::new("kiosk-3"))
        );
    }

    #[test]
    fn parse_rejects_foreign_topics() {
        assert!(Topic::parse("state/lobby").is_err());
        assert!(Topic::parse("cmd/dev/basecamp/explode").is_err());
        assert!(Topic::parse("cmd/other/basecamp/goto-beat").is_err());
        assert!(Topic::parse("").is_err());
    }

    #[test]
    fn availability_filter_covers_one_environment() {
        let filter = Topic::availability_filter(Environment::Staging);
        assert!(rumqttc::valid_filter(&filter));

        let own = Topic::availability(Environment::Staging, &DeviceId::new("kiosk")).to_string();
        let other = Topic::availability(Environment::Local, &DeviceId::new("kiosk")).to_string();
        assert!(rumqttc::matches(&own, &filter));
        assert!(!rumqttc::matches(&other, &filter));
        assert!(!rumqttc::matches(&Topic::SyncStatus.to_string(), &filter));
    }

    #[test]
    fn only_commands_are_unretained() {
        assert!(!Topic::command(CommandTarget::All, CommandName::EndTour).is_retained());
        assert!(Topic::exhibit_state(ExhibitKind::Basecamp).is_retained());
        assert!(Topic::availability(Environment::Local, &DeviceId::new("d")).is_retained());
    }
}
