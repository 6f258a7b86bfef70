use crate::error::{Result, SyncError};
use crate::protocol::{Command, GotoBeat, LoadTour, SetVolume};
use crate::topic::Topic;
use crate::transport::Transport;
use crate::types::{CommandTarget, DeviceId, ExhibitKind};
use std::sync::Arc;

/// Optional flags for `goto-beat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GotoBeatOptions {
    pub presentation_mode: Option<bool>,
}

/// Publishes one-way commands from the controller
///
/// Every command is enveloped and published unretained on its computed
/// topic. A returned `Ok` means the transport accepted the publish; there is
/// no reply and no cancellation. To undo a command, publish a superseding one.
#[derive(Clone)]
pub struct CommandDispatcher {
    source: DeviceId,
    transport: Arc<dyn Transport>,
}

impl CommandDispatcher {
    pub fn new(source: DeviceId, transport: Arc<dyn Transport>) -> Self {
        Self { source, transport }
    }

    /// Navigate an exhibit to a beat
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use exhibit_sync::{CommandDispatcher, ExhibitKind, GotoBeatOptions};
    /// # fn run(dispatcher: &CommandDispatcher) -> exhibit_sync::Result<()> {
    /// dispatcher.goto_beat(ExhibitKind::Basecamp, "beat-7", GotoBeatOptions::default())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn goto_beat(&self, kind: ExhibitKind, beat_id: &str, opts: GotoBeatOptions) -> Result<()> {
        let command = Command::GotoBeat(GotoBeat {
            beat_id: beat_id.to_string(),
            presentation_mode: opts.presentation_mode,
            playpause: None,
        });
        self.send(CommandTarget::Exhibit(kind), &command)
    }

    /// Navigate and set inline playback in one command
    ///
    /// Only exhibits with inline playback control accept this; others get an
    /// `UnsupportedCommand` error and nothing is published.
    pub fn goto_beat_with_playpause(
        &self,
        kind: ExhibitKind,
        beat_id: &str,
        playing: bool,
        opts: GotoBeatOptions,
    ) -> Result<()> {
        if !kind.supports_playpause() {
            return Err(SyncError::UnsupportedCommand(format!(
                "{} has no playback control",
                kind
            )));
        }

        let command = Command::GotoBeat(GotoBeat {
            beat_id: beat_id.to_string(),
            presentation_mode: opts.presentation_mode,
            playpause: Some(playing),
        });
        self.send(CommandTarget::Exhibit(kind), &command)
    }

    /// Ask the authority to load a tour
    ///
    /// The active tour only changes locally once the authority's snapshot
    /// echoes it back.
    pub fn load_tour(&self, tour_id: &str) -> Result<()> {
        let command = Command::LoadTour(LoadTour {
            tour_id: tour_id.to_string(),
        });
        self.send(CommandTarget::Gec, &command)
    }

    /// Mute or unmute an exhibit
    pub fn set_volume(&self, kind: ExhibitKind, muted: bool) -> Result<()> {
        let command = Command::SetVolume(SetVolume::from_muted(muted));
        self.send(CommandTarget::Exhibit(kind), &command)
    }

    /// End the tour on every exhibit
    pub fn end_tour(&self) -> Result<()> {
        self.send(CommandTarget::All, &Command::EndTour)
    }

    /// Ask the authority to re-emit its full-state snapshot
    pub fn sync(&self) -> Result<()> {
        self.send(CommandTarget::Gec, &Command::Sync)
    }

    /// Ask the authority to re-emit its settings
    pub fn republish_settings(&self) -> Result<()> {
        self.send(CommandTarget::Gec, &Command::RepublishSettings)
    }

    /// Publish any command to a target
    pub fn send(&self, target: CommandTarget, command: &Command) -> Result<()> {
        let topic = Topic::command(target, command.name());
        let payload = command.encode(&self.source)?;
        tracing::debug!("Sending {} to {}", command.name(), topic);

        let retain = topic.is_retained();
        self.transport.publish(&topic.to_string(), payload, retain).map_err(|e| {
            tracing::warn!("Failed to publish {}: {}", topic, e);
            e
        })
    }
}
