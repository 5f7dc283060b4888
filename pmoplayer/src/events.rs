//! Évènements émis par le moteur de lecture

use crate::engine::{PlaybackState, RepeatMode};
use crate::overlay::MediaItem;
use crate::tracks::{TrackSelectionParameters, Tracks};

/// Cause d'un changement d'élément courant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    /// Le même élément recommence
    Repeat,
    Auto,
    Seek,
    PlaylistChanged,
}

/// Cause d'une discontinuité de position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscontinuityReason {
    AutoTransition,
    Seek,
    SeekAdjustment,
    Skip,
    Remove,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayWhenReadyReason {
    UserRequest,
    AudioFocusLoss,
    AudioBecomingNoisy,
    Remote,
    EndOfMediaItem,
    SuppressedTooLong,
}

/// Position dans la file à un instant donné
#[derive(Debug, Clone, PartialEq)]
pub struct PositionInfo {
    pub media_item: Option<MediaItem>,
    pub media_item_index: usize,
    pub position_ms: u64,
}

impl PositionInfo {
    pub fn new(media_item: Option<MediaItem>, media_item_index: usize, position_ms: u64) -> Self {
        Self {
            media_item,
            media_item_index,
            position_ms,
        }
    }

    /// Vrai si les deux positions désignent le même élément de la file
    pub fn same_item(&self, other: &PositionInfo) -> bool {
        self.media_item_index == other.media_item_index
            && self.media_item.as_ref().map(MediaItem::media_id)
                == other.media_item.as_ref().map(MediaItem::media_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    MediaItemTransition {
        item: Option<MediaItem>,
        reason: TransitionReason,
    },
    PositionDiscontinuity {
        old: PositionInfo,
        new: PositionInfo,
        reason: DiscontinuityReason,
    },
    TracksChanged(Tracks),
    TrackSelectionParametersChanged(TrackSelectionParameters),
    PlaybackParametersChanged {
        speed: f32,
    },
    PlaybackStateChanged(PlaybackState),
    PlayWhenReadyChanged {
        play_when_ready: bool,
        reason: PlayWhenReadyReason,
    },
    IsPlayingChanged(bool),
    RepeatModeChanged(RepeatMode),
}

impl PlayerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::MediaItemTransition { .. } => "media_item_transition",
            PlayerEvent::PositionDiscontinuity { .. } => "position_discontinuity",
            PlayerEvent::TracksChanged(_) => "tracks_changed",
            PlayerEvent::TrackSelectionParametersChanged(_) => "track_selection_parameters_changed",
            PlayerEvent::PlaybackParametersChanged { .. } => "playback_parameters_changed",
            PlayerEvent::PlaybackStateChanged(_) => "playback_state_changed",
            PlayerEvent::PlayWhenReadyChanged { .. } => "play_when_ready_changed",
            PlayerEvent::IsPlayingChanged(_) => "is_playing_changed",
            PlayerEvent::RepeatModeChanged(_) => "repeat_mode_changed",
        }
    }
}
