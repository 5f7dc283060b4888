//! Capacités attendues du moteur de lecture
//!
//! Le décodage et le rendu sont externes : le moteur est vu à travers le
//! trait [`PlaybackEngine`], synchrone, appelé depuis le fil des évènements.
//! Les commandes renvoient un `Result` ; un échec est journalisé par
//! l'appelant, jamais propagé comme une interruption de lecture.

use anyhow::Result;

use crate::overlay::MediaItem;
use crate::tracks::{TrackSelectionParameters, Tracks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
}

impl PlaybackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Idle | PlaybackState::Ended)
    }
}

/// File de lecture et transport
pub trait PlaybackQueue {
    fn current_media_item(&self) -> Option<MediaItem>;

    fn current_media_item_index(&self) -> Option<usize>;

    fn media_item_count(&self) -> usize;

    /// Remplace le descripteur à `index` sans interrompre la lecture
    fn replace_media_item(&self, index: usize, item: MediaItem) -> Result<()>;

    fn set_media_items(
        &self,
        items: Vec<MediaItem>,
        start_index: usize,
        start_position_ms: Option<u64>,
    ) -> Result<()>;

    fn add_media_items(&self, items: Vec<MediaItem>) -> Result<()>;

    fn clear_media_items(&self) -> Result<()>;
}

/// Contrôle du transport
pub trait TransportControl {
    fn play(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn seek_to(&self, position_ms: u64) -> Result<()>;

    fn current_position_ms(&self) -> u64;

    fn play_when_ready(&self) -> bool;

    fn playback_state(&self) -> PlaybackState;

    fn set_playback_speed(&self, speed: f32) -> Result<()>;

    fn repeat_mode(&self) -> RepeatMode;

    fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()>;

    fn set_pause_at_end_of_media_items(&self, pause: bool) -> Result<()>;
}

/// Pistes et sélection
pub trait TrackControl {
    fn current_tracks(&self) -> Tracks;

    fn track_selection_parameters(&self) -> TrackSelectionParameters;

    fn set_track_selection_parameters(&self, params: TrackSelectionParameters) -> Result<()>;

    /// Attache un sous-titre externe au média courant
    fn add_subtitle(&self, uri: &str) -> Result<()>;
}

/// Le moteur complet
pub trait PlaybackEngine: PlaybackQueue + TransportControl + TrackControl + Send + Sync {}

impl<T> PlaybackEngine for T where T: PlaybackQueue + TransportControl + TrackControl + Send + Sync {}
