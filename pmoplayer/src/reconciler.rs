//! Réconciliation des évènements du moteur de lecture
//!
//! Le [`PlaybackEventReconciler`] reçoit les évènements du moteur un par un,
//! sur le fil des évènements. Il réécrit les descripteurs de la file (ils
//! sont immuables, donc remplacés), pilote le coordinateur du cache de flux
//! et soumet les écritures du dépôt à la file d'arrière-plan. Aucun
//! gestionnaire n'attend d'E/S.
//!
//! La restauration des pistes mémorisées se fait une seule fois par élément :
//! l'état passe de [`Readiness::AwaitingItemReady`] à [`Readiness::ItemReady`]
//! au premier ensemble de pistes non vide qui suit une transition.

use chrono::Utc;
use pmocache::StreamCacheCoordinator;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config_ext::{LoopMode, PlayerPreferences, Resume};
use crate::engine::{PlaybackEngine, PlaybackState, RepeatMode};
use crate::events::{
    DiscontinuityReason, PlayWhenReadyReason, PlayerEvent, PositionInfo, TransitionReason,
};
use crate::overlay::{MediaItem, OverlayPatch};
use crate::quality::VideoQualityOverrideResolver;
use crate::repository::{MediaRepository, PreferencesRepository};
use crate::tasks::BackgroundTasks;
use crate::tracks::{
    manually_selected_track_index, switch_track, TrackSelectionParameters, TrackType, Tracks,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    #[default]
    AwaitingItemReady,
    ItemReady,
}

/// Média dont la lecture est en cours
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveItem {
    pub media_id: String,
    pub uri: String,
    pub mime_type: Option<String>,
}

impl From<&MediaItem> for ActiveItem {
    fn from(item: &MediaItem) -> Self {
        Self {
            media_id: item.media_id().to_string(),
            uri: item.uri().to_string(),
            mime_type: item.mime_type().map(str::to_string),
        }
    }
}

#[derive(Debug, Default)]
struct ReconcilerState {
    readiness: Readiness,
    active: Option<ActiveItem>,
    // Redémarrage déjà demandé pour la fin de l'élément courant
    restart_pending: bool,
}

pub struct PlaybackEventReconciler {
    engine: Arc<dyn PlaybackEngine>,
    media_repository: Arc<dyn MediaRepository>,
    preferences_repository: Arc<dyn PreferencesRepository>,
    coordinator: Option<Arc<StreamCacheCoordinator>>,
    tasks: Arc<BackgroundTasks>,
    preferences: RwLock<PlayerPreferences>,
    state: Mutex<ReconcilerState>,
    end_requested: CancellationToken,
}

impl PlaybackEventReconciler {
    /// `coordinator` vaut `None` en mode dégradé (cache indisponible)
    pub fn new(
        engine: Arc<dyn PlaybackEngine>,
        media_repository: Arc<dyn MediaRepository>,
        preferences_repository: Arc<dyn PreferencesRepository>,
        coordinator: Option<Arc<StreamCacheCoordinator>>,
        tasks: Arc<BackgroundTasks>,
        preferences: PlayerPreferences,
    ) -> Self {
        Self {
            engine,
            media_repository,
            preferences_repository,
            coordinator,
            tasks,
            preferences: RwLock::new(preferences),
            state: Mutex::new(ReconcilerState::default()),
            end_requested: CancellationToken::new(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.lock_state().readiness
    }

    pub fn active_item(&self) -> Option<ActiveItem> {
        self.lock_state().active.clone()
    }

    pub fn preferences(&self) -> PlayerPreferences {
        self.preferences
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_preferences(&self, preferences: PlayerPreferences) {
        *self
            .preferences
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = preferences;
    }

    pub fn coordinator(&self) -> Option<&Arc<StreamCacheCoordinator>> {
        self.coordinator.as_ref()
    }

    /// Jeton annulé quand la session hôte doit se terminer
    pub fn end_requested(&self) -> CancellationToken {
        self.end_requested.clone()
    }

    pub fn request_end(&self) {
        info!("Player session end requested");
        self.end_requested.cancel();
    }

    /// Rend `item` actif sans attendre l'évènement de transition
    pub fn activate(&self, item: &MediaItem) {
        self.lock_state().active = Some(ActiveItem::from(item));
        if let Some(coordinator) = &self.coordinator {
            coordinator.set_active_media_id(item.media_id());
        }
    }

    pub fn handle_event(&self, event: PlayerEvent) {
        debug!(event = event.name(), "player event");
        match event {
            PlayerEvent::MediaItemTransition { item, reason } => {
                self.on_media_item_transition(item.as_ref(), reason)
            }
            PlayerEvent::PositionDiscontinuity { old, new, reason } => {
                self.on_position_discontinuity(&old, &new, reason)
            }
            PlayerEvent::TracksChanged(tracks) => self.on_tracks_changed(&tracks),
            PlayerEvent::TrackSelectionParametersChanged(params) => {
                self.on_track_selection_parameters_changed(&params)
            }
            PlayerEvent::PlaybackParametersChanged { speed } => {
                self.on_playback_parameters_changed(speed)
            }
            PlayerEvent::PlaybackStateChanged(state) => self.on_playback_state_changed(state),
            PlayerEvent::PlayWhenReadyChanged {
                play_when_ready,
                reason,
            } => self.on_play_when_ready_changed(play_when_ready, reason),
            PlayerEvent::IsPlayingChanged(playing) => self.on_is_playing_changed(playing),
            PlayerEvent::RepeatModeChanged(mode) => self.on_repeat_mode_changed(mode),
        }
    }

    pub fn on_media_item_transition(&self, item: Option<&MediaItem>, reason: TransitionReason) {
        if reason == TransitionReason::Repeat {
            return;
        }
        {
            let mut state = self.lock_state();
            state.readiness = Readiness::AwaitingItemReady;
            state.restart_pending = false;
            if let Some(item) = item {
                state.active = Some(ActiveItem::from(item));
            }
        }
        let Some(item) = item else {
            return;
        };
        debug!(media_id = %item.media_id(), ?reason, "media item transition");

        if let Some(coordinator) = &self.coordinator {
            coordinator.set_active_media_id(item.media_id());
        }

        let prefs = self.preferences();
        let speed = item
            .overlay()
            .playback_speed
            .unwrap_or(prefs.default_playback_speed);
        log_engine("set_playback_speed", self.engine.set_playback_speed(speed));

        if prefs.resume == Resume::Yes {
            if let Some(position) = item.overlay().position_ms {
                log_engine("seek_to", self.engine.seek_to(position));
            }
        }
    }

    pub fn on_position_discontinuity(
        &self,
        old: &PositionInfo,
        new: &PositionInfo,
        reason: DiscontinuityReason,
    ) {
        let Some(old_item) = old.media_item.as_ref() else {
            return;
        };
        let media_id = old_item.media_id().to_string();

        match reason {
            DiscontinuityReason::Seek | DiscontinuityReason::AutoTransition => {
                if new.media_item.is_none() || old.same_item(new) {
                    return;
                }
                // Un élément terminé repart du début
                let position = match reason {
                    DiscontinuityReason::Seek => Some(old.position_ms),
                    _ => None,
                };
                log_engine(
                    "replace_media_item",
                    self.engine.replace_media_item(
                        old.media_item_index,
                        old_item.copy_with(&OverlayPatch::new().position(position)),
                    ),
                );
                self.persist_position(media_id, position);
            }
            DiscontinuityReason::Remove => {
                self.persist_position(media_id, Some(old.position_ms));
            }
            _ => {}
        }
    }

    pub fn on_tracks_changed(&self, tracks: &Tracks) {
        if tracks.is_empty() {
            return;
        }
        let first_ready = {
            let mut state = self.lock_state();
            let first = state.readiness == Readiness::AwaitingItemReady;
            state.readiness = Readiness::ItemReady;
            first
        };

        if first_ready {
            if self.preferences().remember_selections {
                self.restore_selections(tracks);
            }
            self.update_quality_key(tracks, true);
        } else {
            self.update_quality_key(tracks, false);
        }
    }

    fn restore_selections(&self, tracks: &Tracks) {
        let (Some(item), Some(index)) = (
            self.engine.current_media_item(),
            self.engine.current_media_item_index(),
        ) else {
            return;
        };
        let overlay = item.overlay().clone();

        if let Some(audio) = overlay.audio_track_index {
            self.apply_switch(tracks, TrackType::Audio, audio);
        }
        if let Some(subtitle) = overlay.subtitle_track_index {
            self.apply_switch(tracks, TrackType::Text, subtitle);
        }

        if let Some(selection) = overlay.video_quality {
            let params = self.engine.track_selection_parameters();
            match VideoQualityOverrideResolver::resolve(tracks, &params, selection) {
                Ok(params) => {
                    log_engine(
                        "set_track_selection_parameters",
                        self.engine.set_track_selection_parameters(params),
                    );
                }
                Err(e) => {
                    debug!(media_id = %item.media_id(), "stored video quality dropped: {}", e);
                    let repository = self.media_repository.clone();
                    let media_id = item.media_id().to_string();
                    self.tasks.submit("clear_video_quality", async move {
                        repository.update_medium_video_quality(&media_id, None).await
                    });
                    log_engine(
                        "replace_media_item",
                        self.engine.replace_media_item(
                            index,
                            item.copy_with(&OverlayPatch::new().video_quality(None)),
                        ),
                    );
                }
            }
        }
    }

    fn apply_switch(&self, tracks: &Tracks, track_type: TrackType, index: usize) {
        let params = self.engine.track_selection_parameters();
        match switch_track(tracks, &params, track_type, index) {
            Some(params) => log_engine(
                "set_track_selection_parameters",
                self.engine.set_track_selection_parameters(params),
            ),
            None => debug!(?track_type, index, "stored track index not available"),
        }
    }

    /// Transmet la qualité sélectionnée au coordinateur. Hors première
    /// restauration, seul un changement de clé déclenche une éviction.
    fn update_quality_key(&self, tracks: &Tracks, first_ready: bool) {
        let Some(coordinator) = self.coordinator.clone() else {
            return;
        };
        let key = tracks.selected_quality_key();
        if !first_ready && (key.is_none() || key == coordinator.current_quality_key()) {
            return;
        }
        debug!(quality = ?key, "video quality key");
        coordinator.set_current_video_quality_key(key);
        self.tasks.submit("delete_other_video_qualities", async move {
            coordinator.delete_other_video_qualities().await;
            Ok(())
        });
    }

    pub fn on_track_selection_parameters_changed(&self, params: &TrackSelectionParameters) {
        let (Some(item), Some(index)) = (
            self.engine.current_media_item(),
            self.engine.current_media_item_index(),
        ) else {
            return;
        };
        let tracks = self.engine.current_tracks();
        let audio = manually_selected_track_index(&tracks, params, TrackType::Audio);
        let subtitle = manually_selected_track_index(&tracks, params, TrackType::Text);
        let video = VideoQualityOverrideResolver::current_selection(&tracks, params);

        let overlay = item.overlay();
        let media_id = item.media_id().to_string();
        let mut patch = OverlayPatch::new();

        if audio != overlay.audio_track_index {
            patch = patch.audio_track(audio);
            if let Some(audio) = audio {
                let repository = self.media_repository.clone();
                let id = media_id.clone();
                self.tasks.submit("update_audio_track", async move {
                    repository.update_medium_audio_track(&id, audio).await
                });
            }
        }
        if subtitle != overlay.subtitle_track_index {
            patch = patch.subtitle_track(subtitle);
            if let Some(subtitle) = subtitle {
                let repository = self.media_repository.clone();
                let id = media_id.clone();
                self.tasks.submit("update_subtitle_track", async move {
                    repository.update_medium_subtitle_track(&id, subtitle).await
                });
            }
        }
        if video != overlay.video_quality {
            patch = patch.video_quality(video);
            let repository = self.media_repository.clone();
            let id = media_id.clone();
            self.tasks.submit("update_video_quality", async move {
                repository.update_medium_video_quality(&id, video).await
            });
        }

        if !patch.is_empty() {
            log_engine(
                "replace_media_item",
                self.engine.replace_media_item(index, item.copy_with(&patch)),
            );
        }
    }

    pub fn on_playback_parameters_changed(&self, speed: f32) {
        let (Some(item), Some(index)) = (
            self.engine.current_media_item(),
            self.engine.current_media_item_index(),
        ) else {
            return;
        };
        let repository = self.media_repository.clone();
        let media_id = item.media_id().to_string();
        self.tasks.submit("update_playback_speed", async move {
            repository.update_medium_playback_speed(&media_id, speed).await
        });

        if item.overlay().playback_speed != Some(speed) {
            log_engine(
                "replace_media_item",
                self.engine
                    .replace_media_item(index, item.copy_with(&OverlayPatch::new().playback_speed(Some(speed)))),
            );
        }
    }

    pub fn on_playback_state_changed(&self, state: PlaybackState) {
        match state {
            PlaybackState::Ended | PlaybackState::Idle => {
                log_engine(
                    "set_track_selection_parameters",
                    self.engine
                        .set_track_selection_parameters(TrackSelectionParameters::default()),
                );
                let speed = self.preferences().default_playback_speed;
                log_engine("set_playback_speed", self.engine.set_playback_speed(speed));

                if state == PlaybackState::Ended && self.engine.repeat_mode() != RepeatMode::Off {
                    self.restart_at_end();
                }
            }
            PlaybackState::Ready => {
                self.lock_state().restart_pending = false;
                let Some(item) = self.engine.current_media_item() else {
                    return;
                };
                let repository = self.media_repository.clone();
                let media_id = item.media_id().to_string();
                let now = Utc::now();
                self.tasks.submit("update_last_played_time", async move {
                    repository.update_medium_last_played_time(&media_id, now).await
                });
            }
            PlaybackState::Buffering => {}
        }
    }

    pub fn on_play_when_ready_changed(&self, _play_when_ready: bool, reason: PlayWhenReadyReason) {
        if reason != PlayWhenReadyReason::EndOfMediaItem {
            return;
        }
        if self.engine.repeat_mode() != RepeatMode::Off {
            self.restart_at_end();
        } else {
            log_engine("clear_media_items", self.engine.clear_media_items());
            log_engine("stop", self.engine.stop());
            self.request_end();
        }
    }

    pub fn on_is_playing_changed(&self, _playing: bool) {
        self.checkpoint_position();
    }

    pub fn on_repeat_mode_changed(&self, mode: RepeatMode) {
        let loop_mode = LoopMode::from(mode);
        {
            let mut prefs = self
                .preferences
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            prefs.loop_mode = loop_mode;
        }
        let repository = self.preferences_repository.clone();
        self.tasks.submit("update_loop_mode", async move {
            repository.update_loop_mode(loop_mode).await
        });
    }

    /// Persiste la position courante de l'élément courant
    pub fn checkpoint_position(&self) {
        let Some(item) = self.engine.current_media_item() else {
            return;
        };
        let position = self.engine.current_position_ms();
        self.persist_position(item.media_id().to_string(), Some(position));
    }

    fn persist_position(&self, media_id: String, position: Option<u64>) {
        let repository = self.media_repository.clone();
        self.tasks.submit("update_position", async move {
            repository.update_medium_position(&media_id, position).await
        });
    }

    /// Relance l'élément depuis le début, une seule fois par fin d'élément
    fn restart_at_end(&self) {
        {
            let mut state = self.lock_state();
            if state.restart_pending {
                return;
            }
            state.restart_pending = true;
        }
        log_engine("seek_to", self.engine.seek_to(0));
        log_engine("play", self.engine.play());
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ReconcilerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn log_engine(command: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        warn!(command, "Playback engine command failed: {:#}", e);
    }
}
