//! Dépôts persistants consultés et mis à jour par le lecteur
//!
//! Le format de stockage est externe : le lecteur ne voit que les traits
//! [`MediaRepository`] et [`PreferencesRepository`]. Toutes les opérations
//! sont indexées par l'identifiant du média (son URI) et idempotentes.
//!
//! [`InMemoryMediaRepository`] implémente toutes les opérations en mémoire
//! et garde le journal des écritures reçues.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::config_ext::LoopMode;
use crate::overlay::{StateOverlay, VideoQualitySelection};

/// Fichier vidéo connu de la bibliothèque
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub uri: String,
    pub name_with_extension: String,
    pub path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub duration_ms: Option<u64>,
}

/// État persistant d'un média
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoState {
    pub uri: String,
    pub position_ms: Option<u64>,
    pub playback_speed: Option<f32>,
    pub video_scale: Option<f32>,
    pub audio_track_index: Option<usize>,
    pub subtitle_track_index: Option<usize>,
    pub video_quality: Option<VideoQualitySelection>,
    pub external_subs: Vec<String>,
    pub last_played_time: Option<DateTime<Utc>>,
}

impl VideoState {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            ..Default::default()
        }
    }

    /// L'état persistant vu comme un overlay
    pub fn overlay(&self) -> StateOverlay {
        StateOverlay {
            position_ms: self.position_ms,
            playback_speed: self.playback_speed,
            video_scale: self.video_scale,
            audio_track_index: self.audio_track_index,
            subtitle_track_index: self.subtitle_track_index,
            video_quality: self.video_quality,
        }
    }
}

#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn get_video_by_uri(&self, uri: &str) -> Result<Option<Video>>;

    async fn get_video_state(&self, uri: &str) -> Result<Option<VideoState>>;

    /// `None` remet la reprise au début
    async fn update_medium_position(&self, uri: &str, position_ms: Option<u64>) -> Result<()>;

    async fn update_medium_playback_speed(&self, uri: &str, speed: f32) -> Result<()>;

    async fn update_medium_audio_track(&self, uri: &str, index: usize) -> Result<()>;

    async fn update_medium_subtitle_track(&self, uri: &str, index: usize) -> Result<()>;

    /// `None` efface la qualité mémorisée (groupe et piste ensemble)
    async fn update_medium_video_quality(
        &self,
        uri: &str,
        selection: Option<VideoQualitySelection>,
    ) -> Result<()>;

    async fn update_medium_last_played_time(&self, uri: &str, time: DateTime<Utc>) -> Result<()>;

    async fn add_external_subtitle_to_medium(&self, uri: &str, subtitle_uri: &str) -> Result<()>;
}

#[async_trait]
pub trait PreferencesRepository: Send + Sync {
    async fn update_loop_mode(&self, mode: LoopMode) -> Result<()>;
}

/// Écriture reçue par le dépôt en mémoire
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryCall {
    Position(String, Option<u64>),
    PlaybackSpeed(String, f32),
    AudioTrack(String, usize),
    SubtitleTrack(String, usize),
    VideoQuality(String, Option<VideoQualitySelection>),
    LastPlayedTime(String),
    ExternalSubtitle(String, String),
}

#[derive(Debug, Default)]
struct Store {
    videos: HashMap<String, Video>,
    states: HashMap<String, VideoState>,
    calls: Vec<RepositoryCall>,
}

#[derive(Debug, Default)]
pub struct InMemoryMediaRepository {
    store: Mutex<Store>,
}

impl InMemoryMediaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_video(&self, video: Video) {
        self.lock().videos.insert(video.uri.clone(), video);
    }

    pub fn insert_state(&self, state: VideoState) {
        self.lock().states.insert(state.uri.clone(), state);
    }

    pub fn state(&self, uri: &str) -> Option<VideoState> {
        self.lock().states.get(uri).cloned()
    }

    /// Écritures reçues, dans l'ordre
    pub fn calls(&self) -> Vec<RepositoryCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, uri: &str, call: RepositoryCall, apply: impl FnOnce(&mut VideoState)) {
        debug!(uri = %uri, ?call, "repository update");
        let mut store = self.lock();
        let state = store
            .states
            .entry(uri.to_string())
            .or_insert_with(|| VideoState::new(uri));
        apply(state);
        store.calls.push(call);
    }
}

#[async_trait]
impl MediaRepository for InMemoryMediaRepository {
    async fn get_video_by_uri(&self, uri: &str) -> Result<Option<Video>> {
        Ok(self.lock().videos.get(uri).cloned())
    }

    async fn get_video_state(&self, uri: &str) -> Result<Option<VideoState>> {
        Ok(self.state(uri))
    }

    async fn update_medium_position(&self, uri: &str, position_ms: Option<u64>) -> Result<()> {
        self.update(uri, RepositoryCall::Position(uri.into(), position_ms), |s| {
            s.position_ms = position_ms
        });
        Ok(())
    }

    async fn update_medium_playback_speed(&self, uri: &str, speed: f32) -> Result<()> {
        self.update(uri, RepositoryCall::PlaybackSpeed(uri.into(), speed), |s| {
            s.playback_speed = Some(speed)
        });
        Ok(())
    }

    async fn update_medium_audio_track(&self, uri: &str, index: usize) -> Result<()> {
        self.update(uri, RepositoryCall::AudioTrack(uri.into(), index), |s| {
            s.audio_track_index = Some(index)
        });
        Ok(())
    }

    async fn update_medium_subtitle_track(&self, uri: &str, index: usize) -> Result<()> {
        self.update(uri, RepositoryCall::SubtitleTrack(uri.into(), index), |s| {
            s.subtitle_track_index = Some(index)
        });
        Ok(())
    }

    async fn update_medium_video_quality(
        &self,
        uri: &str,
        selection: Option<VideoQualitySelection>,
    ) -> Result<()> {
        self.update(uri, RepositoryCall::VideoQuality(uri.into(), selection), |s| {
            s.video_quality = selection
        });
        Ok(())
    }

    async fn update_medium_last_played_time(&self, uri: &str, time: DateTime<Utc>) -> Result<()> {
        self.update(uri, RepositoryCall::LastPlayedTime(uri.into()), |s| {
            s.last_played_time = Some(time)
        });
        Ok(())
    }

    async fn add_external_subtitle_to_medium(&self, uri: &str, subtitle_uri: &str) -> Result<()> {
        self.update(
            uri,
            RepositoryCall::ExternalSubtitle(uri.into(), subtitle_uri.into()),
            |s| {
                if !s.external_subs.iter().any(|sub| sub == subtitle_uri) {
                    s.external_subs.push(subtitle_uri.to_string());
                }
            },
        );
        Ok(())
    }
}
