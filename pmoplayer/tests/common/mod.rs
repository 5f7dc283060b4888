#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use pmocache::StreamCacheCoordinator;
use pmoplayer::{
    BackgroundTasks, InMemoryMediaRepository, LoopMode, MediaItem, PlaybackEventReconciler,
    PlaybackQueue, PlaybackState, PlayerPreferences, PreferencesRepository, RepeatMode,
    TrackControl, TrackFormat, TrackGroup, TrackSelectionParameters, TrackType, Tracks,
    TransportControl,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Commande reçue par le moteur factice
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Replace(usize),
    SetItems(usize),
    AddItems(usize),
    Clear,
    Play,
    Stop,
    Seek(u64),
    Speed(f32),
    Repeat(RepeatMode),
    PauseAtEnd(bool),
    TrackParams,
    AddSubtitle(String),
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub items: Vec<MediaItem>,
    pub index: Option<usize>,
    pub position_ms: u64,
    pub play_when_ready: bool,
    pub state: PlaybackState,
    pub repeat: RepeatMode,
    pub tracks: Tracks,
    pub params: TrackSelectionParameters,
    pub calls: Vec<EngineCall>,
}

/// Moteur de lecture factice : applique les commandes et les journalise
#[derive(Debug, Default)]
pub struct FakeEngine {
    pub state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn with_items(items: Vec<MediaItem>) -> Arc<Self> {
        let engine = FakeEngine::default();
        {
            let mut state = engine.state.lock().unwrap();
            state.index = if items.is_empty() { None } else { Some(0) };
            state.items = items;
            state.play_when_ready = true;
        }
        Arc::new(engine)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn item(&self, index: usize) -> MediaItem {
        self.state.lock().unwrap().items[index].clone()
    }

    pub fn set_tracks(&self, tracks: Tracks) {
        self.state.lock().unwrap().tracks = tracks;
    }

    pub fn set_position(&self, position_ms: u64) {
        self.state.lock().unwrap().position_ms = position_ms;
    }

    pub fn set_repeat(&self, mode: RepeatMode) {
        self.state.lock().unwrap().repeat = mode;
    }

    pub fn set_params(&self, params: TrackSelectionParameters) {
        self.state.lock().unwrap().params = params;
    }

    pub fn params(&self) -> TrackSelectionParameters {
        self.state.lock().unwrap().params.clone()
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl PlaybackQueue for FakeEngine {
    fn current_media_item(&self) -> Option<MediaItem> {
        let state = self.state.lock().unwrap();
        state.index.and_then(|i| state.items.get(i).cloned())
    }

    fn current_media_item_index(&self) -> Option<usize> {
        self.state.lock().unwrap().index
    }

    fn media_item_count(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    fn replace_media_item(&self, index: usize, item: MediaItem) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.items[index] = item;
        state.calls.push(EngineCall::Replace(index));
        Ok(())
    }

    fn set_media_items(
        &self,
        items: Vec<MediaItem>,
        start_index: usize,
        start_position_ms: Option<u64>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::SetItems(items.len()));
        state.index = if items.is_empty() { None } else { Some(start_index) };
        state.items = items;
        state.position_ms = start_position_ms.unwrap_or(0);
        Ok(())
    }

    fn add_media_items(&self, items: Vec<MediaItem>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::AddItems(items.len()));
        state.items.extend(items);
        if state.index.is_none() && !state.items.is_empty() {
            state.index = Some(0);
        }
        Ok(())
    }

    fn clear_media_items(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.items.clear();
        state.index = None;
        state.calls.push(EngineCall::Clear);
        Ok(())
    }
}

impl TransportControl for FakeEngine {
    fn play(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.play_when_ready = true;
        state.calls.push(EngineCall::Play);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.play_when_ready = false;
        state.state = PlaybackState::Idle;
        state.calls.push(EngineCall::Stop);
        Ok(())
    }

    fn seek_to(&self, position_ms: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.position_ms = position_ms;
        state.calls.push(EngineCall::Seek(position_ms));
        Ok(())
    }

    fn current_position_ms(&self) -> u64 {
        self.state.lock().unwrap().position_ms
    }

    fn play_when_ready(&self) -> bool {
        self.state.lock().unwrap().play_when_ready
    }

    fn playback_state(&self) -> PlaybackState {
        self.state.lock().unwrap().state
    }

    fn set_playback_speed(&self, speed: f32) -> Result<()> {
        self.record(EngineCall::Speed(speed));
        Ok(())
    }

    fn repeat_mode(&self) -> RepeatMode {
        self.state.lock().unwrap().repeat
    }

    fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.repeat = mode;
        state.calls.push(EngineCall::Repeat(mode));
        Ok(())
    }

    fn set_pause_at_end_of_media_items(&self, pause: bool) -> Result<()> {
        self.record(EngineCall::PauseAtEnd(pause));
        Ok(())
    }
}

impl TrackControl for FakeEngine {
    fn current_tracks(&self) -> Tracks {
        self.state.lock().unwrap().tracks.clone()
    }

    fn track_selection_parameters(&self) -> TrackSelectionParameters {
        self.state.lock().unwrap().params.clone()
    }

    fn set_track_selection_parameters(&self, params: TrackSelectionParameters) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.params = params;
        state.calls.push(EngineCall::TrackParams);
        Ok(())
    }

    fn add_subtitle(&self, uri: &str) -> Result<()> {
        self.record(EngineCall::AddSubtitle(uri.to_string()));
        Ok(())
    }
}

/// Préférences mémorisées en mémoire
#[derive(Debug, Default)]
pub struct RecordingPreferences {
    pub loop_modes: Mutex<Vec<LoopMode>>,
}

#[async_trait]
impl PreferencesRepository for RecordingPreferences {
    async fn update_loop_mode(&self, mode: LoopMode) -> Result<()> {
        self.loop_modes.lock().unwrap().push(mode);
        Ok(())
    }
}

/// Disposition de pistes : un groupe vidéo de deux qualités, deux groupes
/// audio et un groupe de sous-titres.
pub fn sample_tracks() -> Tracks {
    Tracks::new(vec![
        TrackGroup::new(
            "video",
            TrackType::Video,
            vec![
                TrackFormat::video(480, 900_000),
                TrackFormat::video(1080, 5_000_000),
            ],
        )
        .with_selected(1),
        TrackGroup::new("audio-en", TrackType::Audio, vec![TrackFormat::language("en")])
            .with_selected(0),
        TrackGroup::new("audio-fr", TrackType::Audio, vec![TrackFormat::language("fr")]),
        TrackGroup::new("text-en", TrackType::Text, vec![TrackFormat::language("en")]),
    ])
}

pub struct Harness {
    pub tmp: TempDir,
    pub engine: Arc<FakeEngine>,
    pub repository: Arc<InMemoryMediaRepository>,
    pub preferences: Arc<RecordingPreferences>,
    pub coordinator: Arc<StreamCacheCoordinator>,
    pub tasks: Arc<BackgroundTasks>,
    pub reconciler: PlaybackEventReconciler,
}

impl Harness {
    pub fn new(items: Vec<MediaItem>, prefs: PlayerPreferences) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let engine = FakeEngine::with_items(items);
        let repository = Arc::new(InMemoryMediaRepository::new());
        let preferences = Arc::new(RecordingPreferences::default());
        let coordinator = Arc::new(StreamCacheCoordinator::open(tmp.path()).unwrap());
        let tasks = Arc::new(BackgroundTasks::new(64).unwrap());
        let reconciler = PlaybackEventReconciler::new(
            engine.clone(),
            repository.clone(),
            preferences.clone(),
            Some(coordinator.clone()),
            tasks.clone(),
            prefs,
        );
        Self {
            tmp,
            engine,
            repository,
            preferences,
            coordinator,
            tasks,
            reconciler,
        }
    }

    pub async fn settle(&self) {
        self.tasks.flush().await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
