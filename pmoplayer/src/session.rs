//! Session de lecture
//!
//! La [`PlayerSession`] assemble le moteur de lecture, le dépôt, le cache de
//! flux et le réconciliateur pour la durée d'une lecture. Si le cache ne
//! peut pas être ouvert, la session fonctionne quand même, sans cache ni
//! préchargement.

use pmocache::{
    ClearPolicy, DashSegmentPrefetcher, HttpRangeFetcher, PrefetchSettings, RangeFetcher,
    SegmentPrefetcher, StreamCacheConfigExt, StreamCacheCoordinator,
};
use pmoconfig::Config;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::admit_media_items;
use crate::commands::{CommandResult, SessionCommand};
use crate::config_ext::{PlayerConfigExt, PlayerPreferences};
use crate::engine::{PlaybackEngine, PlaybackState, RepeatMode};
use crate::errors::{PlayerError, Result};
use crate::events::PlayerEvent;
use crate::overlay::{MediaItem, OverlayPatch};
use crate::reconciler::{log_engine, PlaybackEventReconciler};
use crate::repository::{MediaRepository, PreferencesRepository};
use crate::tasks::{BackgroundTasks, DEFAULT_QUEUE_CAPACITY};
use crate::tracks::TrackType;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Cache de flux de la session et son amont
pub struct StreamCacheSetup {
    pub coordinator: Arc<StreamCacheCoordinator>,
    pub fetcher: Arc<dyn RangeFetcher>,
    pub prefetch: PrefetchSettings,
    pub clear_policy: ClearPolicy,
}

/// Réglages de construction d'une session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub preferences: PlayerPreferences,
    pub queue_capacity: usize,
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            preferences: PlayerPreferences::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

struct CacheRuntime {
    coordinator: Arc<StreamCacheCoordinator>,
    prefetcher: Arc<SegmentPrefetcher>,
    dash: DashSegmentPrefetcher,
    clear_policy: ClearPolicy,
}

pub struct PlayerSession {
    engine: Arc<dyn PlaybackEngine>,
    media_repository: Arc<dyn MediaRepository>,
    reconciler: Arc<PlaybackEventReconciler>,
    tasks: Arc<BackgroundTasks>,
    cache: Option<CacheRuntime>,
    shutdown_grace: Duration,
    closed: AtomicBool,
}

impl PlayerSession {
    /// Construit la session. Doit être appelé depuis un runtime tokio.
    ///
    /// `cache` vaut `None` pour une session sans cache de flux.
    pub fn new(
        engine: Arc<dyn PlaybackEngine>,
        media_repository: Arc<dyn MediaRepository>,
        preferences_repository: Arc<dyn PreferencesRepository>,
        cache: Option<StreamCacheSetup>,
        options: SessionOptions,
    ) -> Result<Self> {
        let tasks = Arc::new(BackgroundTasks::new(options.queue_capacity)?);

        let cache = match cache {
            Some(setup) => {
                let prefetcher = SegmentPrefetcher::new(
                    setup.coordinator.clone(),
                    setup.fetcher,
                    setup.prefetch,
                )?;
                let prefetcher = Arc::new(prefetcher);
                Some(CacheRuntime {
                    coordinator: setup.coordinator,
                    dash: DashSegmentPrefetcher::new(prefetcher.clone()),
                    prefetcher,
                    clear_policy: setup.clear_policy,
                })
            }
            None => None,
        };

        let preferences = options.preferences;
        log_engine(
            "set_repeat_mode",
            engine.set_repeat_mode(RepeatMode::from(preferences.loop_mode)),
        );
        log_engine(
            "set_pause_at_end_of_media_items",
            engine.set_pause_at_end_of_media_items(!preferences.autoplay),
        );

        let reconciler = Arc::new(PlaybackEventReconciler::new(
            engine.clone(),
            media_repository.clone(),
            preferences_repository,
            cache.as_ref().map(|c| c.coordinator.clone()),
            tasks.clone(),
            preferences,
        ));

        info!(with_cache = cache.is_some(), "Player session started");
        Ok(Self {
            engine,
            media_repository,
            reconciler,
            tasks,
            cache,
            shutdown_grace: options.shutdown_grace,
            closed: AtomicBool::new(false),
        })
    }

    /// Construit la session depuis la configuration.
    ///
    /// Un cache impossible à ouvrir est journalisé et la session continue
    /// sans lui.
    pub fn from_config(
        config: Arc<Config>,
        engine: Arc<dyn PlaybackEngine>,
        media_repository: Arc<dyn MediaRepository>,
    ) -> Result<Self> {
        let preferences = config
            .get_player_preferences()
            .map_err(PlayerError::config)?;

        let cache = match Self::cache_from_config(&config) {
            Ok(setup) => Some(setup),
            Err(e) => {
                warn!("Stream cache unavailable, playing without it: {:#}", e);
                None
            }
        };

        let options = SessionOptions {
            preferences,
            ..SessionOptions::default()
        };
        Self::new(engine, media_repository, config, cache, options)
    }

    fn cache_from_config(config: &Config) -> anyhow::Result<StreamCacheSetup> {
        Ok(StreamCacheSetup {
            coordinator: config.create_stream_cache()?,
            fetcher: Arc::new(HttpRangeFetcher::new()?),
            prefetch: config.get_prefetch_settings()?,
            clear_policy: config.get_stream_cache_clear_policy()?,
        })
    }

    pub fn reconciler(&self) -> &Arc<PlaybackEventReconciler> {
        &self.reconciler
    }

    pub fn tasks(&self) -> &Arc<BackgroundTasks> {
        &self.tasks
    }

    pub fn coordinator(&self) -> Option<&Arc<StreamCacheCoordinator>> {
        self.cache.as_ref().map(|c| &c.coordinator)
    }

    pub fn prefetcher(&self) -> Option<&Arc<SegmentPrefetcher>> {
        self.cache.as_ref().map(|c| &c.prefetcher)
    }

    /// Vrai si la session tourne sans cache de flux
    pub fn is_degraded(&self) -> bool {
        self.cache.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Jeton annulé quand la session demande à être terminée par son hôte
    pub fn end_requested(&self) -> CancellationToken {
        self.reconciler.end_requested()
    }

    pub fn handle_event(&self, event: PlayerEvent) {
        if self.is_closed() {
            debug!(event = event.name(), "event ignored, session closed");
            return;
        }
        self.reconciler.handle_event(event);
    }

    /// Remplace la file de lecture. L'élément de départ devient actif avant
    /// même l'évènement de transition.
    pub async fn set_media_items(
        &self,
        items: Vec<MediaItem>,
        start_index: usize,
        start_position_ms: Option<u64>,
    ) -> Result<()> {
        self.ensure_open()?;
        if let Some(start) = items.get(start_index) {
            self.reconciler.activate(start);
        }
        let admitted = admit_media_items(self.media_repository.as_ref(), items).await;
        log_engine(
            "set_media_items",
            self.engine
                .set_media_items(admitted, start_index, start_position_ms),
        );
        Ok(())
    }

    pub async fn add_media_items(&self, items: Vec<MediaItem>) -> Result<()> {
        self.ensure_open()?;
        let admitted = admit_media_items(self.media_repository.as_ref(), items).await;
        log_engine("add_media_items", self.engine.add_media_items(admitted));
        Ok(())
    }

    /// Précharge la suite du média actif.
    ///
    /// `byte_position` et `content_length` décrivent la lecture d'un flux
    /// simple ; un flux DASH se repère sur la position de lecture. Renvoie le
    /// nombre de téléchargements lancés.
    pub async fn on_playback_progress(&self, byte_position: u64, content_length: Option<u64>) -> usize {
        if self.is_closed() {
            return 0;
        }
        let (Some(cache), Some(active)) = (self.cache.as_ref(), self.reconciler.active_item())
        else {
            return 0;
        };

        if DashSegmentPrefetcher::is_dash(active.mime_type.as_deref()) {
            let position_ms = self.engine.current_position_ms();
            match cache
                .dash
                .on_progress(&active.media_id, &active.uri, active.mime_type.as_deref(), position_ms)
                .await
            {
                Ok(scheduled) => scheduled,
                Err(e) => {
                    debug!(media_id = %active.media_id, "DASH prefetch skipped: {}", e);
                    0
                }
            }
        } else {
            cache
                .prefetcher
                .prefetch_ahead(&active.media_id, &active.uri, byte_position, content_length)
        }
    }

    /// Commande personnalisée reçue d'un contrôleur
    pub fn handle_custom_command(&self, action: &str, args: &Map<String, Value>) -> CommandResult {
        match SessionCommand::from_action(action, args) {
            Some(command) => self.execute_command(command),
            None => {
                debug!(action, "unknown or malformed session command");
                CommandResult::BadValue
            }
        }
    }

    pub fn execute_command(&self, command: SessionCommand) -> CommandResult {
        debug!(action = command.action(), "session command");
        match command {
            SessionCommand::AddSubtitleTrack { uri } => self.add_subtitle_track(uri),
            SessionCommand::StopPlayerSession => {
                self.reconciler.checkpoint_position();
                log_engine("clear_media_items", self.engine.clear_media_items());
                log_engine("stop", self.engine.stop());
                self.reconciler.request_end();
            }
        }
        CommandResult::Success
    }

    fn add_subtitle_track(&self, subtitle_uri: String) {
        let (Some(item), Some(index)) = (
            self.engine.current_media_item(),
            self.engine.current_media_item_index(),
        ) else {
            return;
        };
        let position = self.engine.current_position_ms();
        // Le sous-titre ajouté sera le dernier groupe texte
        let subtitle_index = self
            .engine
            .current_tracks()
            .supported_group_count(TrackType::Text);

        let repository = self.media_repository.clone();
        let media_id = item.media_id().to_string();
        let sub = subtitle_uri.clone();
        self.tasks.submit("add_subtitle_track", async move {
            repository.update_medium_position(&media_id, Some(position)).await?;
            repository
                .update_medium_subtitle_track(&media_id, subtitle_index)
                .await?;
            repository.add_external_subtitle_to_medium(&media_id, &sub).await
        });

        let mut subtitles = item.subtitle_uris().to_vec();
        if !subtitles.contains(&subtitle_uri) {
            subtitles.push(subtitle_uri.clone());
        }
        let patch = OverlayPatch::new()
            .position(Some(position))
            .subtitle_track(Some(subtitle_index));
        log_engine(
            "replace_media_item",
            self.engine
                .replace_media_item(index, item.copy_with(&patch).with_subtitle_uris(subtitles)),
        );
        log_engine("add_subtitle", self.engine.add_subtitle(&subtitle_uri));
    }

    /// La tâche hôte a été retirée. Renvoie vrai si la session demande sa fin.
    pub fn on_task_removed(&self) -> bool {
        let should_end = !self.engine.play_when_ready()
            || self.engine.media_item_count() == 0
            || self.engine.playback_state() == PlaybackState::Ended;
        if should_end {
            self.reconciler.request_end();
        }
        should_end
    }

    /// Nouvelles préférences, prises en compte à partir du prochain évènement
    pub fn update_preferences(&self, preferences: PlayerPreferences) {
        log_engine(
            "set_pause_at_end_of_media_items",
            self.engine
                .set_pause_at_end_of_media_items(!preferences.autoplay),
        );
        self.reconciler.set_preferences(preferences);
    }

    /// Ferme la session.
    ///
    /// La file est vidée et le moteur arrêté, les écritures en attente ont
    /// une chance de se terminer, puis le cache est fermé selon sa politique.
    /// Les travaux restants sont annulés en dernier.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing player session");
        log_engine("clear_media_items", self.engine.clear_media_items());
        log_engine("stop", self.engine.stop());

        if tokio::time::timeout(self.shutdown_grace, self.tasks.flush())
            .await
            .is_err()
        {
            warn!("Pending repository writes not completed before cache close");
        }

        if let Some(cache) = &self.cache {
            cache
                .coordinator
                .close(cache.clear_policy.deletes_files())
                .await;
            cache.prefetcher.wait_idle().await;
        }

        self.tasks.shutdown(self.shutdown_grace).await;
        info!("Player session closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(PlayerError::SessionClosed)
        } else {
            Ok(())
        }
    }
}
