//! Préchargement anticipé des plages à venir
//!
//! Le [`SegmentPrefetcher`] télécharge en arrière-plan les morceaux suivants
//! du flux actif. Les morceaux sont alignés sur `chunk_size` : deux demandes
//! qui se recouvrent désignent les mêmes clés, et la réservation d'écriture
//! du cache garantit qu'une plage n'est téléchargée qu'une fois.
//!
//! Le nombre de téléchargements simultanés est borné par un sémaphore
//! partagé avec le préchargeur DASH.

use std::sync::{Arc, RwLock};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use crate::cache::SpanWriter;
use crate::coordinator::StreamCacheCoordinator;
use crate::error::{CacheError, Result};
use crate::fetch::RangeFetcher;
use crate::keys::{ByteRange, SpanKey};

/// Taille de morceau par défaut (2 Mio)
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;
/// Taille de morceau minimale (64 Kio)
pub const MIN_CHUNK_SIZE: u64 = 64 * 1024;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Réglages du préchargement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchSettings {
    pub chunk_size: u64,
    pub max_concurrent: usize,
}

impl PrefetchSettings {
    /// Construit des réglages en ramenant les valeurs dans leurs bornes
    pub fn new(chunk_size: u64, max_concurrent: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE),
            max_concurrent: max_concurrent.max(1),
        }
    }
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT)
    }
}

/// Préchargeur de plages d'octets
pub struct SegmentPrefetcher {
    coordinator: Arc<StreamCacheCoordinator>,
    fetcher: Arc<dyn RangeFetcher>,
    settings: RwLock<PrefetchSettings>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    runtime: Handle,
}

impl std::fmt::Debug for SegmentPrefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPrefetcher")
            .field("settings", &self.settings())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl SegmentPrefetcher {
    /// Crée le préchargeur. Doit être appelé depuis un runtime tokio.
    pub fn new(
        coordinator: Arc<StreamCacheCoordinator>,
        fetcher: Arc<dyn RangeFetcher>,
        settings: PrefetchSettings,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CacheError::NoRuntime(e.to_string()))?;
        Ok(Self {
            coordinator,
            fetcher,
            settings: RwLock::new(settings),
            permits: Arc::new(Semaphore::new(settings.max_concurrent)),
            tracker: TaskTracker::new(),
            runtime,
        })
    }

    pub fn settings(&self) -> PrefetchSettings {
        *self
            .settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change la taille des morceaux. La concurrence est fixée à la construction.
    pub fn set_chunk_size(&self, chunk_size: u64) {
        let mut settings = self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        settings.chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
    }

    pub fn coordinator(&self) -> &Arc<StreamCacheCoordinator> {
        &self.coordinator
    }

    pub fn fetcher(&self) -> &Arc<dyn RangeFetcher> {
        &self.fetcher
    }

    /// Tâches de préchargement encore vivantes
    pub fn in_flight_count(&self) -> usize {
        self.tracker.len()
    }

    /// Attend la fin de toutes les tâches lancées jusqu'ici
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Clé de cache d'une plage du média, dans la partition de qualité courante
    pub fn span_key(&self, media_id: &str, uri: &str, range: ByteRange) -> SpanKey {
        let quality = self.coordinator.current_quality_key();
        SpanKey::new(media_id, quality.as_ref(), uri, range)
    }

    /// Précharge les morceaux alignés couvrant `range`.
    ///
    /// Ignoré si `media_id` n'est pas le média actif. Les morceaux déjà en
    /// cache ou déjà en cours de téléchargement sont sautés. Renvoie le
    /// nombre de téléchargements lancés.
    pub fn prefetch_range(&self, media_id: &str, uri: &str, range: ByteRange) -> usize {
        if !self.is_active(media_id) {
            return 0;
        }
        let chunk_size = self.settings().chunk_size;
        range
            .aligned_chunks(chunk_size)
            .into_iter()
            .filter(|chunk| self.schedule(media_id, uri, *chunk))
            .count()
    }

    /// Précharge `max_concurrent` morceaux à partir de la position lue.
    pub fn prefetch_ahead(
        &self,
        media_id: &str,
        uri: &str,
        byte_position: u64,
        content_length: Option<u64>,
    ) -> usize {
        let settings = self.settings();
        let window = settings.chunk_size * settings.max_concurrent as u64;
        let mut length = window;
        if let Some(total) = content_length {
            if byte_position >= total {
                return 0;
            }
            length = length.min(total - byte_position);
        }
        self.prefetch_range(media_id, uri, ByteRange::new(byte_position, length))
    }

    /// Précharge une ressource entière (segment d'un flux adaptatif)
    pub fn prefetch_resource(&self, media_id: &str, uri: &str, range: Option<ByteRange>) -> bool {
        if !self.is_active(media_id) {
            return false;
        }
        self.schedule(media_id, uri, range.unwrap_or_else(ByteRange::whole))
    }

    fn is_active(&self, media_id: &str) -> bool {
        if self.coordinator.is_closed() {
            return false;
        }
        let active = self.coordinator.active_media_id();
        if active.as_deref() != Some(media_id) {
            trace!(media_id = %media_id, ?active, "prefetch ignored for inactive media");
            return false;
        }
        true
    }

    fn schedule(&self, media_id: &str, uri: &str, range: ByteRange) -> bool {
        let key = self.span_key(media_id, uri, range);
        let writer = match self.coordinator.get_cache().try_begin_write(&key) {
            Ok(Some(writer)) => writer,
            Ok(None) => return false,
            Err(e) => {
                debug!(media_id = %media_id, "prefetch not scheduled: {}", e);
                return false;
            }
        };

        let task = PrefetchTask {
            media_id: media_id.to_string(),
            uri: uri.to_string(),
            range,
            writer,
            fetcher: self.fetcher.clone(),
            permits: self.permits.clone(),
        };
        let token = self.coordinator.media_scope();
        self.tracker.spawn_on(task.run(token), &self.runtime);
        true
    }
}

struct PrefetchTask {
    media_id: String,
    uri: String,
    range: ByteRange,
    writer: SpanWriter,
    fetcher: Arc<dyn RangeFetcher>,
    permits: Arc<Semaphore>,
}

impl PrefetchTask {
    async fn run(self, token: tokio_util::sync::CancellationToken) {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = self.fetcher.fetch(&self.uri, self.range) => result,
        };

        if token.is_cancelled() {
            return;
        }

        match fetched {
            Ok(data) => {
                if let Err(e) = self.writer.commit(&self.media_id, &data).await {
                    debug!(media_id = %self.media_id, offset = self.range.offset, "prefetched span not stored: {}", e);
                }
            }
            Err(e) => {
                debug!(media_id = %self.media_id, offset = self.range.offset, "prefetch failed: {}", e);
            }
        }
    }
}
