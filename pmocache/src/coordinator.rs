//! Coordination du cache pour la session de lecture
//!
//! Le coordinateur connaît le média actif et la qualité en cours de lecture.
//! Il décide quelles partitions peuvent être évincées et porte les jetons
//! d'annulation qui bornent la durée de vie des préchargements.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::StreamCache;
use crate::error::Result;
use crate::keys::{hashed_key, partition_name, QualityKey};

#[derive(Debug)]
struct ActiveState {
    media_id: Option<String>,
    quality: Option<QualityKey>,
    media_token: CancellationToken,
}

/// Délai accordé aux écrivains annulés pour lâcher leurs partitions
pub const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinateur du cache de flux, un par session de lecture
#[derive(Debug)]
pub struct StreamCacheCoordinator {
    cache: Arc<StreamCache>,
    state: RwLock<ActiveState>,
    session_token: CancellationToken,
}

impl StreamCacheCoordinator {
    pub fn new(cache: Arc<StreamCache>) -> Self {
        let session_token = CancellationToken::new();
        Self {
            cache,
            state: RwLock::new(ActiveState {
                media_id: None,
                quality: None,
                media_token: session_token.child_token(),
            }),
            session_token,
        }
    }

    /// Ouvre le cache dans `dir` et crée le coordinateur
    pub fn open(dir: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(StreamCache::open(dir)?)))
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ActiveState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ActiveState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change le média actif.
    ///
    /// Aucun fichier n'est supprimé ; les préchargements du média précédent
    /// sont annulés et la qualité courante est oubliée.
    pub fn set_active_media_id(&self, media_id: &str) {
        let mut state = self.write_state();
        if state.media_id.as_deref() == Some(media_id) {
            return;
        }
        state.media_token.cancel();
        state.media_token = self.session_token.child_token();
        state.media_id = Some(media_id.to_string());
        state.quality = None;
        debug!(media_id = %media_id, "active media changed");
    }

    /// Enregistre la qualité en cours de lecture pour le média actif.
    ///
    /// `None` signifie qualité inconnue (audio seul ou format non supporté).
    pub fn set_current_video_quality_key(&self, key: Option<QualityKey>) {
        let mut state = self.write_state();
        if state.quality != key {
            debug!(
                media_id = ?state.media_id,
                quality = %partition_name(key.as_ref()),
                "current quality changed"
            );
            state.quality = key;
        }
    }

    pub fn active_media_id(&self) -> Option<String> {
        self.read_state().media_id.clone()
    }

    pub fn current_quality_key(&self) -> Option<QualityKey> {
        self.read_state().quality.clone()
    }

    /// Jeton annulé au prochain changement de média (ou à la fermeture)
    pub fn media_scope(&self) -> CancellationToken {
        self.read_state().media_token.clone()
    }

    /// Jeton annulé à la fermeture de la session
    pub fn session_scope(&self) -> CancellationToken {
        self.session_token.clone()
    }

    /// Cache partagé avec la couche de lecture
    pub fn get_cache(&self) -> Arc<StreamCache> {
        self.cache.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.session_token.is_cancelled()
    }

    /// Supprime les partitions du média actif autres que la qualité courante.
    ///
    /// Sans qualité connue, ne fait rien. Les erreurs sont journalisées et ignorées.
    pub async fn delete_other_video_qualities(&self) {
        let (media_id, quality) = {
            let state = self.read_state();
            match (&state.media_id, &state.quality) {
                (Some(media_id), Some(quality)) => (media_id.clone(), quality.clone()),
                _ => return,
            }
        };

        let media_key = hashed_key(&media_id);
        let partitions = match self.cache.quality_partitions(&media_key) {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!(media_id = %media_id, "Failed to list quality partitions: {}", e);
                return;
            }
        };

        for other in partitions.iter().filter(|p| p.as_str() != quality.as_str()) {
            match self.cache.remove_quality(&media_key, other).await {
                Ok(true) => debug!(media_id = %media_id, quality = %other, "stale quality evicted"),
                Ok(false) => debug!(media_id = %media_id, quality = %other, "stale quality busy, kept"),
                Err(e) => warn!(media_id = %media_id, quality = %other, "Failed to evict stale quality: {}", e),
            }
        }
    }

    /// Termine la session.
    ///
    /// Les préchargements en cours sont annulés et leurs réservations
    /// d'écriture libérées. Si `delete_files` est vrai, toutes les partitions
    /// du cache sont ensuite supprimées ; sinon elles restent disponibles
    /// pour une prochaine lecture.
    pub async fn close(&self, delete_files: bool) {
        if self.is_closed() {
            return;
        }
        self.cache.close();
        self.media_scope().cancel();

        // Une partition tenue par un écrivain ne serait pas supprimée
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, self.cache.wait_writers_idle())
            .await
            .is_err()
        {
            warn!(
                writers = self.cache.writer_count(),
                "Stream cache writers still active at close"
            );
        }

        if delete_files {
            match self.cache.purge().await {
                Ok(removed) => info!(removed, "stream cache cleared on exit"),
                Err(e) => warn!("Failed to clear stream cache: {}", e),
            }
        } else {
            info!("stream cache kept for next session");
        }

        self.session_token.cancel();
    }
}
