//! Stockage disque des flux, partitionné par média et par qualité
//!
//! Le [`StreamCache`] est partagé entre la lecture au premier plan et les
//! préchargeurs en arrière-plan. Il garantit :
//!
//! - un seul écrivain à la fois pour une plage donnée ([`SpanWriter`]) ;
//! - qu'une partition n'est jamais supprimée tant qu'un [`PartitionHandle`]
//!   (lecture ou écriture) est ouvert dessus.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::db::SpanIndex;
use crate::error::{CacheError, Result};
use crate::keys::SpanKey;

const INDEX_FILE: &str = "spans.db";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PartitionId {
    media_key: String,
    quality: String,
}

#[derive(Debug, Default)]
struct PartitionState {
    handles: usize,
    evicting: bool,
}

#[derive(Debug, Default)]
struct Registry {
    partitions: HashMap<PartitionId, PartitionState>,
    writers: HashSet<SpanKey>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock_registry(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Référence ouverte sur une partition ; la partition ne peut pas être
/// supprimée tant que la référence vit.
#[derive(Debug)]
pub struct PartitionHandle {
    id: PartitionId,
    registry: SharedRegistry,
}

impl PartitionHandle {
    pub fn media_key(&self) -> &str {
        &self.id.media_key
    }

    pub fn quality(&self) -> &str {
        &self.id.quality
    }
}

impl Drop for PartitionHandle {
    fn drop(&mut self) {
        let mut registry = lock_registry(&self.registry);
        if let Some(state) = registry.partitions.get_mut(&self.id) {
            state.handles = state.handles.saturating_sub(1);
            if state.handles == 0 && !state.evicting {
                registry.partitions.remove(&self.id);
            }
        }
    }
}

/// Droit exclusif d'écrire une plage. Libéré à la destruction.
#[derive(Debug)]
pub struct SpanWriter {
    key: SpanKey,
    path: PathBuf,
    index: Arc<SpanIndex>,
    registry: SharedRegistry,
    idle: Arc<Notify>,
    _partition: PartitionHandle,
}

impl SpanWriter {
    pub fn key(&self) -> &SpanKey {
        &self.key
    }

    /// Écrit le fragment (fichier temporaire puis renommage) et l'indexe.
    pub async fn commit(self, media_id: &str, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("part");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        self.index.add_span(&self.key, media_id, data.len() as u64)?;
        debug!(
            media_id = %media_id,
            quality = %self.key.quality,
            offset = self.key.range.offset,
            bytes = data.len(),
            "span stored"
        );
        Ok(())
    }
}

impl Drop for SpanWriter {
    fn drop(&mut self) {
        let idle = {
            let mut registry = lock_registry(&self.registry);
            registry.writers.remove(&self.key);
            registry.writers.is_empty()
        };
        if idle {
            self.idle.notify_waiters();
        }
    }
}

/// Cache disque des flux
///
/// À utiliser derrière un `Arc<StreamCache>`.
#[derive(Debug)]
pub struct StreamCache {
    dir: PathBuf,
    index: Arc<SpanIndex>,
    registry: SharedRegistry,
    idle: Arc<Notify>,
    closed: AtomicBool,
}

impl StreamCache {
    /// Ouvre le cache dans `dir` (créé au besoin)
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let index = SpanIndex::init(&dir.join(INDEX_FILE))?;
        Ok(Self {
            dir,
            index: Arc::new(index),
            registry: Arc::new(Mutex::new(Registry::default())),
            idle: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    pub fn index(&self) -> &SpanIndex {
        &self.index
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse toute nouvelle écriture. Les fichiers restent en place.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn media_dir(&self, media_key: &str) -> PathBuf {
        self.dir.join(media_key)
    }

    pub fn partition_dir(&self, media_key: &str, quality: &str) -> PathBuf {
        self.media_dir(media_key).join(quality)
    }

    pub fn span_path(&self, key: &SpanKey) -> PathBuf {
        self.partition_dir(&key.media_key, &key.quality)
            .join(key.file_name())
    }

    /// Ouvre une référence sur une partition. `None` si elle est en cours de suppression.
    pub fn open_partition(&self, media_key: &str, quality: &str) -> Option<PartitionHandle> {
        let id = PartitionId {
            media_key: media_key.to_string(),
            quality: quality.to_string(),
        };
        let mut registry = lock_registry(&self.registry);
        let state = registry.partitions.entry(id.clone()).or_default();
        if state.evicting {
            return None;
        }
        state.handles += 1;
        Some(PartitionHandle {
            id,
            registry: self.registry.clone(),
        })
    }

    /// Nombre de références ouvertes sur une partition
    pub fn open_handles(&self, media_key: &str, quality: &str) -> usize {
        let id = PartitionId {
            media_key: media_key.to_string(),
            quality: quality.to_string(),
        };
        lock_registry(&self.registry)
            .partitions
            .get(&id)
            .map(|state| state.handles)
            .unwrap_or(0)
    }

    /// Réserve l'écriture d'une plage.
    ///
    /// Renvoie `None` si la plage est déjà indexée, déjà en cours d'écriture,
    /// ou si sa partition est en cours de suppression.
    pub fn try_begin_write(&self, key: &SpanKey) -> Result<Option<SpanWriter>> {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        let Some(partition) = self.open_partition(&key.media_key, &key.quality) else {
            return Ok(None);
        };

        let mut registry = lock_registry(&self.registry);
        if registry.writers.contains(key) {
            return Ok(None);
        }
        // Un écrivain indexe avant de libérer sa réservation : la vérification
        // sous verrou suffit à exclure un second téléchargement.
        if self.index.contains(key)? {
            return Ok(None);
        }
        registry.writers.insert(key.clone());
        drop(registry);

        Ok(Some(SpanWriter {
            key: key.clone(),
            path: self.span_path(key),
            index: self.index.clone(),
            registry: self.registry.clone(),
            idle: self.idle.clone(),
            _partition: partition,
        }))
    }

    /// Écrit une plage si personne ne l'a déjà fait. Renvoie `true` si elle a été écrite.
    pub async fn write_span(&self, key: &SpanKey, media_id: &str, data: &[u8]) -> Result<bool> {
        match self.try_begin_write(key)? {
            Some(writer) => {
                writer.commit(media_id, data).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Lit une plage en cache
    pub async fn read_span(&self, key: &SpanKey) -> Result<Option<Bytes>> {
        let Some(_partition) = self.open_partition(&key.media_key, &key.quality) else {
            return Ok(None);
        };
        if !self.index.contains(key)? {
            return Ok(None);
        }
        match tokio::fs::read(self.span_path(key)).await {
            Ok(data) => {
                self.index.touch(key)?;
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(quality = %key.quality, offset = key.range.offset, "indexed span missing on disk");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_cached(&self, key: &SpanKey) -> Result<bool> {
        Ok(self.index.contains(key)?)
    }

    pub fn is_writing(&self, key: &SpanKey) -> bool {
        lock_registry(&self.registry).writers.contains(key)
    }

    /// Nombre de plages en cours d'écriture
    pub fn writer_count(&self) -> usize {
        lock_registry(&self.registry).writers.len()
    }

    /// Attend que toutes les réservations d'écriture soient libérées.
    ///
    /// Sur un cache fermé, plus aucune réservation ne peut être prise : le
    /// retour garantit alors qu'aucun écrivain ne tient de partition.
    pub async fn wait_writers_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if lock_registry(&self.registry).writers.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Clés de média présentes sur disque
    pub fn media_keys(&self) -> Result<Vec<String>> {
        list_dirs(&self.dir)
    }

    /// Partitions de qualité d'un média (disque et index confondus)
    pub fn quality_partitions(&self, media_key: &str) -> Result<Vec<String>> {
        let mut qualities = list_dirs(&self.media_dir(media_key))?;
        for quality in self.index.qualities(media_key)? {
            if !qualities.contains(&quality) {
                qualities.push(quality);
            }
        }
        qualities.sort();
        Ok(qualities)
    }

    /// Supprime une partition de qualité.
    ///
    /// Renvoie `false` sans rien toucher si une référence est ouverte dessus.
    pub async fn remove_quality(&self, media_key: &str, quality: &str) -> Result<bool> {
        let id = PartitionId {
            media_key: media_key.to_string(),
            quality: quality.to_string(),
        };
        {
            let mut registry = lock_registry(&self.registry);
            let state = registry.partitions.entry(id.clone()).or_default();
            if state.handles > 0 || state.evicting {
                debug!(media_key, quality, handles = state.handles, "partition busy, not removed");
                return Ok(false);
            }
            state.evicting = true;
        }

        let result = self.remove_partition_files(media_key, quality).await;

        {
            let mut registry = lock_registry(&self.registry);
            registry.partitions.remove(&id);
        }

        result.map(|_| true)
    }

    async fn remove_partition_files(&self, media_key: &str, quality: &str) -> Result<()> {
        self.index.delete_quality(media_key, quality)?;
        let dir = self.partition_dir(media_key, quality);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(media_key, quality, "partition removed");
        Ok(())
    }

    /// Supprime toutes les partitions d'un média qui ne sont pas en cours d'utilisation.
    ///
    /// Renvoie le nombre de partitions supprimées.
    pub async fn remove_media(&self, media_key: &str) -> Result<usize> {
        let mut removed = 0;
        let mut skipped = 0;
        for quality in self.quality_partitions(media_key)? {
            if self.remove_quality(media_key, &quality).await? {
                removed += 1;
            } else {
                skipped += 1;
            }
        }
        if skipped == 0 {
            self.index.delete_media(media_key)?;
            match tokio::fs::remove_dir_all(self.media_dir(media_key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            warn!(media_key, skipped, "media partitions still in use, kept");
        }
        Ok(removed)
    }

    /// Supprime tous les médias du cache (partitions en cours d'utilisation exceptées)
    pub async fn purge(&self) -> Result<usize> {
        let mut removed = 0;
        for media_key in self.media_keys()? {
            removed += self.remove_media(&media_key).await?;
        }
        Ok(removed)
    }
}

fn list_dirs(path: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{ByteRange, QualityKey};
    use tempfile::TempDir;

    fn key(media: &str, quality: Option<&QualityKey>, offset: u64) -> SpanKey {
        SpanKey::new(media, quality, "https://cdn/v.mp4", ByteRange::new(offset, 4))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let cache = StreamCache::open(tmp.path()).unwrap();
        let k = key("m", None, 0);

        assert!(cache.write_span(&k, "m", b"abcd").await.unwrap());
        assert!(cache.is_cached(&k).unwrap());
        assert_eq!(cache.read_span(&k).await.unwrap().unwrap(), Bytes::from_static(b"abcd"));

        // Seconde écriture ignorée
        assert!(!cache.write_span(&k, "m", b"zzzz").await.unwrap());
        assert!(cache.span_path(&k).exists());
    }

    #[tokio::test]
    async fn test_single_writer_per_span() {
        let tmp = TempDir::new().unwrap();
        let cache = StreamCache::open(tmp.path()).unwrap();
        let k = key("m", None, 0);

        let writer = cache.try_begin_write(&k).unwrap().unwrap();
        assert!(cache.is_writing(&k));
        assert!(cache.try_begin_write(&k).unwrap().is_none());
        drop(writer);
        assert!(!cache.is_writing(&k));
        assert!(cache.try_begin_write(&k).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_busy_partition_is_not_removed() {
        let tmp = TempDir::new().unwrap();
        let cache = StreamCache::open(tmp.path()).unwrap();
        let q = QualityKey::for_video(Some(720), Some(1500));
        let k = key("m", Some(&q), 0);
        cache.write_span(&k, "m", b"data").await.unwrap();

        let handle = cache.open_partition(&k.media_key, &k.quality).unwrap();
        assert!(!cache.remove_quality(&k.media_key, &k.quality).await.unwrap());
        assert!(cache.is_cached(&k).unwrap());

        drop(handle);
        assert!(cache.remove_quality(&k.media_key, &k.quality).await.unwrap());
        assert!(!cache.is_cached(&k).unwrap());
        assert!(!cache.partition_dir(&k.media_key, &k.quality).exists());
    }

    #[tokio::test]
    async fn test_closed_cache_rejects_writes() {
        let tmp = TempDir::new().unwrap();
        let cache = StreamCache::open(tmp.path()).unwrap();
        cache.close();
        assert!(matches!(
            cache.write_span(&key("m", None, 0), "m", b"x").await,
            Err(CacheError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_purge_removes_media_dirs() {
        let tmp = TempDir::new().unwrap();
        let cache = StreamCache::open(tmp.path()).unwrap();
        cache.write_span(&key("a", None, 0), "a", b"1").await.unwrap();
        cache.write_span(&key("b", None, 0), "b", b"2").await.unwrap();
        assert_eq!(cache.media_keys().unwrap().len(), 2);

        assert_eq!(cache.purge().await.unwrap(), 2);
        assert!(cache.media_keys().unwrap().is_empty());
        assert_eq!(cache.index().count().unwrap(), 0);
    }
}
