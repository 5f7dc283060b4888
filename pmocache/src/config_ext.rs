//! Extension pour intégrer le cache de flux dans pmoconfig
//!
//! Ce module fournit le trait `StreamCacheConfigExt`, qui lit dans
//! `host.stream_cache` le répertoire du cache, la politique de nettoyage et
//! les réglages du préchargement.

use anyhow::Result;
use pmoconfig::Config;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::coordinator::StreamCacheCoordinator;
use crate::prefetch::{PrefetchSettings, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT};

const SECTION: &str = "stream_cache";
const DEFAULT_DIRECTORY: &str = "stream_cache";

/// Sort des fichiers du cache à la fin d'une session de lecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearPolicy {
    /// Tout supprimer à la fermeture de la session
    #[default]
    ClearOnExit,
    /// Conserver pour une prochaine lecture du même média
    Keep,
}

impl ClearPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearPolicy::ClearOnExit => "clear_on_exit",
            ClearPolicy::Keep => "keep",
        }
    }

    pub fn deletes_files(&self) -> bool {
        matches!(self, ClearPolicy::ClearOnExit)
    }
}

impl fmt::Display for ClearPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClearPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear_on_exit" | "clear" => Ok(ClearPolicy::ClearOnExit),
            "keep" => Ok(ClearPolicy::Keep),
            other => Err(format!("unknown stream cache clear policy: {other}")),
        }
    }
}

/// Trait d'extension pour ajouter la gestion du cache de flux à pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::Config;
/// use pmocache::StreamCacheConfigExt;
///
/// let config = Config::load_config("")?;
/// let coordinator = config.create_stream_cache()?;
/// let settings = config.get_prefetch_settings()?;
/// ```
pub trait StreamCacheConfigExt {
    /// Répertoire du cache (absolu, créé au besoin)
    fn get_stream_cache_dir(&self) -> Result<String>;

    fn set_stream_cache_dir(&self, directory: String) -> Result<()>;

    fn get_stream_cache_clear_policy(&self) -> Result<ClearPolicy>;

    fn set_stream_cache_clear_policy(&self, policy: ClearPolicy) -> Result<()>;

    /// Taille et concurrence du préchargement, ramenées dans leurs bornes
    fn get_prefetch_settings(&self) -> Result<PrefetchSettings>;

    fn set_prefetch_settings(&self, settings: PrefetchSettings) -> Result<()>;

    /// Ouvre le cache configuré et son coordinateur
    fn create_stream_cache(&self) -> Result<Arc<StreamCacheCoordinator>>;
}

impl StreamCacheConfigExt for Config {
    fn get_stream_cache_dir(&self) -> Result<String> {
        self.get_managed_dir(&["host", SECTION, "directory"], DEFAULT_DIRECTORY)
    }

    fn set_stream_cache_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(&["host", SECTION, "directory"], directory)
    }

    fn get_stream_cache_clear_policy(&self) -> Result<ClearPolicy> {
        let raw = self.get_string(
            &["host", SECTION, "clear_policy"],
            ClearPolicy::default().as_str(),
        )?;
        Ok(raw.parse().unwrap_or_else(|e| {
            warn!("{}, using {}", e, ClearPolicy::default());
            ClearPolicy::default()
        }))
    }

    fn set_stream_cache_clear_policy(&self, policy: ClearPolicy) -> Result<()> {
        self.set_string(&["host", SECTION, "clear_policy"], policy.as_str())
    }

    fn get_prefetch_settings(&self) -> Result<PrefetchSettings> {
        let chunk_size = self.get_usize(
            &["host", SECTION, "range_chunk_size"],
            DEFAULT_CHUNK_SIZE as usize,
        )?;
        let max_concurrent = self.get_usize(
            &["host", SECTION, "segment_concurrent_downloads"],
            DEFAULT_MAX_CONCURRENT,
        )?;
        let settings = PrefetchSettings::new(chunk_size as u64, max_concurrent);
        if settings.chunk_size != chunk_size as u64 || settings.max_concurrent != max_concurrent {
            warn!(
                chunk_size = settings.chunk_size,
                max_concurrent = settings.max_concurrent,
                "Prefetch settings out of range, clamped"
            );
        }
        Ok(settings)
    }

    fn set_prefetch_settings(&self, settings: PrefetchSettings) -> Result<()> {
        self.set_usize(
            &["host", SECTION, "range_chunk_size"],
            settings.chunk_size as usize,
        )?;
        self.set_usize(
            &["host", SECTION, "segment_concurrent_downloads"],
            settings.max_concurrent,
        )
    }

    fn create_stream_cache(&self) -> Result<Arc<StreamCacheCoordinator>> {
        let dir = self.get_stream_cache_dir()?;
        let coordinator = StreamCacheCoordinator::open(&dir)?;
        Ok(Arc::new(coordinator))
    }
}
