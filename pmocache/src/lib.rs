//! # pmocache - Cache de flux par média et par qualité
//!
//! Cette crate stocke sur disque les octets des flux lus à distance, en
//! séparant chaque média et chaque variante de qualité, et les précharge en
//! arrière-plan avant que le lecteur n'en ait besoin.
//!
//! ## Architecture
//!
//! ```text
//! pmocache
//!     ├── keys.rs         - Clés de qualité, plages d'octets, clés de fragments
//!     ├── db.rs           - Index SQLite des fragments
//!     ├── cache.rs        - Stockage disque partagé (StreamCache)
//!     ├── coordinator.rs  - Média actif, qualité courante, éviction, fermeture
//!     ├── fetch.rs        - Lecture de plages chez l'amont (HTTP)
//!     ├── prefetch.rs     - Préchargement borné des morceaux à venir
//!     ├── dash.rs         - Préchargement des segments DASH
//!     └── config_ext.rs   - Extension pmoconfig (feature `pmoconfig`)
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmocache::{HttpRangeFetcher, PrefetchSettings, QualityKey, SegmentPrefetcher, StreamCacheCoordinator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let coordinator = Arc::new(StreamCacheCoordinator::open("./stream_cache")?);
//!     let prefetcher = SegmentPrefetcher::new(
//!         coordinator.clone(),
//!         Arc::new(HttpRangeFetcher::new()?),
//!         PrefetchSettings::default(),
//!     )?;
//!
//!     let uri = "https://example.com/movie.mp4";
//!     coordinator.set_active_media_id(uri);
//!     prefetcher.prefetch_ahead(uri, uri, 0, None);
//!
//!     // Une fois la variante connue, les autres qualités deviennent inutiles
//!     coordinator.set_current_video_quality_key(Some(QualityKey::for_video(Some(720), Some(1_500_000))));
//!     coordinator.delete_other_video_qualities().await;
//!
//!     coordinator.close(true).await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod coordinator;
pub mod dash;
pub mod db;
pub mod error;
pub mod fetch;
pub mod keys;
pub mod prefetch;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

pub use cache::{PartitionHandle, SpanWriter, StreamCache};
pub use coordinator::StreamCacheCoordinator;
pub use dash::{DashSegment, DashSegmentPrefetcher, MpdManifest, DASH_MIME_TYPE};
pub use db::{SpanEntry, SpanIndex};
pub use error::{CacheError, Result};
pub use fetch::{HttpRangeFetcher, RangeFetcher};
pub use keys::{hashed_key, ByteRange, QualityKey, SpanKey, UNKNOWN_QUALITY};
pub use prefetch::{PrefetchSettings, SegmentPrefetcher};

#[cfg(feature = "pmoconfig")]
pub use config_ext::{ClearPolicy, StreamCacheConfigExt};
