//! # pmoplayer - État de lecture persistant autour d'un moteur de lecture
//!
//! Cette crate garde synchronisés l'état de lecture d'un média (position,
//! vitesse, pistes audio et sous-titres, qualité vidéo) entre un moteur de
//! lecture piloté par évènements et un dépôt persistant, et pilote le cache
//! de flux de `pmocache` pendant la lecture.
//!
//! ## Architecture
//!
//! ```text
//! pmoplayer
//!     ├── overlay.rs      - StateOverlay et descripteurs immuables (MediaItem)
//!     ├── tracks.rs       - Groupes de pistes et paramètres de sélection
//!     ├── quality.rs      - Restauration d'une qualité vidéo mémorisée
//!     ├── engine.rs       - Capacités attendues du moteur de lecture
//!     ├── events.rs       - Évènements du moteur
//!     ├── repository.rs   - Dépôts persistants (+ dépôt en mémoire)
//!     ├── tasks.rs        - File de travaux d'arrière-plan
//!     ├── reconciler.rs   - Réconciliation des évènements
//!     ├── admission.rs    - Complétion des éléments admis dans la file
//!     ├── commands.rs     - Commandes personnalisées de la session
//!     ├── session.rs      - Session de lecture
//!     └── config_ext.rs   - Préférences du lecteur dans pmoconfig
//! ```
//!
//! ## Utilisation
//!
//! ```rust,ignore
//! use pmoconfig::Config;
//! use pmoplayer::{InMemoryMediaRepository, MediaItem, PlayerSession};
//! use std::sync::Arc;
//!
//! let config = Arc::new(Config::load_config("")?);
//! let session = PlayerSession::from_config(config, engine, Arc::new(InMemoryMediaRepository::new()))?;
//!
//! session.set_media_items(vec![MediaItem::new("https://example.com/movie.mp4")], 0, None).await?;
//! // Le moteur transmet ensuite ses évènements
//! session.handle_event(event);
//!
//! session.close().await;
//! ```

pub mod admission;
pub mod commands;
pub mod config_ext;
pub mod engine;
pub mod errors;
pub mod events;
pub mod overlay;
pub mod quality;
pub mod reconciler;
pub mod repository;
pub mod session;
pub mod tasks;
pub mod tracks;

pub use admission::admit_media_items;
pub use commands::{CommandResult, SessionCommand};
pub use config_ext::{LoopMode, PlayerConfigExt, PlayerPreferences, Resume};
pub use engine::{
    PlaybackEngine, PlaybackQueue, PlaybackState, RepeatMode, TrackControl, TransportControl,
};
pub use errors::{PlayerError, ResolveError, Result};
pub use events::{
    DiscontinuityReason, PlayWhenReadyReason, PlayerEvent, PositionInfo, TransitionReason,
};
pub use overlay::{
    MediaItem, OverlayField, OverlayPatch, OverlayValue, StateOverlay, VideoQualitySelection,
};
pub use quality::VideoQualityOverrideResolver;
pub use reconciler::{ActiveItem, PlaybackEventReconciler, Readiness};
pub use repository::{
    InMemoryMediaRepository, MediaRepository, PreferencesRepository, RepositoryCall, Video,
    VideoState,
};
pub use session::{PlayerSession, SessionOptions, StreamCacheSetup};
pub use tasks::BackgroundTasks;
pub use tracks::{
    TrackFormat, TrackGroup, TrackSelectionOverride, TrackSelectionParameters, TrackType, Tracks,
};
