//! Overlay d'état attaché aux descripteurs de média
//!
//! Le moteur de lecture traite ses descripteurs comme des valeurs immuables
//! et les remplace en bloc à chaque changement. L'état de lecture mémorisé
//! (position, vitesse, pistes, qualité) voyage donc avec le descripteur sous
//! forme d'un [`StateOverlay`] : une structure de champs optionnels dont la
//! présence est testable champ par champ.
//!
//! À la frontière avec un moteur qui ne connaît qu'un sac de métadonnées
//! générique, l'overlay est encodé sous des clés fixes (voir [`keys`]).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Clés de l'overlay dans le sac de métadonnées du moteur
pub mod keys {
    pub const POSITION: &str = "media_metadata_position";
    pub const PLAYBACK_SPEED: &str = "media_metadata_playback_speed";
    pub const VIDEO_SCALE: &str = "media_metadata_video_zoom";
    pub const AUDIO_TRACK_INDEX: &str = "audio_track_index";
    pub const SUBTITLE_TRACK_INDEX: &str = "subtitle_track_index";
    pub const VIDEO_GROUP_INDEX: &str = "video_group_index";
    pub const VIDEO_TRACK_INDEX_IN_GROUP: &str = "video_track_index_in_group";

    pub const ALL: [&str; 7] = [
        POSITION,
        PLAYBACK_SPEED,
        VIDEO_SCALE,
        AUDIO_TRACK_INDEX,
        SUBTITLE_TRACK_INDEX,
        VIDEO_GROUP_INDEX,
        VIDEO_TRACK_INDEX_IN_GROUP,
    ];
}

/// Qualité vidéo choisie : un groupe vidéo supporté et une piste de ce groupe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoQualitySelection {
    pub group_index: usize,
    pub track_index_in_group: usize,
}

impl VideoQualitySelection {
    pub fn new(group_index: usize, track_index_in_group: usize) -> Self {
        Self {
            group_index,
            track_index_in_group,
        }
    }
}

/// Les champs de l'overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayField {
    Position,
    PlaybackSpeed,
    VideoScale,
    AudioTrackIndex,
    SubtitleTrackIndex,
    VideoQuality,
}

impl OverlayField {
    pub const ALL: [OverlayField; 6] = [
        OverlayField::Position,
        OverlayField::PlaybackSpeed,
        OverlayField::VideoScale,
        OverlayField::AudioTrackIndex,
        OverlayField::SubtitleTrackIndex,
        OverlayField::VideoQuality,
    ];

    /// Clés utilisées dans le sac de métadonnées
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            OverlayField::Position => &[keys::POSITION],
            OverlayField::PlaybackSpeed => &[keys::PLAYBACK_SPEED],
            OverlayField::VideoScale => &[keys::VIDEO_SCALE],
            OverlayField::AudioTrackIndex => &[keys::AUDIO_TRACK_INDEX],
            OverlayField::SubtitleTrackIndex => &[keys::SUBTITLE_TRACK_INDEX],
            OverlayField::VideoQuality => {
                &[keys::VIDEO_GROUP_INDEX, keys::VIDEO_TRACK_INDEX_IN_GROUP]
            }
        }
    }
}

/// Valeur typée d'un champ
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayValue {
    Position(u64),
    PlaybackSpeed(f32),
    VideoScale(f32),
    AudioTrackIndex(usize),
    SubtitleTrackIndex(usize),
    VideoQuality(VideoQualitySelection),
}

impl OverlayValue {
    pub fn field(&self) -> OverlayField {
        match self {
            OverlayValue::Position(_) => OverlayField::Position,
            OverlayValue::PlaybackSpeed(_) => OverlayField::PlaybackSpeed,
            OverlayValue::VideoScale(_) => OverlayField::VideoScale,
            OverlayValue::AudioTrackIndex(_) => OverlayField::AudioTrackIndex,
            OverlayValue::SubtitleTrackIndex(_) => OverlayField::SubtitleTrackIndex,
            OverlayValue::VideoQuality(_) => OverlayField::VideoQuality,
        }
    }
}

/// État de lecture mémorisé d'un média.
///
/// `None` signifie « non renseigné », distinct d'une valeur nulle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateOverlay {
    pub position_ms: Option<u64>,
    pub playback_speed: Option<f32>,
    pub video_scale: Option<f32>,
    pub audio_track_index: Option<usize>,
    pub subtitle_track_index: Option<usize>,
    pub video_quality: Option<VideoQualitySelection>,
}

impl StateOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        OverlayField::ALL.iter().all(|field| !self.contains(*field))
    }

    pub fn contains(&self, field: OverlayField) -> bool {
        self.get(field).is_some()
    }

    pub fn get(&self, field: OverlayField) -> Option<OverlayValue> {
        match field {
            OverlayField::Position => self.position_ms.map(OverlayValue::Position),
            OverlayField::PlaybackSpeed => self.playback_speed.map(OverlayValue::PlaybackSpeed),
            OverlayField::VideoScale => self.video_scale.map(OverlayValue::VideoScale),
            OverlayField::AudioTrackIndex => {
                self.audio_track_index.map(OverlayValue::AudioTrackIndex)
            }
            OverlayField::SubtitleTrackIndex => {
                self.subtitle_track_index.map(OverlayValue::SubtitleTrackIndex)
            }
            OverlayField::VideoQuality => self.video_quality.map(OverlayValue::VideoQuality),
        }
    }

    /// Renseigne un champ. Une vitesse non strictement positive efface le champ.
    pub fn set(&mut self, value: OverlayValue) {
        match value {
            OverlayValue::Position(v) => self.position_ms = Some(v),
            OverlayValue::PlaybackSpeed(v) => self.playback_speed = valid_speed(v),
            OverlayValue::VideoScale(v) => self.video_scale = Some(v),
            OverlayValue::AudioTrackIndex(v) => self.audio_track_index = Some(v),
            OverlayValue::SubtitleTrackIndex(v) => self.subtitle_track_index = Some(v),
            OverlayValue::VideoQuality(v) => self.video_quality = Some(v),
        }
    }

    pub fn clear(&mut self, field: OverlayField) {
        match field {
            OverlayField::Position => self.position_ms = None,
            OverlayField::PlaybackSpeed => self.playback_speed = None,
            OverlayField::VideoScale => self.video_scale = None,
            OverlayField::AudioTrackIndex => self.audio_track_index = None,
            OverlayField::SubtitleTrackIndex => self.subtitle_track_index = None,
            OverlayField::VideoQuality => self.video_quality = None,
        }
    }

    /// Copie de l'overlay où seuls les champs fournis par `patch` changent
    pub fn patched(&self, patch: &OverlayPatch) -> StateOverlay {
        let mut next = self.clone();
        if let Some(v) = patch.position_ms {
            next.position_ms = v;
        }
        if let Some(v) = patch.playback_speed {
            next.playback_speed = v.and_then(valid_speed);
        }
        if let Some(v) = patch.video_scale {
            next.video_scale = v;
        }
        if let Some(v) = patch.audio_track_index {
            next.audio_track_index = v;
        }
        if let Some(v) = patch.subtitle_track_index {
            next.subtitle_track_index = v;
        }
        if let Some(v) = patch.video_quality {
            next.video_quality = v;
        }
        next
    }

    /// Encode les champs renseignés ; les champs absents n'ont pas de clé.
    pub fn encode(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(v) = self.position_ms {
            map.insert(keys::POSITION.into(), Value::from(v));
        }
        if let Some(v) = self.playback_speed {
            map.insert(keys::PLAYBACK_SPEED.into(), Value::from(v));
        }
        if let Some(v) = self.video_scale {
            map.insert(keys::VIDEO_SCALE.into(), Value::from(v));
        }
        if let Some(v) = self.audio_track_index {
            map.insert(keys::AUDIO_TRACK_INDEX.into(), Value::from(v));
        }
        if let Some(v) = self.subtitle_track_index {
            map.insert(keys::SUBTITLE_TRACK_INDEX.into(), Value::from(v));
        }
        if let Some(v) = self.video_quality {
            map.insert(keys::VIDEO_GROUP_INDEX.into(), Value::from(v.group_index));
            map.insert(
                keys::VIDEO_TRACK_INDEX_IN_GROUP.into(),
                Value::from(v.track_index_in_group),
            );
        }
        map
    }

    /// Décode un sac de métadonnées. Les valeurs mal typées sont ignorées,
    /// ainsi qu'un index de qualité vidéo isolé.
    pub fn decode(map: &Map<String, Value>) -> StateOverlay {
        let index = |key: &str| {
            map.get(key)
                .and_then(Value::as_u64)
                .map(|v| v as usize)
        };
        let real = |key: &str| map.get(key).and_then(Value::as_f64).map(|v| v as f32);

        let video_quality = match (
            index(keys::VIDEO_GROUP_INDEX),
            index(keys::VIDEO_TRACK_INDEX_IN_GROUP),
        ) {
            (Some(group), Some(track)) => Some(VideoQualitySelection::new(group, track)),
            _ => None,
        };

        StateOverlay {
            position_ms: map.get(keys::POSITION).and_then(Value::as_u64),
            playback_speed: real(keys::PLAYBACK_SPEED).and_then(valid_speed),
            video_scale: real(keys::VIDEO_SCALE),
            audio_track_index: index(keys::AUDIO_TRACK_INDEX),
            subtitle_track_index: index(keys::SUBTITLE_TRACK_INDEX),
            video_quality,
        }
    }
}

fn valid_speed(speed: f32) -> Option<f32> {
    (speed.is_finite() && speed > 0.0).then_some(speed)
}

/// Changements à appliquer à un overlay.
///
/// `None` laisse le champ tel quel, `Some(None)` l'efface, `Some(Some(v))`
/// le renseigne.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayPatch {
    pub position_ms: Option<Option<u64>>,
    pub playback_speed: Option<Option<f32>>,
    pub video_scale: Option<Option<f32>>,
    pub audio_track_index: Option<Option<usize>>,
    pub subtitle_track_index: Option<Option<usize>>,
    pub video_quality: Option<Option<VideoQualitySelection>>,
}

impl OverlayPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(mut self, value: Option<u64>) -> Self {
        self.position_ms = Some(value);
        self
    }

    pub fn playback_speed(mut self, value: Option<f32>) -> Self {
        self.playback_speed = Some(value);
        self
    }

    pub fn video_scale(mut self, value: Option<f32>) -> Self {
        self.video_scale = Some(value);
        self
    }

    pub fn audio_track(mut self, value: Option<usize>) -> Self {
        self.audio_track_index = Some(value);
        self
    }

    pub fn subtitle_track(mut self, value: Option<usize>) -> Self {
        self.subtitle_track_index = Some(value);
        self
    }

    pub fn video_quality(mut self, value: Option<VideoQualitySelection>) -> Self {
        self.video_quality = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &OverlayPatch::default()
    }
}

/// Descripteur immuable d'un élément de la file de lecture
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    media_id: String,
    uri: String,
    mime_type: Option<String>,
    title: Option<String>,
    artwork_uri: Option<String>,
    subtitle_uris: Vec<String>,
    extras: Map<String, Value>,
    overlay: StateOverlay,
}

impl MediaItem {
    /// Descripteur dont l'identifiant est l'URI
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            media_id: uri.clone(),
            uri,
            mime_type: None,
            title: None,
            artwork_uri: None,
            subtitle_uris: Vec::new(),
            extras: Map::new(),
            overlay: StateOverlay::default(),
        }
    }

    pub fn with_media_id(mut self, media_id: impl Into<String>) -> Self {
        self.media_id = media_id.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artwork_uri(mut self, artwork_uri: impl Into<String>) -> Self {
        self.artwork_uri = Some(artwork_uri.into());
        self
    }

    pub fn with_subtitle_uris(mut self, subtitle_uris: Vec<String>) -> Self {
        self.subtitle_uris = subtitle_uris;
        self
    }

    pub fn with_overlay(mut self, overlay: StateOverlay) -> Self {
        self.overlay = overlay;
        self
    }

    /// Reprend un sac de métadonnées venu du moteur : les clés de l'overlay
    /// sont décodées, les autres conservées telles quelles.
    pub fn with_extras(mut self, mut extras: Map<String, Value>) -> Self {
        self.overlay = StateOverlay::decode(&extras);
        for key in keys::ALL {
            extras.remove(key);
        }
        self.extras = extras;
        self
    }

    pub fn media_id(&self) -> &str {
        &self.media_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn artwork_uri(&self) -> Option<&str> {
        self.artwork_uri.as_deref()
    }

    pub fn subtitle_uris(&self) -> &[String] {
        &self.subtitle_uris
    }

    pub fn overlay(&self) -> &StateOverlay {
        &self.overlay
    }

    /// Sac de métadonnées complet, overlay encodé compris
    pub fn extras(&self) -> Map<String, Value> {
        let mut extras = self.extras.clone();
        extras.extend(self.overlay.encode());
        extras
    }

    /// Nouveau descripteur identique à celui-ci sauf pour les champs de
    /// l'overlay fournis par `patch`.
    pub fn copy_with(&self, patch: &OverlayPatch) -> MediaItem {
        MediaItem {
            overlay: self.overlay.patched(patch),
            ..self.clone()
        }
    }
}
