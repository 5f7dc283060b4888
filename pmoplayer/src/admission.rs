//! Admission des éléments dans la file de lecture
//!
//! Avant d'entrer dans la file, chaque descripteur est complété avec ce que
//! le dépôt connaît du média : titre, vignette, sous-titres externes et état
//! de lecture mémorisé. Les valeurs portées par le descripteur restent
//! prioritaires. Les lectures du dépôt se font en parallèle.

use futures::future::join_all;
use tracing::warn;
use url::Url;

use crate::overlay::{MediaItem, StateOverlay};
use crate::repository::{MediaRepository, Video, VideoState};

pub async fn admit_media_items(
    repository: &dyn MediaRepository,
    items: Vec<MediaItem>,
) -> Vec<MediaItem> {
    join_all(items.into_iter().map(|item| admit(repository, item))).await
}

async fn admit(repository: &dyn MediaRepository, item: MediaItem) -> MediaItem {
    let media_id = item.media_id().to_string();
    let (video, state) = tokio::join!(
        repository.get_video_by_uri(&media_id),
        repository.get_video_state(&media_id)
    );
    let video = video.unwrap_or_else(|e| {
        warn!(media_id = %media_id, "Video lookup failed: {:#}", e);
        None
    });
    let state = state.unwrap_or_else(|e| {
        warn!(media_id = %media_id, "Video state lookup failed: {:#}", e);
        None
    });
    with_metadata(item, video.as_ref(), state.as_ref())
}

fn with_metadata(item: MediaItem, video: Option<&Video>, state: Option<&VideoState>) -> MediaItem {
    let title = item
        .title()
        .map(str::to_string)
        .or_else(|| video.map(|v| v.name_with_extension.clone()).filter(|n| !n.is_empty()))
        .or_else(|| last_path_segment(item.uri()));

    let artwork = video
        .and_then(|v| v.thumbnail_path.clone())
        .or_else(|| item.artwork_uri().map(str::to_string));

    let mut subtitles = item.subtitle_uris().to_vec();
    if let Some(state) = state {
        for sub in &state.external_subs {
            if !subtitles.contains(sub) {
                subtitles.push(sub.clone());
            }
        }
    }

    let overlay = match state {
        Some(state) => merge_overlay(item.overlay(), &state.overlay()),
        None => item.overlay().clone(),
    };

    let mut admitted = item.with_subtitle_uris(subtitles).with_overlay(overlay);
    if let Some(title) = title {
        admitted = admitted.with_title(title);
    }
    if let Some(artwork) = artwork {
        admitted = admitted.with_artwork_uri(artwork);
    }
    admitted
}

/// Chaque champ reprend la valeur du descripteur, sinon la valeur persistée
fn merge_overlay(own: &StateOverlay, persisted: &StateOverlay) -> StateOverlay {
    StateOverlay {
        position_ms: own.position_ms.or(persisted.position_ms),
        playback_speed: own.playback_speed.or(persisted.playback_speed),
        video_scale: own.video_scale.or(persisted.video_scale),
        audio_track_index: own.audio_track_index.or(persisted.audio_track_index),
        subtitle_track_index: own.subtitle_track_index.or(persisted.subtitle_track_index),
        video_quality: own.video_quality.or(persisted.video_quality),
    }
}

fn last_path_segment(uri: &str) -> Option<String> {
    let segment = match Url::parse(uri) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string)),
        Err(_) => uri.rsplit('/').next().map(str::to_string),
    };
    segment.filter(|s| !s.is_empty())
}
