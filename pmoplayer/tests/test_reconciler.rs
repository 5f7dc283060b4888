mod common;

use common::{sample_tracks, EngineCall, Harness};
use pmocache::{ByteRange, QualityKey, SpanKey};
use pmoplayer::{
    DiscontinuityReason, LoopMode, MediaItem, PlayWhenReadyReason, PlaybackState, PlayerEvent,
    PlayerPreferences, PositionInfo, Readiness, RepeatMode, RepositoryCall, Resume,
    StateOverlay, TrackSelectionOverride, TrackSelectionParameters, TrackType, TransitionReason,
    VideoQualitySelection,
};

const X: &str = "https://cdn.test/x.mp4";
const Y: &str = "https://cdn.test/y.mp4";

fn item_x(overlay: StateOverlay) -> MediaItem {
    MediaItem::new(X).with_mime_type("video/mp4").with_overlay(overlay)
}

fn harness(overlay: StateOverlay) -> Harness {
    common::init_tracing();
    Harness::new(
        vec![item_x(overlay), MediaItem::new(Y)],
        PlayerPreferences::default(),
    )
}

fn transition(h: &Harness, item: MediaItem) {
    h.reconciler.handle_event(PlayerEvent::MediaItemTransition {
        item: Some(item),
        reason: TransitionReason::PlaylistChanged,
    });
}

#[tokio::test]
async fn test_transition_applies_speed_and_resume_position() {
    let overlay = StateOverlay {
        position_ms: Some(5000),
        playback_speed: Some(1.5),
        ..Default::default()
    };
    let h = harness(overlay.clone());

    transition(&h, item_x(overlay));

    let calls = h.engine.calls();
    assert!(calls.contains(&EngineCall::Speed(1.5)));
    assert!(calls.contains(&EngineCall::Seek(5000)));
    assert_eq!(h.coordinator.active_media_id().as_deref(), Some(X));
    let active = h.reconciler.active_item().unwrap();
    assert_eq!(active.mime_type.as_deref(), Some("video/mp4"));
    assert_eq!(h.reconciler.readiness(), Readiness::AwaitingItemReady);
}

#[tokio::test]
async fn test_transition_without_resume_uses_default_speed() {
    let overlay = StateOverlay {
        position_ms: Some(5000),
        ..Default::default()
    };
    let h = harness(overlay.clone());
    h.reconciler.set_preferences(PlayerPreferences {
        resume: Resume::No,
        default_playback_speed: 1.25,
        ..Default::default()
    });

    transition(&h, item_x(overlay));

    assert_eq!(h.engine.calls(), vec![EngineCall::Speed(1.25)]);
}

#[tokio::test]
async fn test_repeat_transition_is_a_no_op() {
    let h = harness(StateOverlay::default());
    transition(&h, item_x(StateOverlay::default()));
    h.engine.set_tracks(sample_tracks());
    h.reconciler.handle_event(PlayerEvent::TracksChanged(sample_tracks()));
    assert_eq!(h.reconciler.readiness(), Readiness::ItemReady);
    h.engine.clear_calls();

    h.reconciler.handle_event(PlayerEvent::MediaItemTransition {
        item: Some(item_x(StateOverlay::default())),
        reason: TransitionReason::Repeat,
    });

    assert!(h.engine.calls().is_empty());
    assert_eq!(h.reconciler.readiness(), Readiness::ItemReady);
}

#[tokio::test]
async fn test_seek_to_other_item_persists_source_position() {
    let h = harness(StateOverlay::default());
    let x = h.engine.item(0);
    let y = h.engine.item(1);

    h.reconciler.handle_event(PlayerEvent::PositionDiscontinuity {
        old: PositionInfo::new(Some(x), 0, 12_000),
        new: PositionInfo::new(Some(y), 1, 0),
        reason: DiscontinuityReason::Seek,
    });
    h.settle().await;

    assert_eq!(
        h.repository.calls(),
        vec![RepositoryCall::Position(X.into(), Some(12_000))]
    );
    assert_eq!(h.engine.item(0).overlay().position_ms, Some(12_000));
}

#[tokio::test]
async fn test_auto_transition_resets_position() {
    let h = harness(StateOverlay {
        position_ms: Some(3000),
        ..Default::default()
    });
    let x = h.engine.item(0);
    let y = h.engine.item(1);

    h.reconciler.handle_event(PlayerEvent::PositionDiscontinuity {
        old: PositionInfo::new(Some(x), 0, 59_000),
        new: PositionInfo::new(Some(y), 1, 0),
        reason: DiscontinuityReason::AutoTransition,
    });
    h.settle().await;

    assert_eq!(h.repository.calls(), vec![RepositoryCall::Position(X.into(), None)]);
    assert_eq!(h.engine.item(0).overlay().position_ms, None);
}

#[tokio::test]
async fn test_seek_within_item_and_removal() {
    let h = harness(StateOverlay::default());
    let x = h.engine.item(0);

    h.reconciler.handle_event(PlayerEvent::PositionDiscontinuity {
        old: PositionInfo::new(Some(x.clone()), 0, 1_000),
        new: PositionInfo::new(Some(x.clone()), 0, 30_000),
        reason: DiscontinuityReason::Seek,
    });
    h.settle().await;
    assert!(h.repository.calls().is_empty());

    h.reconciler.handle_event(PlayerEvent::PositionDiscontinuity {
        old: PositionInfo::new(Some(x), 0, 7_000),
        new: PositionInfo::new(None, 0, 0),
        reason: DiscontinuityReason::Remove,
    });
    h.settle().await;
    assert_eq!(
        h.repository.calls(),
        vec![RepositoryCall::Position(X.into(), Some(7_000))]
    );
    assert!(!h.engine.calls().iter().any(|c| matches!(c, EngineCall::Replace(_))));
}

#[tokio::test]
async fn test_stale_quality_is_cleared() {
    let overlay = StateOverlay {
        video_quality: Some(VideoQualitySelection::new(1, 2)),
        ..Default::default()
    };
    let h = harness(overlay.clone());
    transition(&h, item_x(overlay));
    h.engine.set_tracks(sample_tracks());

    h.reconciler.handle_event(PlayerEvent::TracksChanged(sample_tracks()));
    h.settle().await;

    assert_eq!(
        h.repository.calls(),
        vec![RepositoryCall::VideoQuality(X.into(), None)]
    );
    assert_eq!(h.engine.item(0).overlay().video_quality, None);
    assert_eq!(
        h.coordinator.current_quality_key(),
        Some(QualityKey::for_video(Some(1080), Some(5_000_000)))
    );
}

#[tokio::test]
async fn test_selections_restored_once_per_item() {
    let overlay = StateOverlay {
        audio_track_index: Some(1),
        subtitle_track_index: Some(0),
        video_quality: Some(VideoQualitySelection::new(0, 0)),
        ..Default::default()
    };
    let h = harness(overlay.clone());
    transition(&h, item_x(overlay));
    h.engine.set_tracks(sample_tracks());

    h.reconciler.handle_event(PlayerEvent::TracksChanged(sample_tracks()));
    let params = h.engine.params();
    assert_eq!(
        params.override_for_type(TrackType::Audio).unwrap().group_id,
        "audio-fr"
    );
    assert_eq!(
        params.override_for_type(TrackType::Text).unwrap().group_id,
        "text-en"
    );
    let video = params.override_for_type(TrackType::Video).unwrap();
    assert_eq!(video.group_id, "video");
    assert_eq!(video.track_indices, vec![0]);

    h.engine.clear_calls();
    h.reconciler.handle_event(PlayerEvent::TracksChanged(sample_tracks()));
    assert!(!h.engine.calls().contains(&EngineCall::TrackParams));
}

#[tokio::test]
async fn test_remember_selections_off_skips_restore() {
    let overlay = StateOverlay {
        audio_track_index: Some(1),
        ..Default::default()
    };
    let h = harness(overlay.clone());
    h.reconciler.set_preferences(PlayerPreferences {
        remember_selections: false,
        ..Default::default()
    });
    transition(&h, item_x(overlay));
    h.engine.set_tracks(sample_tracks());

    h.reconciler.handle_event(PlayerEvent::TracksChanged(sample_tracks()));

    assert!(h.engine.params().overrides.is_empty());
    assert!(h.coordinator.current_quality_key().is_some());
}

#[tokio::test]
async fn test_late_quality_change_evicts_previous_partition() {
    let h = harness(StateOverlay::default());
    transition(&h, item_x(StateOverlay::default()));
    h.engine.set_tracks(sample_tracks());
    h.reconciler.handle_event(PlayerEvent::TracksChanged(sample_tracks()));
    h.settle().await;

    let high = QualityKey::for_video(Some(1080), Some(5_000_000));
    let span = SpanKey::new(X, Some(&high), X, ByteRange::new(0, 4));
    let cache = h.coordinator.get_cache();
    assert!(cache.write_span(&span, X, b"data").await.unwrap());

    let mut lower = sample_tracks();
    lower.groups[0].selected = vec![true, false];
    h.reconciler.handle_event(PlayerEvent::TracksChanged(lower));
    h.settle().await;

    assert_eq!(
        h.coordinator.current_quality_key(),
        Some(QualityKey::for_video(Some(480), Some(900_000)))
    );
    assert!(!cache.is_cached(&span).unwrap());
}

#[tokio::test]
async fn test_user_track_change_is_persisted_once() {
    let h = harness(StateOverlay::default());
    h.engine.set_tracks(sample_tracks());
    let tracks = sample_tracks();
    let params = TrackSelectionParameters::default()
        .set_override_for_type(TrackSelectionOverride::new(&tracks.groups[2], 0))
        .set_override_for_type(TrackSelectionOverride::new(&tracks.groups[0], 0));

    h.reconciler
        .handle_event(PlayerEvent::TrackSelectionParametersChanged(params.clone()));
    h.settle().await;

    assert_eq!(
        h.repository.calls(),
        vec![
            RepositoryCall::AudioTrack(X.into(), 1),
            RepositoryCall::VideoQuality(X.into(), Some(VideoQualitySelection::new(0, 0))),
        ]
    );
    let overlay = h.engine.item(0).overlay().clone();
    assert_eq!(overlay.audio_track_index, Some(1));
    assert_eq!(overlay.video_quality, Some(VideoQualitySelection::new(0, 0)));

    // Même sélection : rien à écrire
    h.repository.clear_calls();
    h.engine.clear_calls();
    h.reconciler
        .handle_event(PlayerEvent::TrackSelectionParametersChanged(params));
    h.settle().await;
    assert!(h.repository.calls().is_empty());
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_speed_change_is_persisted() {
    let h = harness(StateOverlay::default());
    h.reconciler
        .handle_event(PlayerEvent::PlaybackParametersChanged { speed: 1.75 });
    h.settle().await;

    assert_eq!(
        h.repository.calls(),
        vec![RepositoryCall::PlaybackSpeed(X.into(), 1.75)]
    );
    assert_eq!(h.engine.item(0).overlay().playback_speed, Some(1.75));
}

#[tokio::test]
async fn test_ended_with_repeat_one_resets_then_restarts_item() {
    let h = harness(StateOverlay::default());
    h.engine.set_repeat(RepeatMode::One);
    h.engine.set_params(
        TrackSelectionParameters::default().set_track_type_disabled(TrackType::Text, true),
    );

    h.reconciler
        .handle_event(PlayerEvent::PlaybackStateChanged(PlaybackState::Ended));

    assert_eq!(
        h.engine.calls(),
        vec![
            EngineCall::TrackParams,
            EngineCall::Speed(1.0),
            EngineCall::Seek(0),
            EngineCall::Play,
        ]
    );
    assert_eq!(h.engine.params(), TrackSelectionParameters::default());
    assert_eq!(h.engine.state.lock().unwrap().items.len(), 2);
}

#[tokio::test]
async fn test_end_of_item_restarts_once_per_end() {
    let h = harness(StateOverlay::default());
    h.engine.set_repeat(RepeatMode::One);

    h.reconciler
        .handle_event(PlayerEvent::PlaybackStateChanged(PlaybackState::Ended));
    h.reconciler.handle_event(PlayerEvent::PlayWhenReadyChanged {
        play_when_ready: false,
        reason: PlayWhenReadyReason::EndOfMediaItem,
    });
    let restarts = |calls: Vec<EngineCall>| calls.iter().filter(|c| **c == EngineCall::Play).count();
    assert_eq!(restarts(h.engine.calls()), 1);

    // La lecture reprend : la fin suivante relance à nouveau
    h.reconciler
        .handle_event(PlayerEvent::PlaybackStateChanged(PlaybackState::Ready));
    h.reconciler.handle_event(PlayerEvent::PlayWhenReadyChanged {
        play_when_ready: false,
        reason: PlayWhenReadyReason::EndOfMediaItem,
    });
    assert_eq!(restarts(h.engine.calls()), 2);
}

#[tokio::test]
async fn test_terminal_state_resets_session_defaults() {
    let h = harness(StateOverlay::default());
    h.engine.set_params(
        TrackSelectionParameters::default().set_track_type_disabled(TrackType::Text, true),
    );

    h.reconciler
        .handle_event(PlayerEvent::PlaybackStateChanged(PlaybackState::Ended));

    assert_eq!(
        h.engine.calls(),
        vec![EngineCall::TrackParams, EngineCall::Speed(1.0)]
    );
    assert_eq!(h.engine.params(), TrackSelectionParameters::default());
}

#[tokio::test]
async fn test_ready_records_last_played_time() {
    let h = harness(StateOverlay::default());
    h.reconciler
        .handle_event(PlayerEvent::PlaybackStateChanged(PlaybackState::Ready));
    h.settle().await;
    assert_eq!(h.repository.calls(), vec![RepositoryCall::LastPlayedTime(X.into())]);
    assert!(h.repository.state(X).unwrap().last_played_time.is_some());
}

#[tokio::test]
async fn test_end_of_item_without_repeat_ends_session() {
    let h = harness(StateOverlay::default());
    let end = h.reconciler.end_requested();

    h.reconciler.handle_event(PlayerEvent::PlayWhenReadyChanged {
        play_when_ready: false,
        reason: PlayWhenReadyReason::EndOfMediaItem,
    });

    assert_eq!(h.engine.calls(), vec![EngineCall::Clear, EngineCall::Stop]);
    assert!(end.is_cancelled());
}

#[tokio::test]
async fn test_end_of_item_with_repeat_all_restarts() {
    let h = harness(StateOverlay::default());
    h.engine.set_repeat(RepeatMode::All);

    h.reconciler.handle_event(PlayerEvent::PlayWhenReadyChanged {
        play_when_ready: false,
        reason: PlayWhenReadyReason::EndOfMediaItem,
    });

    assert_eq!(h.engine.calls(), vec![EngineCall::Seek(0), EngineCall::Play]);
    assert!(!h.reconciler.end_requested().is_cancelled());
}

#[tokio::test]
async fn test_play_pause_checkpoints_position() {
    let h = harness(StateOverlay::default());
    h.engine.set_position(42_000);

    h.reconciler.handle_event(PlayerEvent::IsPlayingChanged(false));
    h.engine.set_position(43_000);
    h.reconciler.handle_event(PlayerEvent::IsPlayingChanged(true));
    h.settle().await;

    assert_eq!(
        h.repository.calls(),
        vec![
            RepositoryCall::Position(X.into(), Some(42_000)),
            RepositoryCall::Position(X.into(), Some(43_000)),
        ]
    );
}

#[tokio::test]
async fn test_repeat_mode_is_saved_as_loop_mode() {
    let h = harness(StateOverlay::default());
    h.reconciler
        .handle_event(PlayerEvent::RepeatModeChanged(RepeatMode::All));
    h.settle().await;

    assert_eq!(*h.preferences.loop_modes.lock().unwrap(), vec![LoopMode::All]);
    assert_eq!(h.reconciler.preferences().loop_mode, LoopMode::All);
}
