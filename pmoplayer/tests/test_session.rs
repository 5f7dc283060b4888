mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{sample_tracks, EngineCall, FakeEngine, RecordingPreferences};
use pmocache::{
    ByteRange, ClearPolicy, PrefetchSettings, RangeFetcher, SpanKey, StreamCacheConfigExt,
    StreamCacheCoordinator,
};
use pmoconfig::Config;
use pmoplayer::{
    CommandResult, InMemoryMediaRepository, LoopMode, MediaItem, PlaybackState,
    PlayerConfigExt, PlayerError, PlayerPreferences, PlayerSession, RepeatMode, RepositoryCall,
    SessionCommand, SessionOptions, StreamCacheSetup, Video, VideoState,
};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const X: &str = "https://cdn.test/x.mp4";
const CHUNK: u64 = 64 * 1024;

/// Amont qui renvoie des zéros
struct ZeroFetcher;

#[async_trait]
impl RangeFetcher for ZeroFetcher {
    async fn fetch(&self, _uri: &str, range: ByteRange) -> pmocache::Result<Bytes> {
        Ok(Bytes::from(vec![0u8; range.length.unwrap_or(16) as usize]))
    }
}

struct Fixture {
    engine: Arc<FakeEngine>,
    repository: Arc<InMemoryMediaRepository>,
    coordinator: Arc<StreamCacheCoordinator>,
    session: PlayerSession,
}

fn fixture(dir: &Path, policy: ClearPolicy, prefs: PlayerPreferences) -> Fixture {
    common::init_tracing();
    let engine = FakeEngine::with_items(Vec::new());
    let repository = Arc::new(InMemoryMediaRepository::new());
    let coordinator = Arc::new(StreamCacheCoordinator::open(dir).unwrap());
    let session = PlayerSession::new(
        engine.clone(),
        repository.clone(),
        Arc::new(RecordingPreferences::default()),
        Some(StreamCacheSetup {
            coordinator: coordinator.clone(),
            fetcher: Arc::new(ZeroFetcher),
            prefetch: PrefetchSettings::new(CHUNK, 2),
            clear_policy: policy,
        }),
        SessionOptions {
            preferences: prefs,
            ..Default::default()
        },
    )
    .unwrap();
    Fixture {
        engine,
        repository,
        coordinator,
        session,
    }
}

fn span(offset: u64) -> SpanKey {
    SpanKey::new(X, None, X, ByteRange::new(offset, 4))
}

#[tokio::test]
async fn test_session_start_applies_preferences() {
    let tmp = TempDir::new().unwrap();
    let f = fixture(
        tmp.path(),
        ClearPolicy::Keep,
        PlayerPreferences {
            loop_mode: LoopMode::One,
            autoplay: false,
            ..Default::default()
        },
    );
    assert_eq!(
        f.engine.calls(),
        vec![EngineCall::Repeat(RepeatMode::One), EngineCall::PauseAtEnd(true)]
    );
    assert!(!f.session.is_degraded());
}

#[tokio::test]
async fn test_set_media_items_admits_and_activates_start_item() {
    let tmp = TempDir::new().unwrap();
    let f = fixture(tmp.path(), ClearPolicy::Keep, PlayerPreferences::default());
    f.repository.insert_video(Video {
        uri: X.into(),
        name_with_extension: "x.mp4".into(),
        ..Default::default()
    });
    f.repository.insert_state(VideoState {
        uri: X.into(),
        position_ms: Some(8000),
        ..Default::default()
    });

    f.session
        .set_media_items(
            vec![MediaItem::new("https://cdn.test/intro.mp4"), MediaItem::new(X)],
            1,
            None,
        )
        .await
        .unwrap();

    assert_eq!(f.coordinator.active_media_id().as_deref(), Some(X));
    assert_eq!(f.session.reconciler().active_item().unwrap().uri, X);
    let admitted = f.engine.item(1);
    assert_eq!(admitted.title(), Some("x.mp4"));
    assert_eq!(admitted.overlay().position_ms, Some(8000));
}

#[tokio::test]
async fn test_close_with_clear_policy_removes_partitions() {
    let tmp = TempDir::new().unwrap();
    let f = fixture(tmp.path(), ClearPolicy::ClearOnExit, PlayerPreferences::default());
    f.session
        .set_media_items(vec![MediaItem::new(X)], 0, None)
        .await
        .unwrap();
    let cache = f.coordinator.get_cache();
    assert!(cache.write_span(&span(0), X, b"abcd").await.unwrap());

    f.session.close().await;

    assert!(!cache.is_cached(&span(0)).unwrap());
    assert!(cache.media_keys().unwrap().is_empty());
    assert!(f.engine.calls().contains(&EngineCall::Clear));
    assert!(f.session.tasks().is_shut_down());
}

#[tokio::test]
async fn test_close_with_keep_policy_leaves_partitions() {
    let tmp = TempDir::new().unwrap();
    {
        let f = fixture(tmp.path(), ClearPolicy::Keep, PlayerPreferences::default());
        f.session
            .set_media_items(vec![MediaItem::new(X)], 0, None)
            .await
            .unwrap();
        let cache = f.coordinator.get_cache();
        assert!(cache.write_span(&span(0), X, b"abcd").await.unwrap());
        f.session.close().await;
    }

    let coordinator = StreamCacheCoordinator::open(tmp.path()).unwrap();
    assert!(coordinator.get_cache().is_cached(&span(0)).unwrap());
}

#[tokio::test]
async fn test_closed_session_rejects_work() {
    let tmp = TempDir::new().unwrap();
    let f = fixture(tmp.path(), ClearPolicy::Keep, PlayerPreferences::default());
    f.session.close().await;
    f.session.close().await;

    let err = f
        .session
        .set_media_items(vec![MediaItem::new(X)], 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PlayerError::SessionClosed));
    assert_eq!(f.session.on_playback_progress(0, None).await, 0);
}

#[tokio::test]
async fn test_progress_prefetches_active_stream() {
    let tmp = TempDir::new().unwrap();
    let f = fixture(tmp.path(), ClearPolicy::Keep, PlayerPreferences::default());
    f.session
        .set_media_items(vec![MediaItem::new(X).with_mime_type("video/mp4")], 0, None)
        .await
        .unwrap();

    assert_eq!(f.session.on_playback_progress(0, Some(10 * CHUNK)).await, 2);
    let prefetcher = f.session.prefetcher().unwrap();
    prefetcher.wait_idle().await;

    let chunk = prefetcher.span_key(X, X, ByteRange::new(CHUNK, CHUNK));
    assert!(f.coordinator.get_cache().is_cached(&chunk).unwrap());
    assert_eq!(f.session.on_playback_progress(0, Some(10 * CHUNK)).await, 0);
}

#[tokio::test]
async fn test_add_subtitle_track_command() {
    let tmp = TempDir::new().unwrap();
    let f = fixture(tmp.path(), ClearPolicy::Keep, PlayerPreferences::default());
    f.session
        .set_media_items(vec![MediaItem::new(X)], 0, None)
        .await
        .unwrap();
    f.engine.set_tracks(sample_tracks());
    f.engine.set_position(15_000);

    assert_eq!(
        f.session
            .handle_custom_command("ADD_SUBTITLE_TRACK", &Map::new()),
        CommandResult::BadValue
    );

    let mut args = Map::new();
    args.insert("subtitle_track_uri".into(), Value::from("file:///subs/x.srt"));
    assert_eq!(
        f.session.handle_custom_command("ADD_SUBTITLE_TRACK", &args),
        CommandResult::Success
    );
    f.session.tasks().flush().await;

    assert_eq!(
        f.repository.calls(),
        vec![
            RepositoryCall::Position(X.into(), Some(15_000)),
            RepositoryCall::SubtitleTrack(X.into(), 1),
            RepositoryCall::ExternalSubtitle(X.into(), "file:///subs/x.srt".into()),
        ]
    );
    assert!(f
        .engine
        .calls()
        .contains(&EngineCall::AddSubtitle("file:///subs/x.srt".into())));
    let item = f.engine.item(0);
    assert_eq!(item.overlay().subtitle_track_index, Some(1));
    assert_eq!(item.subtitle_uris(), &["file:///subs/x.srt".to_string()]);
}

#[tokio::test]
async fn test_stop_command_ends_session() {
    let tmp = TempDir::new().unwrap();
    let f = fixture(tmp.path(), ClearPolicy::Keep, PlayerPreferences::default());
    f.session
        .set_media_items(vec![MediaItem::new(X)], 0, None)
        .await
        .unwrap();
    f.engine.set_position(2_500);
    let end = f.session.end_requested();

    assert_eq!(
        f.session.execute_command(SessionCommand::StopPlayerSession),
        CommandResult::Success
    );
    f.session.tasks().flush().await;

    assert!(end.is_cancelled());
    assert_eq!(
        f.repository.calls(),
        vec![RepositoryCall::Position(X.into(), Some(2_500))]
    );
    assert_eq!(f.engine.state.lock().unwrap().items.len(), 0);
}

#[tokio::test]
async fn test_task_removal() {
    let tmp = TempDir::new().unwrap();
    let f = fixture(tmp.path(), ClearPolicy::Keep, PlayerPreferences::default());
    f.session
        .set_media_items(vec![MediaItem::new(X)], 0, None)
        .await
        .unwrap();
    {
        let mut state = f.engine.state.lock().unwrap();
        state.play_when_ready = true;
        state.state = PlaybackState::Ready;
    }
    assert!(!f.session.on_task_removed());
    assert!(!f.session.end_requested().is_cancelled());

    f.engine.state.lock().unwrap().state = PlaybackState::Ended;
    assert!(f.session.on_task_removed());
    assert!(f.session.end_requested().is_cancelled());
}

#[tokio::test]
async fn test_from_config_degrades_without_cache() {
    let tmp = TempDir::new().unwrap();
    let config = Config::load_config(tmp.path().to_str().unwrap()).unwrap();
    config.set_autoplay(false).unwrap();

    // Le répertoire du cache est un fichier : le cache ne peut pas s'ouvrir
    let blocker = tmp.path().join("not_a_dir");
    std::fs::write(&blocker, b"x").unwrap();
    config
        .set_stream_cache_dir(blocker.to_string_lossy().to_string())
        .unwrap();

    let engine = FakeEngine::with_items(Vec::new());
    let session = PlayerSession::from_config(
        Arc::new(config),
        engine.clone(),
        Arc::new(InMemoryMediaRepository::new()),
    )
    .unwrap();

    assert!(session.is_degraded());
    assert!(engine.calls().contains(&EngineCall::PauseAtEnd(true)));

    session
        .set_media_items(vec![MediaItem::new(X)], 0, None)
        .await
        .unwrap();
    assert_eq!(session.on_playback_progress(0, None).await, 0);
    session.close().await;
}

#[tokio::test]
async fn test_from_config_opens_configured_cache() {
    let tmp = TempDir::new().unwrap();
    let config = Arc::new(Config::load_config(tmp.path().to_str().unwrap()).unwrap());
    let engine = FakeEngine::with_items(Vec::new());

    let session = PlayerSession::from_config(
        config.clone(),
        engine,
        Arc::new(InMemoryMediaRepository::new()),
    )
    .unwrap();

    assert!(!session.is_degraded());
    assert_eq!(config.get_loop_mode().unwrap(), LoopMode::Off);
    session.close().await;
}
