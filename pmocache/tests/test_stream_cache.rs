use pmocache::{ByteRange, QualityKey, SpanKey, StreamCacheCoordinator};
use tempfile::TempDir;

fn create_coordinator() -> (TempDir, StreamCacheCoordinator) {
    let temp_dir = tempfile::tempdir().unwrap();
    let coordinator = StreamCacheCoordinator::open(temp_dir.path()).unwrap();
    (temp_dir, coordinator)
}

fn span(media: &str, quality: Option<&QualityKey>, offset: u64) -> SpanKey {
    SpanKey::new(
        media,
        quality,
        &format!("https://cdn.test/{media}.mp4"),
        ByteRange::new(offset, 8),
    )
}

async fn store(coordinator: &StreamCacheCoordinator, key: &SpanKey, media: &str) {
    assert!(coordinator
        .get_cache()
        .write_span(key, media, b"01234567")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_only_current_quality_survives() {
    let (_tmp, coordinator) = create_coordinator();
    let low = QualityKey::for_video(Some(360), Some(600_000));
    let high = QualityKey::for_video(Some(1080), Some(5_000_000));

    coordinator.set_active_media_id("A");
    let a_auto = span("A", None, 0);
    let a_low = span("A", Some(&low), 0);
    let a_high = span("A", Some(&high), 0);
    let b_low = span("B", Some(&low), 0);
    store(&coordinator, &a_auto, "A").await;
    store(&coordinator, &a_low, "A").await;
    store(&coordinator, &a_high, "A").await;
    store(&coordinator, &b_low, "B").await;

    coordinator.set_current_video_quality_key(Some(high.clone()));
    coordinator.delete_other_video_qualities().await;

    let cache = coordinator.get_cache();
    assert!(cache.is_cached(&a_high).unwrap());
    assert!(!cache.is_cached(&a_low).unwrap());
    assert!(!cache.is_cached(&a_auto).unwrap());
    // Les autres médias ne sont pas touchés
    assert!(cache.is_cached(&b_low).unwrap());
    assert!(cache.span_path(&b_low).exists());

    assert_eq!(
        cache.quality_partitions(&a_high.media_key).unwrap(),
        vec![high.to_string()]
    );
}

#[tokio::test]
async fn test_eviction_spares_partition_in_use() {
    let (_tmp, coordinator) = create_coordinator();
    let old = QualityKey::for_video(Some(480), Some(900_000));
    let new = QualityKey::for_video(Some(720), Some(2_000_000));

    coordinator.set_active_media_id("A");
    let a_old = span("A", Some(&old), 0);
    store(&coordinator, &a_old, "A").await;

    let cache = coordinator.get_cache();
    let reader = cache
        .open_partition(&a_old.media_key, &a_old.quality)
        .unwrap();

    coordinator.set_current_video_quality_key(Some(new));
    coordinator.delete_other_video_qualities().await;
    assert!(cache.is_cached(&a_old).unwrap());

    drop(reader);
    coordinator.delete_other_video_qualities().await;
    assert!(!cache.is_cached(&a_old).unwrap());
}

#[tokio::test]
async fn test_close_with_clear_policy_removes_everything() {
    let (_tmp, coordinator) = create_coordinator();
    let q = QualityKey::for_video(Some(720), None);

    coordinator.set_active_media_id("A");
    let a = span("A", Some(&q), 0);
    store(&coordinator, &a, "A").await;
    coordinator.set_active_media_id("B");
    let b = span("B", None, 8);
    store(&coordinator, &b, "B").await;

    let cache = coordinator.get_cache();
    coordinator.close(true).await;

    assert!(!cache.is_cached(&a).unwrap());
    assert!(!cache.is_cached(&b).unwrap());
    assert!(cache.media_keys().unwrap().is_empty());
}

#[tokio::test]
async fn test_close_with_keep_policy_leaves_partitions() {
    let temp_dir = tempfile::tempdir().unwrap();
    let q = QualityKey::for_video(Some(720), None);
    let a = span("A", Some(&q), 0);

    {
        let coordinator = StreamCacheCoordinator::open(temp_dir.path()).unwrap();
        coordinator.set_active_media_id("A");
        store(&coordinator, &a, "A").await;
        coordinator.close(false).await;
        assert!(coordinator.get_cache().is_cached(&a).unwrap());
    }

    // Une nouvelle session retrouve les données
    let coordinator = StreamCacheCoordinator::open(temp_dir.path()).unwrap();
    let cache = coordinator.get_cache();
    assert!(cache.is_cached(&a).unwrap());
    assert_eq!(
        cache.read_span(&a).await.unwrap().unwrap().as_ref(),
        b"01234567"
    );
}
