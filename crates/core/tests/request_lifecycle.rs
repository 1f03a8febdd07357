//! Request lifecycle and scheduling tests against mock infrastructure.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sublingo_core::events::ProgressBroadcaster;
use sublingo_core::language::{self, Language};
use sublingo_core::media::{EmbeddedSubtitle, MediaKind, NewMovie, SqliteMediaStore};
use sublingo_core::request::{
    RequestAttrs, RequestFilter, RequestService, RequestStatus, SqliteRequestStore,
};
use sublingo_core::settings::TranslationSettings;
use sublingo_core::testing::{MockBackend, MockProber};
use sublingo_core::{JobRunner, MediaStore, RequestStore};

fn request_service() -> Arc<RequestService> {
    Arc::new(RequestService::new(
        Arc::new(SqliteRequestStore::in_memory().unwrap()),
        ProgressBroadcaster::default(),
    ))
}

fn attrs(media_id: i64) -> RequestAttrs {
    RequestAttrs {
        title: "Movie".to_string(),
        source_language: "en".to_string(),
        target_language: "pl".to_string(),
        source_path: None,
        media_kind: MediaKind::Movie,
        media_id,
        is_priority: false,
    }
}

#[tokio::test]
async fn concurrent_creates_yield_a_single_active_row() {
    let service = request_service();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.create(attrs(7), false).unwrap().id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    // Every call resolved to the same row.
    assert_eq!(ids.len(), 1);

    let pending = service
        .list(&RequestFilter::new().with_status(RequestStatus::Pending))
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn cancel_running_job_is_acknowledged_by_the_runner() {
    let dir = tempfile::tempdir().unwrap();
    let media_store = Arc::new(SqliteMediaStore::in_memory().unwrap());
    let requests = request_service();
    let backend = Arc::new(MockBackend::echoing());
    // Keep the job parked in backoff so cancellation lands mid-run.
    backend.rate_limit_next(1000).await;

    let media = media_store
        .upsert_movie(NewMovie {
            external_id: 1,
            title: "Movie".to_string(),
            path: dir.path().display().to_string(),
            file_name: "Movie".to_string(),
            media_hash: None,
            date_added: chrono::Utc::now(),
        })
        .unwrap();
    let source = dir.path().join("Movie.en.srt");
    std::fs::write(
        &source,
        "1\r\n00:00:01,000 --> 00:00:02,000\r\nHello\r\n\r\n",
    )
    .unwrap();

    let request = requests
        .create(
            RequestAttrs {
                title: "Movie".to_string(),
                source_language: "en".to_string(),
                target_language: "fr".to_string(),
                source_path: Some(source),
                media_kind: MediaKind::Movie,
                media_id: media.id,
                is_priority: false,
            },
            false,
        )
        .unwrap();

    let runner = Arc::new(JobRunner::new(
        Arc::clone(&requests),
        media_store.clone(),
        Arc::new(MockProber::new()),
        backend,
    ));

    let mut settings = TranslationSettings::default();
    settings.retry.max_retries = 1000;
    settings.retry.base_delay = Duration::from_millis(50);

    let token = requests.register_worker(&request.id);
    let handle = {
        let runner = Arc::clone(&runner);
        let request = request.clone();
        tokio::spawn(async move { runner.run(&request, &settings, token).await })
    };

    // Give the job time to enter its backoff sleep, then cancel through the
    // service as a user would.
    tokio::time::sleep(Duration::from_millis(30)).await;
    requests.cancel(&request.id).unwrap();

    let outcome = handle.await.unwrap();
    assert_eq!(outcome.status, RequestStatus::Cancelled);
    assert_eq!(
        requests.get(&request.id).unwrap().unwrap().status,
        RequestStatus::Cancelled
    );
    assert!(!dir.path().join("Movie.fr.srt").exists());
}

#[tokio::test]
async fn retry_after_failure_keeps_history() {
    let service = request_service();
    let request = service.create(attrs(1), false).unwrap();
    service
        .store()
        .update_status(&request.id, RequestStatus::InProgress)
        .unwrap();
    service
        .store()
        .update_status(&request.id, RequestStatus::Failed)
        .unwrap();

    let fresh = service.retry(&request.id).unwrap();
    assert_ne!(fresh.id, request.id);

    // Old row is still there, terminal; fresh row holds the singleton slot.
    let all = service.list(&RequestFilter::new()).unwrap();
    assert_eq!(all.len(), 2);
    let second_retry = service.retry(&request.id).unwrap();
    assert_eq!(second_retry.id, fresh.id);
}

#[tokio::test]
async fn startup_recovery_fails_interrupted_requests() {
    let service = request_service();
    let interrupted = service.create(attrs(1), false).unwrap();
    let queued = service.create(attrs(2), false).unwrap();
    service
        .store()
        .update_status(&interrupted.id, RequestStatus::InProgress)
        .unwrap();

    let count = service
        .store()
        .fail_interrupted("Translation was interrupted by a service restart")
        .unwrap();
    assert_eq!(count, 1);

    let interrupted = service.get(&interrupted.id).unwrap().unwrap();
    assert_eq!(interrupted.status, RequestStatus::Failed);
    // Failed rows can be retried manually.
    assert!(service.retry(&interrupted.id).is_ok());

    let queued = service.get(&queued.id).unwrap().unwrap();
    assert_eq!(queued.status, RequestStatus::Pending);
}

/// A high-priority language whose only track is signs-and-songs loses to a
/// lower-priority language's full track.
#[test]
fn embedded_candidate_selection_prefers_quality_over_language_priority() {
    let signs = EmbeddedSubtitle {
        stream_index: 0,
        language: "eng".to_string(),
        title: "Signs & Songs".to_string(),
        codec: "ass".to_string(),
        is_text_based: true,
        is_default: true,
        is_forced: true,
        is_extracted: false,
        extracted_path: None,
    };
    let full = EmbeddedSubtitle {
        stream_index: 1,
        language: "jpn".to_string(),
        title: "Full Subtitles".to_string(),
        codec: "ass".to_string(),
        is_text_based: true,
        is_default: false,
        is_forced: false,
        is_extracted: false,
        extracted_path: None,
    };
    let configured = vec![
        Language::new("en", "English"),
        Language::new("ja", "Japanese"),
    ];

    let candidates = [signs.clone(), full];
    let best = language::find_best_match(&candidates, &configured).unwrap();
    assert_eq!(best.language, "jpn");

    // With a proper English track present, language priority wins again.
    let full_en = EmbeddedSubtitle {
        language: "eng".to_string(),
        title: "Full Dialogue".to_string(),
        is_default: false,
        is_forced: false,
        ..signs
    };
    let candidates = [
        full_en.clone(),
        EmbeddedSubtitle {
            stream_index: 1,
            language: "jpn".to_string(),
            title: "Full Subtitles".to_string(),
            codec: "ass".to_string(),
            is_text_based: true,
            is_default: false,
            is_forced: false,
            is_extracted: false,
            extracted_path: None,
        },
    ];
    let best = language::find_best_match(&candidates, &configured).unwrap();
    assert_eq!(best.language, "eng");
}

#[tokio::test]
async fn embedded_fallback_job_extracts_best_stream() {
    let dir = tempfile::tempdir().unwrap();
    let media_store = Arc::new(SqliteMediaStore::in_memory().unwrap());
    let requests = request_service();
    let prober = Arc::new(MockProber::new());

    // Stream 0 is an English signs track, stream 1 a Japanese full track.
    prober.add_stream("eng", "Signs & Songs", "ass", true).await;
    prober.set_dispositions(0, true, true).await;
    prober.add_stream("jpn", "Full Subtitles", "subrip", true).await;

    std::fs::write(dir.path().join("Movie.mkv"), "video").unwrap();
    let media = media_store
        .upsert_movie(NewMovie {
            external_id: 1,
            title: "Movie".to_string(),
            path: dir.path().display().to_string(),
            file_name: "Movie".to_string(),
            media_hash: None,
            date_added: chrono::Utc::now(),
        })
        .unwrap();
    let streams = {
        use sublingo_core::probe::ContainerProber;
        prober.probe(std::path::Path::new("x")).await.unwrap()
    };
    media_store
        .replace_embedded(MediaKind::Movie, media.id, &streams)
        .unwrap();

    let request = requests
        .create(
            RequestAttrs {
                title: "Movie".to_string(),
                source_language: "ja".to_string(),
                target_language: "pl".to_string(),
                source_path: None,
                media_kind: MediaKind::Movie,
                media_id: media.id,
                is_priority: false,
            },
            false,
        )
        .unwrap();

    let runner = JobRunner::new(
        Arc::clone(&requests),
        media_store,
        prober.clone(),
        Arc::new(MockBackend::echoing()),
    );

    let mut settings = TranslationSettings::default();
    settings.retry.max_retries = 1;
    settings.retry.base_delay = Duration::from_millis(1);
    settings.source_languages = vec![
        Language::new("en", "English"),
        Language::new("ja", "Japanese"),
    ];

    let outcome = runner
        .run(&request, &settings, CancellationToken::new())
        .await;
    assert_eq!(outcome.status, RequestStatus::Completed);

    // The Japanese full track was chosen over the English signs track.
    let extractions = prober.recorded_extractions().await;
    assert_eq!(extractions.len(), 1);
    assert_eq!(extractions[0].1, 1);

    // Output landed, extracted temp source did not stay behind.
    assert!(dir.path().join("Movie.pl.srt").exists());
    assert!(!dir.path().join("Movie.jpn.srt").exists());
}
