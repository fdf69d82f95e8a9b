// File: tunebot-core/tests/command_service_tests.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use tunebot_common::models::{
    BotSettings, Chatter, Command, MusicService, Permission, TrackInfo,
};
use tunebot_core::counters::CounterStore;
use tunebot_core::http::{HttpClient, HttpResponse};
use tunebot_core::music::{MusicBackend, MusicError, MusicRequestCoordinator, QueuedTrack};
use tunebot_core::services::{CommandResponse, CommandService};
use tunebot_core::store::{JsonCommandStore, ResponseStore, ResponseTemplate};
use tunebot_core::template::fetch::BoundedFetcher;
use tunebot_core::template::TemplateResolver;
use tunebot_core::Error;

struct NoHttp;

#[async_trait]
impl HttpClient for NoHttp {
    async fn get(
        &self,
        _url: String,
        _headers: HashMap<String, String>,
    ) -> Result<HttpResponse, Error> {
        Err(Error::Platform("no network in tests".to_string()))
    }

    async fn post_json(
        &self,
        _url: String,
        _headers: HashMap<String, String>,
        _body: serde_json::Value,
    ) -> Result<HttpResponse, Error> {
        Err(Error::Platform("no network in tests".to_string()))
    }

    async fn post_empty(
        &self,
        _url: String,
        _headers: HashMap<String, String>,
    ) -> Result<HttpResponse, Error> {
        Err(Error::Platform("no network in tests".to_string()))
    }
}

/// Queue-success backend for the happy path, NotFound for everything else.
struct StubBackend {
    service: MusicService,
    result: Option<QueuedTrack>,
}

#[async_trait]
impl MusicBackend for StubBackend {
    fn service(&self) -> MusicService {
        self.service
    }

    async fn request_track(&self, _query: &str) -> Result<QueuedTrack, MusicError> {
        self.result.clone().ok_or(MusicError::NoDevice)
    }

    async fn now_playing(&self) -> Result<TrackInfo, MusicError> {
        self.result
            .clone()
            .map(|q| q.track)
            .ok_or(MusicError::NotFound)
    }

    fn extract_track_id(&self, _input: &str) -> Option<String> {
        None
    }

    async fn track_info(&self, _track_id: &str) -> Result<TrackInfo, MusicError> {
        Err(MusicError::NotFound)
    }
}

struct Harness {
    service: CommandService,
    _dir: tempfile::TempDir,
}

fn harness(commands: Vec<Command>, settings: BotSettings, queued: Option<QueuedTrack>) -> Harness {
    harness_with(
        commands,
        settings,
        queued,
        ResponseStore::with_defaults(),
        false,
    )
}

fn harness_with(
    commands: Vec<Command>,
    settings: BotSettings,
    queued: Option<QueuedTrack>,
    responses: ResponseStore,
    unwritable_counters: bool,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    // Pointing the store at the directory itself makes every persist fail.
    let counters_path = if unwritable_counters {
        dir.path().to_path_buf()
    } else {
        dir.path().join("counts.json")
    };
    let counters = Arc::new(CounterStore::open(counters_path));
    let fetcher = Arc::new(BoundedFetcher::new(
        Arc::new(NoHttp),
        Duration::from_secs(1),
    ));
    let resolver = Arc::new(TemplateResolver::new(counters.clone(), fetcher));
    let settings = Arc::new(RwLock::new(settings));

    let spotify = Arc::new(StubBackend {
        service: MusicService::Spotify,
        result: queued.clone(),
    });
    let cider = Arc::new(StubBackend {
        service: MusicService::Cider,
        result: queued,
    });
    let coordinator = Arc::new(MusicRequestCoordinator::new(
        spotify,
        cider,
        settings.clone(),
    ));

    let service = CommandService::new(
        Arc::new(JsonCommandStore::from_commands(commands)),
        counters,
        resolver,
        coordinator,
        Arc::new(responses),
        settings,
    );
    Harness { service, _dir: dir }
}

fn chatter(name: &str) -> Chatter {
    Chatter {
        name: name.to_string(),
        ..Default::default()
    }
}

fn moderator(name: &str) -> Chatter {
    Chatter {
        name: name.to_string(),
        is_moderator: true,
        ..Default::default()
    }
}

fn queued_track() -> QueuedTrack {
    QueuedTrack {
        track: TrackInfo {
            name: "Thunderstruck".to_string(),
            artist: "AC/DC".to_string(),
            album: Some("The Razors Edge".to_string()),
            url: Some("https://open.spotify.com/track/abc".to_string()),
            artwork_url: None,
        },
        position: Some(2),
    }
}

fn first_text(response: &CommandResponse) -> &str {
    response.texts.first().map(String::as_str).unwrap_or("")
}

#[tokio::test]
async fn plain_chat_is_ignored() -> Result<(), Error> {
    let h = harness(vec![Command::new("hi", "hello")], BotSettings::default(), None);
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "just chatting", None)
        .await?;
    assert!(out.is_none());
    Ok(())
}

#[tokio::test]
async fn unknown_trigger_is_ignored() -> Result<(), Error> {
    let h = harness(vec![Command::new("hi", "hello")], BotSettings::default(), None);
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!nope", None)
        .await?;
    assert!(out.is_none());
    Ok(())
}

#[tokio::test]
async fn inactive_command_is_ignored() -> Result<(), Error> {
    let mut cmd = Command::new("hi", "hello");
    cmd.is_active = false;
    let h = harness(vec![cmd], BotSettings::default(), None);
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!hi", None)
        .await?;
    assert!(out.is_none());
    Ok(())
}

#[tokio::test]
async fn response_template_is_resolved() -> Result<(), Error> {
    let h = harness(
        vec![Command::new("hug", "$(user) hugs $(touser)!")],
        BotSettings::default(),
        None,
    );
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!hug @Bob", None)
        .await?
        .unwrap();
    assert_eq!(first_text(&out), "alice hugs Bob!");
    Ok(())
}

#[tokio::test]
async fn alias_routes_to_canonical_command() -> Result<(), Error> {
    let mut cmd = Command::new("hi", "greetings, used $(count) times");
    cmd.aliases = vec!["hello".to_string()];
    let h = harness(vec![cmd], BotSettings::default(), None);

    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!hello", None)
        .await?
        .unwrap();
    assert_eq!(first_text(&out), "greetings, used 1 times");

    // Alias and canonical trigger share the same counter.
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!hi", None)
        .await?
        .unwrap();
    assert_eq!(first_text(&out), "greetings, used 2 times");
    Ok(())
}

#[tokio::test]
async fn trigger_matching_is_case_insensitive() -> Result<(), Error> {
    let h = harness(vec![Command::new("hi", "hello")], BotSettings::default(), None);
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!Hi", None)
        .await?
        .unwrap();
    assert_eq!(first_text(&out), "hello");
    Ok(())
}

#[tokio::test]
async fn permission_gate_rejects_and_admits() -> Result<(), Error> {
    let mut cmd = Command::new("reset", "resetting");
    cmd.min_permission = Permission::Moderator;
    let h = harness(vec![cmd], BotSettings::default(), None);

    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!reset", None)
        .await?
        .unwrap();
    assert!(first_text(&out).contains("permission"));

    let out = h
        .service
        .handle_chat_line(&moderator("mods"), "!reset", None)
        .await?
        .unwrap();
    assert_eq!(first_text(&out), "resetting");
    Ok(())
}

#[tokio::test]
async fn cooldown_blocks_immediate_reuse() -> Result<(), Error> {
    let mut cmd = Command::new("slow", "done");
    cmd.cooldown_seconds = 30;
    let h = harness(vec![cmd], BotSettings::default(), None);

    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!slow", None)
        .await?
        .unwrap();
    assert_eq!(first_text(&out), "done");

    let out = h
        .service
        .handle_chat_line(&chatter("bob"), "!slow", None)
        .await?
        .unwrap();
    assert!(first_text(&out).contains("cooldown"));
    Ok(())
}

#[tokio::test]
async fn usage_counter_increments_once_per_invocation() -> Result<(), Error> {
    let h = harness(
        vec![Command::new("hug", "count: $(count)")],
        BotSettings::default(),
        None,
    );

    for expected in ["count: 1", "count: 2", "count: 3"] {
        let out = h
            .service
            .handle_chat_line(&chatter("alice"), "!hug", None)
            .await?
            .unwrap();
        assert_eq!(first_text(&out), expected);
    }
    Ok(())
}

#[tokio::test]
async fn unwritable_counter_file_does_not_block_replies() -> Result<(), Error> {
    let h = harness_with(
        vec![Command::new("hug", "count: $(count)")],
        BotSettings::default(),
        None,
        ResponseStore::with_defaults(),
        true,
    );

    // Persistence fails every time, but the in-memory count still moves
    // and the command still answers.
    for expected in ["count: 1", "count: 2"] {
        let out = h
            .service
            .handle_chat_line(&chatter("alice"), "!hug", None)
            .await?
            .unwrap();
        assert_eq!(first_text(&out), expected);
    }
    Ok(())
}

#[tokio::test]
async fn sr_without_query_prints_usage() -> Result<(), Error> {
    let h = harness(
        vec![Command::new("sr", "")],
        BotSettings::default(),
        Some(queued_track()),
    );
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!sr", None)
        .await?
        .unwrap();
    assert_eq!(first_text(&out), "Usage: !sr <song name or link>");
    Ok(())
}

#[tokio::test]
async fn sr_disabled_uses_disabled_template() -> Result<(), Error> {
    let settings = BotSettings {
        requests_enabled: false,
        ..Default::default()
    };
    let h = harness(vec![Command::new("sr", "")], settings, Some(queued_track()));
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!sr some song", None)
        .await?
        .unwrap();
    assert_eq!(
        first_text(&out),
        "@alice song requests are currently disabled."
    );
    Ok(())
}

#[tokio::test]
async fn disabled_requests_stay_disabled_with_silenced_template() -> Result<(), Error> {
    let settings = BotSettings {
        requests_enabled: false,
        ..Default::default()
    };
    let mut responses = ResponseStore::with_defaults();
    responses.insert(
        "sr_disabled",
        ResponseTemplate {
            template: "@{user} song requests are currently disabled.".to_string(),
            enabled: false,
        },
    );
    let h = harness_with(
        vec![Command::new("sr", "")],
        settings,
        Some(queued_track()),
        responses,
        false,
    );

    // The gate must hold even without a refusal template: nothing gets
    // queued and nothing is said.
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!sr some song", None)
        .await?
        .unwrap();
    assert!(out.texts.is_empty());
    Ok(())
}

#[tokio::test]
async fn sr_offline_gate_respects_stream_state() -> Result<(), Error> {
    let settings = BotSettings {
        disable_requests_offline: true,
        ..Default::default()
    };
    let h = harness(vec![Command::new("sr", "")], settings, Some(queued_track()));

    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!sr some song", None)
        .await?
        .unwrap();
    assert_eq!(
        first_text(&out),
        "@alice song requests are disabled while the stream is offline."
    );

    // Live stream: the gate opens.
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!sr some song", Some(Utc::now()))
        .await?
        .unwrap();
    assert!(first_text(&out).contains("queued"));
    Ok(())
}

#[tokio::test]
async fn successful_request_fills_the_success_template() -> Result<(), Error> {
    let h = harness(
        vec![Command::new("sr", "")],
        BotSettings::default(),
        Some(queued_track()),
    );
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!sr thunderstruck", None)
        .await?
        .unwrap();
    assert_eq!(
        first_text(&out),
        "alice queued Thunderstruck by AC/DC! https://open.spotify.com/track/abc"
    );
    Ok(())
}

#[tokio::test]
async fn failed_request_falls_back_to_error_template() -> Result<(), Error> {
    // StubBackend reports NoDevice when given no track to queue.
    let h = harness(vec![Command::new("sr", "")], BotSettings::default(), None);
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!sr thunderstruck", None)
        .await?
        .unwrap();
    assert_eq!(
        first_text(&out),
        "@alice could not queue \"thunderstruck\": no active playback device"
    );
    Ok(())
}

#[tokio::test]
async fn song_reports_now_playing() -> Result<(), Error> {
    let h = harness(
        vec![Command::new("song", "")],
        BotSettings::default(),
        Some(queued_track()),
    );
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!song", None)
        .await?
        .unwrap();
    assert_eq!(
        first_text(&out),
        "Now playing: Thunderstruck by AC/DC (The Razors Edge) https://open.spotify.com/track/abc"
    );
    Ok(())
}

#[tokio::test]
async fn split_marker_yields_multiple_messages() -> Result<(), Error> {
    let h = harness(
        vec![Command::new("rules", "rule one<SPLIT>rule two")],
        BotSettings::default(),
        None,
    );
    let out = h
        .service
        .handle_chat_line(&chatter("alice"), "!rules", None)
        .await?
        .unwrap();
    assert_eq!(out.texts, vec!["rule one".to_string(), "rule two".to_string()]);
    Ok(())
}
