//! Chat-line handling: trigger matching, permissions, cooldowns, counter
//! bookkeeping, music dispatch, and template resolution.
//!
//! One chat line is processed to completion before the next; the only
//! suspension points are inside the fetcher and the music backends, both
//! of which run under deadlines. The response is returned to the caller
//! (the chat connection layer), never sent from here.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::Error;
use crate::counters::CounterStore;
use crate::music::{self, MusicRequestCoordinator};
use crate::store::{CommandRepository, ResponseStore};
use crate::template::{ResolutionContext, TemplateResolver};
use tunebot_common::models::{
    BotSettings, Chatter, Command, MusicErrorCode, MusicService, RequestOutcome,
};

/// What gets sent back to chat for one invocation. A template may embed
/// `<SPLIT>` to produce multiple messages.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub texts: Vec<String>,
}

impl CommandResponse {
    fn single(text: String) -> Self {
        Self { texts: vec![text] }
    }

    fn split(raw: String) -> Self {
        let texts: Vec<String> = raw
            .split("<SPLIT>")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { texts }
    }
}

/// Where a music command routes.
enum MusicRoute {
    Request(MusicService),
    NowPlaying,
}

pub struct CommandService {
    command_repo: Arc<dyn CommandRepository>,
    counters: Arc<CounterStore>,
    resolver: Arc<TemplateResolver>,
    coordinator: Arc<MusicRequestCoordinator>,
    responses: Arc<ResponseStore>,
    settings: Arc<RwLock<BotSettings>>,
    cooldowns: DashMap<Uuid, Instant>,
}

impl CommandService {
    pub fn new(
        command_repo: Arc<dyn CommandRepository>,
        counters: Arc<CounterStore>,
        resolver: Arc<TemplateResolver>,
        coordinator: Arc<MusicRequestCoordinator>,
        responses: Arc<ResponseStore>,
        settings: Arc<RwLock<BotSettings>>,
    ) -> Self {
        debug!("Initializing CommandService");
        Self {
            command_repo,
            counters,
            resolver,
            coordinator,
            responses,
            settings,
            cooldowns: DashMap::new(),
        }
    }

    /// Processes one chat line and returns a response if it invoked a
    /// command. `stream_started_at` is the chat layer's view of stream
    /// state, used for `$(uptime)` and the offline-requests gate.
    pub async fn handle_chat_line(
        &self,
        chatter: &Chatter,
        message_text: &str,
        stream_started_at: Option<DateTime<Utc>>,
    ) -> Result<Option<CommandResponse>, Error> {
        debug!("handle_chat_line() received message: '{}'", message_text);

        // 1) Only `!`-prefixed lines are command invocations.
        let trimmed = message_text.trim();
        if !trimmed.starts_with('!') {
            return Ok(None);
        }

        // 2) Parse trigger and arguments.
        let mut parts = trimmed.split_whitespace();
        let Some(typed_trigger) = parts.next() else {
            return Ok(None);
        };
        let args: Vec<String> = parts.map(|s| s.to_string()).collect();

        // 3) Look up the command; alias resolution happens in the store.
        let Some(cmd) = self.command_repo.get_command(typed_trigger).await? else {
            debug!("no command found matching '{typed_trigger}'");
            return Ok(None);
        };

        if !cmd.is_active {
            debug!("command '{}' is inactive", cmd.trigger);
            return Ok(None);
        }

        // 4) Permission gate.
        if !chatter.can_run(cmd.min_permission) {
            debug!(
                "user '{}' lacks role '{}' for '{}'",
                chatter.name, cmd.min_permission, cmd.trigger
            );
            return Ok(Some(CommandResponse::single(format!(
                "You do not have permission to use !{}.",
                cmd.trigger
            ))));
        }

        // 5) Cooldown gate.
        if let Some(remaining) = self.check_cooldown(&cmd) {
            return Ok(Some(CommandResponse::single(format!(
                "Command !{} is on cooldown. Please wait {}s.",
                cmd.trigger, remaining
            ))));
        }

        // 6) One successful match, one increment. Counts are best-effort
        //    telemetry; a failed persist never blocks the reply.
        let count = match self.counters.increment(&cmd.trigger).await {
            Ok(count) => count,
            Err(e) => {
                warn!("could not persist count for '{}': {e}", cmd.trigger);
                self.counters.get(&cmd.trigger).await
            }
        };
        info!(
            "command '!{}' invoked by {} (count {count})",
            cmd.trigger, chatter.name
        );

        // 7) Music commands go through the coordinator first; everything
        //    ends in template resolution either way.
        if let Some(route) = music_route(&cmd) {
            let response = self
                .handle_music(&cmd, route, chatter, &args, stream_started_at)
                .await;
            return Ok(Some(response));
        }

        let ctx = ResolutionContext {
            chatter: chatter.clone(),
            args,
            trigger: Some(cmd.trigger.clone()),
            stream_started_at,
            fields: Default::default(),
        };
        let text = self.resolver.resolve(&cmd.response, &ctx).await;
        Ok(Some(CommandResponse::split(text)))
    }

    async fn handle_music(
        &self,
        cmd: &Command,
        route: MusicRoute,
        chatter: &Chatter,
        args: &[String],
        stream_started_at: Option<DateTime<Utc>>,
    ) -> CommandResponse {
        let query = args.join(" ");

        let (outcome, success_key, error_prefix) = match route {
            MusicRoute::NowPlaying => (
                self.coordinator.now_playing().await,
                "song_success",
                "song",
            ),
            MusicRoute::Request(service) => {
                if let Some(gate) = self.request_gate(chatter, stream_started_at).await {
                    return gate;
                }
                if query.is_empty() {
                    return CommandResponse::single(format!(
                        "Usage: !{} <song name or link>",
                        cmd.trigger
                    ));
                }
                (
                    self.coordinator.request(service, chatter, &query).await,
                    "sr_success",
                    "sr",
                )
            }
        };

        let key = match &outcome {
            RequestOutcome::Failed { code, .. } => self.error_key(error_prefix, *code),
            _ => success_key.to_string(),
        };

        let Some(template) = self
            .responses
            .get(&key)
            .or_else(|| self.responses.get(&format!("{error_prefix}_error")))
        else {
            // Template disabled: stay silent, that is the operator's call.
            debug!("response template '{key}' missing or disabled");
            return CommandResponse { texts: Vec::new() };
        };

        let ctx = ResolutionContext {
            chatter: chatter.clone(),
            args: args.to_vec(),
            trigger: Some(cmd.trigger.clone()),
            stream_started_at,
            fields: music::context_fields(&outcome, chatter, &query),
        };
        let text = self.resolver.resolve(template, &ctx).await;
        CommandResponse::split(text)
    }

    /// Request-enablement gates shared by `!sr` and `!csr`. Returns the
    /// refusal response when a gate is closed. A closed gate stays closed
    /// even when the operator silenced the refusal template; the reply is
    /// then simply empty.
    async fn request_gate(
        &self,
        chatter: &Chatter,
        stream_started_at: Option<DateTime<Utc>>,
    ) -> Option<CommandResponse> {
        let settings = self.settings.read().await;
        let key = if !settings.requests_enabled {
            "sr_disabled"
        } else if settings.disable_requests_offline && stream_started_at.is_none() {
            "sr_offline"
        } else {
            return None;
        };
        drop(settings);

        let Some(template) = self.responses.get(key) else {
            debug!("request gate '{key}' closed with silenced template");
            return Some(CommandResponse { texts: Vec::new() });
        };
        let template = template.to_string();
        let mut ctx = ResolutionContext::for_chatter(chatter.clone());
        ctx.fields
            .insert("user".to_string(), chatter.name.clone());
        Some(CommandResponse::split(
            self.resolver.resolve(&template, &ctx).await,
        ))
    }

    /// Per-code response key (`sr_no_device`, ...) with the generic
    /// `sr_error` as fallback, resolved by the caller.
    fn error_key(&self, prefix: &str, code: MusicErrorCode) -> String {
        let suffix = match code {
            MusicErrorCode::NotFound => "search_failed",
            MusicErrorCode::NoDevice => "no_device",
            MusicErrorCode::AuthExpired => "auth_expired",
            MusicErrorCode::PremiumRequired => "premium_required",
            MusicErrorCode::RateLimited => "rate_limited",
            MusicErrorCode::BackendUnavailable => "not_connected",
            MusicErrorCode::BackendError => "error",
            MusicErrorCode::Timeout => "timeout",
        };
        let key = format!("{prefix}_{suffix}");
        if self.responses.get(&key).is_some() {
            key
        } else {
            format!("{prefix}_error")
        }
    }

    /// Returns seconds remaining when the command is still cooling down,
    /// otherwise arms the cooldown.
    fn check_cooldown(&self, cmd: &Command) -> Option<u64> {
        if cmd.cooldown_seconds == 0 {
            return None;
        }
        let now = Instant::now();
        if let Some(last) = self.cooldowns.get(&cmd.command_id) {
            let elapsed = now.duration_since(*last).as_secs();
            let cooldown = cmd.cooldown_seconds as u64;
            if elapsed < cooldown {
                warn!("command '!{}' is on cooldown", cmd.trigger);
                return Some(cooldown - elapsed);
            }
        }
        self.cooldowns.insert(cmd.command_id, now);
        None
    }
}

/// Routing for the built-in music commands, keyed on canonical trigger:
/// `!sr` is always Spotify, `!csr` always Cider, `!song` asks whichever
/// service is configured active.
fn music_route(cmd: &Command) -> Option<MusicRoute> {
    match cmd.trigger.as_str() {
        "sr" => Some(MusicRoute::Request(MusicService::Spotify)),
        "csr" => Some(MusicRoute::Request(MusicService::Cider)),
        "song" => Some(MusicRoute::NowPlaying),
        _ => None,
    }
}
