//! Variable providers for `$(...)` references.
//!
//! One registry instance serves all invocations; per-invocation data
//! arrives through the [`ResolutionContext`] built by the command service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::counters::CounterStore;
use crate::template::eval;
use crate::template::fetch::BoundedFetcher;
use tunebot_common::models::Chatter;

/// Neutral text inserted when `$(eval ...)` fails for any reason.
pub const EVAL_FALLBACK: &str = "[expression error]";

/// Per-invocation bindings available to one template expansion. Built
/// fresh by the command service and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    pub chatter: Chatter,
    /// Words following the trigger in the chat message.
    pub args: Vec<String>,
    /// Trigger of the command being resolved, for `$(count)`.
    pub trigger: Option<String>,
    /// When the stream went live, if it is live; drives `$(uptime)`.
    pub stream_started_at: Option<DateTime<Utc>>,
    /// `{name}` bindings. Populated only for music invocations, with
    /// exactly one of the success or failure variable sets.
    pub fields: HashMap<String, String>,
}

impl ResolutionContext {
    pub fn for_chatter(chatter: Chatter) -> Self {
        Self {
            chatter,
            ..Default::default()
        }
    }

    pub fn query(&self) -> String {
        self.args.join(" ")
    }
}

/// Maps variable names to their producers. Unknown names return `None`
/// so the resolver can degrade without leaking syntax into chat.
pub struct VariableRegistry {
    counters: Arc<CounterStore>,
    fetcher: Arc<BoundedFetcher>,
}

impl VariableRegistry {
    pub fn new(counters: Arc<CounterStore>, fetcher: Arc<BoundedFetcher>) -> Self {
        Self { counters, fetcher }
    }

    /// Expands one `$(name arg)` reference. `arg` is the verbatim text
    /// after the name, up to the matching close paren.
    pub async fn expand(&self, name: &str, arg: &str, ctx: &ResolutionContext) -> Option<String> {
        let name = name.to_lowercase();
        match name.as_str() {
            "user" => Some(ctx.chatter.name.clone()),
            "touser" => {
                let target = ctx
                    .args
                    .first()
                    .map(|a| a.trim_start_matches('@').to_string());
                Some(target.unwrap_or_else(|| ctx.chatter.name.clone()))
            }
            "query" => Some(ctx.query()),
            "count" => {
                let count = match &ctx.trigger {
                    Some(trigger) => self.counters.get(trigger).await,
                    None => 0,
                };
                Some(count.to_string())
            }
            "uptime" => Some(format_uptime(ctx.stream_started_at)),
            "eval" => Some(match eval::evaluate(arg) {
                Ok(result) => result,
                Err(e) => {
                    warn!("eval rejected expression '{arg}': {e}");
                    EVAL_FALLBACK.to_string()
                }
            }),
            "urlfetch" => Some(self.fetcher.fetch(arg).await),
            // No argument and a known trigger: cross-command count
            // reference, e.g. `$(hug)` inside another command's response.
            other if arg.is_empty() => {
                if self.counters.contains(other).await {
                    Some(self.counters.get(other).await.to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

fn format_uptime(started_at: Option<DateTime<Utc>>) -> String {
    match started_at {
        Some(start) => {
            let total = (Utc::now() - start).num_seconds().max(0);
            let hours = total / 3600;
            let minutes = (total % 3600) / 60;
            let seconds = total % 60;
            format!("{hours}h {minutes}m {seconds}s")
        }
        None => "Stream is offline.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn uptime_formats_hours_minutes_seconds() {
        let start = Utc::now() - Duration::seconds(3725);
        let out = format_uptime(Some(start));
        assert_eq!(out, "1h 2m 5s");
    }

    #[test]
    fn uptime_offline_without_start_time() {
        assert_eq!(format_uptime(None), "Stream is offline.");
    }
}
