//! Response template resolution.
//!
//! Two syntactic forms are recognized: `{name}` context substitutions
//! (music success/failure fields) and `$(name arg)` variable calls. The
//! resolver is infallible from the caller's view: a broken reference
//! degrades to empty text or a fixed placeholder for that fragment, never
//! an error that would blank the whole message.

pub mod eval;
pub mod fetch;
pub mod variables;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::counters::CounterStore;
use crate::template::fetch::BoundedFetcher;

pub use variables::{ResolutionContext, VariableRegistry};

/// One extra expansion pass over resolved values. A variable's value is
/// re-scanned exactly once, so `$(a)` whose count template mentions
/// `$(b)` expands, but chains deeper than that stop. This bounds mutually
/// referencing commands.
const MAX_RESCAN_DEPTH: u8 = 1;

/// Cap on `$(...)` expansions within a single pass. References past the
/// cap are left verbatim in the output, so an operator template that
/// trips it sees literal `$(` in chat. Real templates carry a handful of
/// references at most; 16 leaves generous headroom without letting a
/// pathological template monopolize the handler.
const MAX_EXPANSIONS_PER_PASS: usize = 16;

pub struct TemplateResolver {
    registry: VariableRegistry,
}

impl TemplateResolver {
    pub fn new(counters: Arc<CounterStore>, fetcher: Arc<BoundedFetcher>) -> Self {
        Self {
            registry: VariableRegistry::new(counters, fetcher),
        }
    }

    /// Expands all references in `template` against `ctx`.
    pub async fn resolve(&self, template: &str, ctx: &ResolutionContext) -> String {
        let substituted = substitute_fields(template, ctx);
        let resolved = self.resolve_variables(&substituted, ctx, 0).await;
        debug!("resolved template '{}' -> '{}'", template, resolved);
        resolved
    }

    /// `$(name arg)` pass with balanced-paren matching, so arguments may
    /// themselves contain parentheses (`$(eval (1+2)*3)`).
    fn resolve_variables<'a>(
        &'a self,
        text: &'a str,
        ctx: &'a ResolutionContext,
        depth: u8,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = String> + Send + 'a>> {
        Box::pin(async move {
            let mut current = text.to_string();
            // Scanning resumes after each replacement, so references a
            // replacement itself introduces are not re-found within this
            // pass; only the bounded recursion below expands those.
            let mut from = 0usize;

            for _ in 0..MAX_EXPANSIONS_PER_PASS {
                let Some(mut span) = find_reference(&current[from..]) else {
                    break;
                };
                span.start += from;
                span.end += from;
                let inner = &current[span.start + 2..span.end];
                let (name, arg) = match inner.split_once(' ') {
                    Some((n, a)) => (n, a),
                    None => (inner, ""),
                };

                let mut replacement = match self.registry.expand(name, arg, ctx).await {
                    Some(value) => value,
                    None => {
                        warn!("unknown template variable '$({inner})'");
                        String::new()
                    }
                };

                // One bounded re-scan of the produced value, which lets a
                // command's stored response reference other variables.
                if depth < MAX_RESCAN_DEPTH && replacement.contains("$(") {
                    replacement = self.resolve_variables(&replacement, ctx, depth + 1).await;
                }

                current.replace_range(span.start..=span.end, &replacement);
                from = span.start + replacement.len();
            }

            current
        })
    }
}

struct ReferenceSpan {
    start: usize,
    /// Byte index of the matching `)`.
    end: usize,
}

/// Finds the first `$(...)` span with balanced parentheses. Returns `None`
/// when there is no reference or the parens never close.
fn find_reference(text: &str) -> Option<ReferenceSpan> {
    let start = text.find("$(")?;
    let mut depth = 0usize;
    for (offset, c) in text[start + 1..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(ReferenceSpan {
                        start,
                        end: start + 1 + offset,
                    });
                }
            }
            _ => {}
        }
    }
    None
}

/// `{name}` pass. Only applies when the context carries field bindings;
/// otherwise stray braces in a response stay untouched. A known-but-empty
/// field set still maps unknown identifiers to empty strings so music
/// templates never leak `{position}` style syntax into chat.
fn substitute_fields(template: &str, ctx: &ResolutionContext) -> String {
    if ctx.fields.is_empty() {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if is_identifier(name) {
                    match ctx.fields.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            warn!("context field '{{{name}}}' not populated, rendering empty");
                        }
                    }
                    rest = &after[close + 1..];
                } else {
                    // Not a field reference ("{ bar" or "{1:2}"), keep it.
                    out.push('{');
                    rest = after;
                }
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
