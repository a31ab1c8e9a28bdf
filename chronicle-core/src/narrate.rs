//! Context narration — turning a [`Context`] into prose.
//!
//! The host usually owns text generation (an LLM, a template bank, a
//! writer's hand-authored lines). It plugs that in as a [`Narrator`]; when
//! none is supplied the engine falls back to [`TemplateNarrator`], which
//! produces serviceable, deterministic summary prose.

use std::fmt::Write as _;

use crate::context::Context;

/// Strategy for rendering a context into narrative text.
///
/// Called synchronously from whatever invoked the engine; implementations
/// must not block on I/O.
pub trait Narrator {
    /// Render `context` into prose for downstream presentation.
    fn narrate(&self, context: &Context) -> String;
}

/// Built-in fallback narrator: one line of standing, one per memory.
#[derive(Debug, Clone, Default)]
pub struct TemplateNarrator;

impl Narrator for TemplateNarrator {
    fn narrate(&self, context: &Context) -> String {
        let mut out = String::new();

        if context.aggregates.is_empty() && context.memories.is_empty() {
            let _ = write!(out, "{} has no story to tell yet.", context.subject);
            return out;
        }

        let standings: Vec<String> = context
            .aggregates
            .iter()
            .map(|(name, state)| format!("{name} {} ({:.0})", state.level, state.value))
            .collect();
        if !standings.is_empty() {
            let _ = writeln!(out, "{}: {}.", context.subject, standings.join(", "));
        }

        for edge in &context.edges {
            let other = if edge.a == context.subject {
                &edge.b
            } else {
                &edge.a
            };
            let _ = writeln!(out, "Toward {other}: {} ({:.0}).", edge.stance, edge.score);
        }

        for ranked in &context.memories {
            let record = &ranked.record;
            let mood = if record.valence > 0.2 {
                "fondly remembers"
            } else if record.valence < -0.2 {
                "still resents"
            } else {
                "recalls"
            };
            let source = match &record.relayed_by {
                Some(teller) => format!(" (heard from {teller})"),
                None => String::new(),
            };
            let tags = if record.tags.is_empty() {
                String::new()
            } else {
                format!(
                    " — {}",
                    record.tags.iter().cloned().collect::<Vec<_>>().join(", ")
                )
            };
            let _ = writeln!(
                out,
                "{} {mood} a {} event{tags}{source}.",
                record.subject, record.kind
            );
        }

        out.trim_end().to_string()
    }
}
