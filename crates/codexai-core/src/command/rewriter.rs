use super::{Command, CommandMatch, Effect, ExecutionOutcome, ExecutionStatus};

/// The short status line that replaces a command block in the shown reply.
pub fn annotation(outcome: &ExecutionOutcome) -> String {
    match (&outcome.command, &outcome.status) {
        (Command::FileWrite { path, .. }, ExecutionStatus::Success(Effect::FileUpdated { .. })) => {
            format!("(System: File '{}' updated successfully.)", path)
        }
        (Command::FileWrite { path, .. }, ExecutionStatus::Success(_)) => {
            format!("(System: File '{}' created successfully.)", path)
        }
        (Command::FileWrite { path, .. }, ExecutionStatus::Failure(reason)) => {
            format!("(System: Error creating file '{}': {})", path, reason)
        }
        (Command::RunProject { command }, ExecutionStatus::Success(_)) => {
            format!("(System: Now attempting to run project with command: {})", command)
        }
        (Command::RunProject { command }, ExecutionStatus::Failure(reason)) => {
            format!("(System: Could not run project with command '{}': {})", command, reason)
        }
    }
}

/// Replace each match's span in `text` with its outcome's annotation.
///
/// `matches` and `outcomes` are parallel and in source order. A match whose
/// span no longer covers its recorded source text is left as is, as is any
/// match without an outcome. Text outside the spans is copied unchanged.
pub fn rewrite(text: &str, matches: &[CommandMatch], outcomes: &[ExecutionOutcome]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for (found, outcome) in matches.iter().zip(outcomes) {
        let span = found.span.clone();
        if span.start < cursor || text.get(span.clone()) != Some(found.source.as_str()) {
            tracing::warn!(?span, "command span does not match the reply text, leaving it");
            continue;
        }
        out.push_str(&text[cursor..span.start]);
        out.push_str(&annotation(outcome));
        cursor = span.end;
    }

    out.push_str(&text[cursor..]);
    out
}
