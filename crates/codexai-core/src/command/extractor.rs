//! Scanner for the two command-block grammars.
//!
//! ~~~text
//! ```create-file            ```run-project
//! path: <relative/path>     command: <shell invocation>
//! commit: <message>         ```
//! ---
//! <raw file body>
//! ```
//! ~~~
//!
//! Opening fences are located with a regular expression; everything after
//! the fence is parsed line by line so that a near miss can say exactly
//! which part of the grammar it broke.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::{Command, CommandKind, CommandMatch};

const FENCE: &str = "```";

static FENCE_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(create-file|run-project)[ \t]*\r?\n").expect("fence pattern is valid")
});

/// Why a block that opened with a recognized fence tag was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("expected a `path:` line after the opening fence")]
    MissingPath,
    #[error("the `path:` line is empty")]
    EmptyPath,
    #[error("path '{0}' is not repository-relative")]
    UnsafePath(String),
    #[error("expected a `commit:` line after the path")]
    MissingCommitLine,
    #[error("expected a `---` separator line after the commit message")]
    MissingSeparator,
    #[error("the file body is empty")]
    EmptyBody,
    #[error("expected a `command:` line after the opening fence")]
    MissingCommandLine,
    #[error("the `command:` line is empty")]
    EmptyCommand,
    #[error("expected a closing fence right after the command line")]
    MissingClosingFence,
    #[error("the block is never closed with a fence")]
    Unterminated,
}

/// A recognized opening fence whose block did not satisfy its grammar.
///
/// `span` covers only the opening fence line; the text itself is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedBlock {
    pub kind: CommandKind,
    pub span: Range<usize>,
    pub reason: MalformedReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Accepted commands in source order.
    pub matches: Vec<CommandMatch>,
    /// Near misses in source order.
    pub malformed: Vec<MalformedBlock>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty() && self.malformed.is_empty()
    }
}

/// Scan `text` for command blocks of either grammar in a single pass.
pub fn extract(text: &str) -> Extraction {
    let mut extraction = Extraction::default();
    let mut cursor = 0;

    while cursor < text.len() {
        let Some(open) = FENCE_OPEN.captures(&text[cursor..]) else {
            break;
        };
        let (Some(fence), Some(tag)) = (open.get(0), open.get(1)) else {
            break;
        };
        let Some(kind) = CommandKind::from_fence_tag(tag.as_str()) else {
            break;
        };

        let start = cursor + fence.start();
        let header_end = cursor + fence.end();
        let parsed = match kind {
            CommandKind::FileWrite => parse_file_write(text, header_end),
            CommandKind::RunProject => parse_run_project(text, header_end),
        };

        match parsed {
            Ok((command, end)) => {
                extraction.matches.push(CommandMatch {
                    command,
                    span: start..end,
                    source: text[start..end].to_string(),
                });
                cursor = end;
            }
            Err(reason) => {
                extraction.malformed.push(MalformedBlock {
                    kind,
                    span: start..header_end,
                    reason,
                });
                cursor = header_end;
            }
        }
    }

    extraction
}

fn parse_file_write(text: &str, pos: usize) -> Result<(Command, usize), MalformedReason> {
    let (line, pos) = next_line(text, pos).ok_or(MalformedReason::MissingPath)?;
    let path = line
        .strip_prefix("path:")
        .ok_or(MalformedReason::MissingPath)?
        .trim();
    if path.is_empty() {
        return Err(MalformedReason::EmptyPath);
    }
    if !is_repo_relative(path) {
        return Err(MalformedReason::UnsafePath(path.to_string()));
    }

    let (line, pos) = next_line(text, pos).ok_or(MalformedReason::MissingCommitLine)?;
    let commit_message = line
        .strip_prefix("commit:")
        .ok_or(MalformedReason::MissingCommitLine)?
        .trim();

    let (line, pos) = next_line(text, pos).ok_or(MalformedReason::MissingSeparator)?;
    if line.trim_end() != "---" {
        return Err(MalformedReason::MissingSeparator);
    }

    let close = text[pos..]
        .find(FENCE)
        .map(|offset| pos + offset)
        .ok_or(MalformedReason::Unterminated)?;
    let content = strip_leading_blank_lines(text[pos..close].trim_end());
    if content.is_empty() {
        return Err(MalformedReason::EmptyBody);
    }

    let command = Command::FileWrite {
        path: path.to_string(),
        commit_message: commit_message.to_string(),
        content: content.to_string(),
    };
    Ok((command, close + FENCE.len()))
}

fn parse_run_project(text: &str, pos: usize) -> Result<(Command, usize), MalformedReason> {
    let (line, pos) = next_line(text, pos).ok_or(MalformedReason::MissingCommandLine)?;
    let command = line
        .strip_prefix("command:")
        .ok_or(MalformedReason::MissingCommandLine)?
        .trim();
    if command.is_empty() {
        return Err(MalformedReason::EmptyCommand);
    }

    let rest = &text[pos..];
    let indent = rest.len() - rest.trim_start_matches([' ', '\t']).len();
    if !rest[indent..].starts_with(FENCE) {
        return Err(MalformedReason::MissingClosingFence);
    }

    let command = Command::RunProject {
        command: command.to_string(),
    };
    Ok((command, pos + indent + FENCE.len()))
}

/// The newline-terminated line starting at `pos`, without its line ending,
/// and the offset just past it.
fn next_line(text: &str, pos: usize) -> Option<(&str, usize)> {
    let rest = text.get(pos..)?;
    let newline = rest.find('\n')?;
    let line = rest[..newline].trim_end_matches('\r');
    Some((line, pos + newline + 1))
}

fn strip_leading_blank_lines(mut body: &str) -> &str {
    while let Some(newline) = body.find('\n') {
        if !body[..newline].trim().is_empty() {
            break;
        }
        body = &body[newline + 1..];
    }
    if body.trim().is_empty() {
        ""
    } else {
        body
    }
}

fn is_repo_relative(path: &str) -> bool {
    !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
