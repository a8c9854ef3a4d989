use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};

use codexai_core::{RunState, Session, TreeNode};

use crate::print_messages;

const DEFAULT_RUN_COMMAND: &str = "npm run dev";

const HELP: &str = "\
Type a message to talk to the assistant, or use a command:
  /open PATH             navigate to PATH and show it if it is a file
  /ls [PATH]             list a directory (default: current path)
  /commit PATH MESSAGE   commit ./PATH from disk over the opened file
  /run [COMMAND]         start the project (default: npm run dev)
  /stop                  stop the running project
  /log                   show the run log
  /scan                  ask for an overview of the repository
  /download [DIR]        save the repository archive (default: .)
  /refresh               reload the file tree
  /help                  show this help
  /quit                  leave";

#[derive(Debug, PartialEq, Eq)]
enum Action {
    Prompt(String),
    Open(String),
    List(Option<String>),
    Commit { path: String, message: String },
    Run(String),
    Stop,
    Log,
    Scan,
    Download(PathBuf),
    Refresh,
    Help,
    Quit,
}

fn parse_line(line: &str) -> Result<Action, String> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Action::Prompt(line.to_string()));
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let optional = || (!rest.is_empty()).then(|| rest.to_string());

    match name {
        "open" if !rest.is_empty() => Ok(Action::Open(rest.to_string())),
        "open" => Err("usage: /open PATH".to_string()),
        "ls" => Ok(Action::List(optional())),
        "commit" => match rest.split_once(char::is_whitespace) {
            Some((path, message)) if !message.trim().is_empty() => Ok(Action::Commit {
                path: path.to_string(),
                message: message.trim().to_string(),
            }),
            _ => Err("usage: /commit PATH MESSAGE".to_string()),
        },
        "run" => Ok(Action::Run(optional().unwrap_or_else(|| DEFAULT_RUN_COMMAND.to_string()))),
        "stop" => Ok(Action::Stop),
        "log" => Ok(Action::Log),
        "scan" => Ok(Action::Scan),
        "download" => Ok(Action::Download(PathBuf::from(optional().unwrap_or_else(|| ".".to_string())))),
        "refresh" => Ok(Action::Refresh),
        "help" => Ok(Action::Help),
        "quit" | "exit" => Ok(Action::Quit),
        other => Err(format!("unknown command /{}, try /help", other)),
    }
}

pub async fn run(session: &Session) -> Result<()> {
    if let Some(repo) = session.connection() {
        println!("\n{} {}", "📂 Connected to".bold(), repo.full_name().bold().cyan());
    }
    println!("{}\n", HELP.dimmed());

    print_messages(&session.messages());
    let mut seen = session.message_count();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", prompt_label(session).bold().blue());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let action = match parse_line(&line) {
            Ok(action) => action,
            Err(usage) => {
                println!("{}", usage.red());
                continue;
            }
        };
        if action == Action::Quit {
            break;
        }
        perform(session, action).await;

        print_messages(&session.messages_since(seen));
        seen = session.message_count();
    }

    if session.run_state().is_active() {
        session.stop_project();
    }
    println!("{}", "Goodbye!".dimmed());
    Ok(())
}

fn prompt_label(session: &Session) -> String {
    let path = session.current_path();
    let location = if path.is_empty() { "/".to_string() } else { path };
    match session.run_state() {
        RunState::Running { .. } => format!("[{} ▶]>", location),
        RunState::Starting { .. } => format!("[{} …]>", location),
        _ => format!("[{}]>", location),
    }
}

async fn perform(session: &Session, action: Action) {
    match action {
        Action::Prompt(prompt) => {
            println!("{}", "🤔 Thinking...".dimmed());
            session.submit_prompt(&prompt).await;
        }
        Action::Open(path) => {
            // Failures are already recorded as System messages.
            if let Ok(Some(file)) = session.open_path(&path).await {
                println!("{}", format!("── {} ──", file.path).bold().green());
                println!("{}", file.content);
            }
        }
        Action::List(path) => {
            let path = path.unwrap_or_else(|| session.current_path());
            match session.list_directory(&path) {
                Some(children) => print_listing(&children),
                None => println!("{}", format!("{} is not a directory", path).red()),
            }
        }
        Action::Commit { path, message } => match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let _ = session.commit_file(&path, &content, &message).await;
            }
            Err(error) => println!("{}", format!("Could not read ./{}: {}", path, error).red()),
        },
        Action::Run(command) => {
            let _ = session.start_project(&command);
        }
        Action::Stop => session.stop_project(),
        Action::Log => {
            for line in session.run_log() {
                println!("{}", line.dimmed());
            }
            if let Some(preview) = session.run_state().preview() {
                println!("{} {}", "Preview:".bold(), preview.url.cyan());
            }
        }
        Action::Scan => {
            println!("{}", "🔍 Scanning repository...".dimmed());
            session.scan_repository().await;
        }
        Action::Download(dir) => {
            match session.download_archive(&dir).await {
                Ok(Some(path)) => println!("{} {}", "Saved".green(), path.display()),
                Ok(None) => println!("{}", "A download is already in progress".yellow()),
                Err(error) if !session.is_connected() => println!("{}", error.to_string().red()),
                Err(_) => {}
            }
        }
        Action::Refresh => {
            if let Err(error) = session.refresh_tree().await {
                if !session.is_connected() {
                    println!("{}", error.to_string().red());
                }
            }
        }
        Action::Help => println!("{}", HELP),
        Action::Quit => {}
    }
}

fn print_listing(children: &[TreeNode]) {
    if children.is_empty() {
        println!("{}", "(empty)".dimmed());
        return;
    }
    for child in children {
        if child.is_directory() {
            println!("  {}", format!("{}/", child.name()).bold().blue());
        } else {
            println!("  {}", child.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_prompt() {
        assert_eq!(
            parse_line("  add a README  "),
            Ok(Action::Prompt("add a README".to_string()))
        );
    }

    #[test]
    fn test_run_defaults_command() {
        assert_eq!(parse_line("/run"), Ok(Action::Run("npm run dev".to_string())));
        assert_eq!(parse_line("/run npm start"), Ok(Action::Run("npm start".to_string())));
    }

    #[test]
    fn test_commit_needs_path_and_message() {
        assert_eq!(
            parse_line("/commit src/app.js Fix the header"),
            Ok(Action::Commit {
                path: "src/app.js".to_string(),
                message: "Fix the header".to_string(),
            })
        );
        assert!(parse_line("/commit src/app.js").is_err());
    }

    #[test]
    fn test_optional_arguments() {
        assert_eq!(parse_line("/ls"), Ok(Action::List(None)));
        assert_eq!(parse_line("/ls src"), Ok(Action::List(Some("src".to_string()))));
        assert_eq!(parse_line("/download"), Ok(Action::Download(PathBuf::from("."))));
        assert!(parse_line("/open").is_err());
        assert!(parse_line("/frobnicate").is_err());
    }
}
