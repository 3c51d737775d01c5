use crate::actors::orchestrator::{ChatTurn, Finish, OrchestratorActor};
use crate::actors::store::{LoadContext, StoreActor};
use crate::slots::context::SessionContext;
use actix::Addr;
use anyhow::{Context, Result};
use colored::*;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

const HELP: &str = "Команды: /context, /finish [заголовок], /quit";

/// A terminal command typed in place of a chat message.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Context,
    Finish(Option<&'a str>),
    Quit,
    Help,
    Say(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    match head {
        "/context" => Command::Context,
        "/finish" => Command::Finish(Some(rest).filter(|r| !r.is_empty())),
        "/quit" | "/exit" => Command::Quit,
        "/help" => Command::Help,
        _ => Command::Say(line),
    }
}

/// Runs one conversation over stdin/stdout through the same pipeline the
/// HTTP service uses.
pub async fn run_interview(
    orchestrator: Addr<OrchestratorActor>,
    store: Addr<StoreActor>,
    session_id: Option<String>,
) -> Result<()> {
    let mut stdout = io::stdout();
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut session_id = session_id;

    stdout.write_all(format!("{}\n", HELP).dimmed().to_string().as_bytes()).await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = match parse_command(&line) {
            Command::Quit => break,
            Command::Help => HELP.to_string(),
            Command::Context => match session_id.clone() {
                Some(id) => {
                    let encoded = store.send(LoadContext(id)).await??;
                    let context = SessionContext::from_json(encoded.as_deref());
                    serde_json::to_string_pretty(context.slots()).context("Cannot print slots")?
                }
                None => "Диалог ещё не начат.".yellow().to_string(),
            },
            Command::Finish(title) => {
                let outcome = orchestrator
                    .send(Finish {
                        session_id: session_id.clone(),
                        title: title.map(str::to_string),
                    })
                    .await??;
                let url = outcome
                    .document
                    .confluence_url
                    .map(|url| format!("\n{}", url.underline()))
                    .unwrap_or_default();
                format!("{}{}", outcome.document.content_markdown, url)
            }
            Command::Say(message) => {
                let outcome = orchestrator
                    .send(ChatTurn {
                        session_id: session_id.clone(),
                        message: message.to_string(),
                    })
                    .await??;
                session_id = Some(outcome.session_id);
                let marker = if outcome.ready { " [готово к /finish]".green().to_string() } else { String::new() };
                format!("{}{}", outcome.reply.bold(), marker)
            }
        };
        stdout.write_all(format!("{}\n", output).as_bytes()).await?;
    }

    if let Some(id) = session_id {
        log::info!("Interview {} closed", id);
    }
    Ok(())
}
