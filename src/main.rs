//! FireWatch - 命令行入口
//!
//! 逐行读取标准输入，每行作为一轮用户输入提交给编排器。
//!
//! 用法: firewatch [--config <path>] [--session <id>]
//!
//! 命令：/history 查看日志，/resume 继续中断的回合，/new 新会话，/quit 退出。
//! Ctrl+C / SIGTERM 取消进行中的回合后退出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use firewatch::config::load_config;
use firewatch::core::{
    OrchestratorBuilder, OrchestratorError, ShutdownManager, ShutdownReason,
};
use firewatch::memory::{Entry, Role};
use firewatch::react::TurnEvent;

struct Args {
    config: Option<PathBuf>,
    session: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        config: None,
        session: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(it.next().context("--config needs a path")?.into()),
            "--session" => args.session = Some(it.next().context("--session needs an id")?),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    firewatch::observability::init();

    let args = parse_args()?;
    let config = load_config(args.config).context("Failed to load configuration")?;
    let app_name = config.app.name.clone();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let orchestrator = OrchestratorBuilder::new(config)
        .build()
        .context("Failed to build orchestrator")?
        .with_events(event_tx);
    tokio::spawn(print_events(event_rx));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let mut session_id = args.session.unwrap_or_else(|| orchestrator.new_session());
    let handle = orchestrator
        .start_or_resume_session(&session_id)
        .await
        .context("Failed to open session")?;
    println!("{app_name} | session {} ({} entries)", handle.session_id, handle.entries);
    if handle.has_interrupted_turn() {
        println!("Previous turn was interrupted; type /resume to continue it.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt().await;
        let line = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => {
                shutdown.shutdown(ShutdownReason::UserInitiated);
                break;
            }
            "/history" => {
                match orchestrator.history(&session_id).await {
                    Ok(entries) => print_history(&entries),
                    Err(e) => eprintln!("error: {e}"),
                }
                continue;
            }
            "/new" => {
                session_id = orchestrator.new_session();
                println!("session {session_id}");
                continue;
            }
            "/resume" => {
                let result = orchestrator
                    .resume_with_cancel(&session_id, shutdown.turn_token())
                    .await;
                report(result);
            }
            text => {
                let result = orchestrator
                    .submit_with_cancel(&session_id, text, shutdown.turn_token())
                    .await;
                report(result);
            }
        }

        if shutdown.is_shutdown() {
            break;
        }
    }

    if let Ok(entries) = orchestrator.history(&session_id).await {
        tracing::info!(session_id = %session_id, entries = entries.len(), "exiting");
    }
    Ok(())
}

async fn print_prompt() {
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(b"> ").await;
    let _ = stdout.flush().await;
}

fn report(result: Result<String, OrchestratorError>) {
    match result {
        Ok(answer) => println!("{answer}"),
        Err(e) if e.is_warning() => {
            if let Some(answer) = e.answer() {
                println!("{answer}");
            }
            eprintln!("warning: {e}");
        }
        Err(OrchestratorError::Cancelled) => eprintln!("turn cancelled"),
        Err(e) => eprintln!("error: {e}"),
    }
}

fn print_history(entries: &[Entry]) {
    for (i, entry) in entries.iter().enumerate() {
        let role = match entry.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool",
        };
        let mut line = format!("{i:>3} [{role}] {}", entry.content);
        for call in &entry.tool_calls {
            line.push_str(&format!(" -> {}({}) #{}", call.tool_name, call.arguments, call.call_id));
        }
        if entry.is_error {
            line.push_str(" (error)");
        }
        println!("{line}");
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<TurnEvent>) {
    while let Some(ev) = rx.recv().await {
        match ev {
            TurnEvent::ToolCall { tool, arguments, .. } => eprintln!("  -> {tool} {arguments}"),
            TurnEvent::ToolResult {
                tool,
                is_error,
                preview,
                ..
            } => {
                let mark = if is_error { "!" } else { "<-" };
                eprintln!("  {mark} {tool}: {preview}");
            }
            _ => {}
        }
    }
}
