//! `diskdoc run` and `diskdoc chat`: drive the agent loop from the terminal.

use std::io::Write;

use anyhow::{Context, bail};
use diskdoc_agent::{AgentLoop, SkillSet};
use diskdoc_config::AppConfig;
use diskdoc_core::agent::LoopState;
use diskdoc_core::error::Error;
use diskdoc_core::tool::default_catalog;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::console::Console;
use crate::tools::{ApprovalGate, local_registry};

struct Session {
    agent: AgentLoop,
    executor: ApprovalGate<Console>,
    console: Console,
    cancel: CancellationToken,
}

impl Session {
    fn start(config: &AppConfig, skills: &[String]) -> anyhow::Result<Self> {
        if !config.has_api_key() {
            bail!(
                "No API key configured for '{}'. Set {} or add api_key to {}",
                config.llm_provider,
                key_variable(&config.llm_provider),
                AppConfig::config_dir().join("config.toml").display()
            );
        }

        let provider = diskdoc_providers::build_from_config(config)
            .context("Failed to configure the LLM provider")?;
        let mut agent = AgentLoop::with_config(provider, default_catalog(), &config.agent);
        for name in skills {
            agent.activate_skill(name).map_err(describe)?;
        }
        let console = Console::new();
        let executor = ApprovalGate::new(
            local_registry(),
            console.clone(),
            config.auto_approve_commands,
        );

        Ok(Self {
            agent,
            executor,
            console,
            cancel: cancel_on_ctrl_c(),
        })
    }

    /// Stream one task to stdout. Returns `Ok(false)` when cancelled.
    async fn task(&mut self, task: &str) -> anyhow::Result<bool> {
        let result = self
            .agent
            .stream_task(
                &self.cancel,
                task,
                &mut |chunk: &str| {
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                },
                &self.executor,
            )
            .await;
        println!();

        match result {
            Ok(outcome) => {
                if outcome.state == LoopState::Aborted {
                    eprintln!(
                        "  [stopped after {} rounds; the task may be incomplete]",
                        outcome.iterations
                    );
                }
                Ok(true)
            }
            Err(e) if e.is_cancelled() => {
                debug!("Task cancelled");
                eprintln!("  [cancelled]");
                Ok(false)
            }
            Err(e) => Err(describe(e)),
        }
    }
}

pub async fn run(config: &AppConfig, task: &str, skills: &[String]) -> anyhow::Result<()> {
    let mut session = Session::start(config, skills)?;
    session.task(task).await?;
    Ok(())
}

pub async fn chat(config: &AppConfig, skills: &[String]) -> anyhow::Result<()> {
    let mut session = Session::start(config, skills)?;
    info!(provider = %config.llm_provider, "Starting chat session");

    println!();
    println!("  diskdoc: describe a storage problem and press Enter.");
    println!("  Type 'exit' or press Ctrl+C to quit.");
    println!();

    loop {
        let line = tokio::select! {
            _ = session.cancel.cancelled() => break,
            line = session.console.read_line("  You > ") => line?,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        match session.task(input).await {
            Ok(true) => println!(),
            Ok(false) => break,
            Err(e) => eprintln!("  [Error] {e:#}\n"),
        }
    }

    println!();
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            token.cancel();
        }
    });
    cancel
}

fn key_variable(provider: &str) -> &'static str {
    match provider {
        "openai" => "OPENAI_API_KEY",
        _ => "ANTHROPIC_API_KEY",
    }
}

fn describe(error: Error) -> anyhow::Error {
    match error {
        Error::EmptyResponse => anyhow::anyhow!("The model returned an empty response. Try rephrasing the task."),
        Error::SkillNotFound(name) => {
            let known: Vec<_> = SkillSet::defaults()
                .skills()
                .iter()
                .map(|s| s.name.clone())
                .collect();
            anyhow::anyhow!("Unknown skill '{name}'. Available skills: {}", known.join(", "))
        }
        other => anyhow::Error::new(other).context("Task failed"),
    }
}
