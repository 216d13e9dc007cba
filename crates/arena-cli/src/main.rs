mod cli;
mod template_file;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use arena::{
    ChatCompletionsClient, DebateTemplate, EngineConfig, Final, PhaseResult, Run, RunMode,
    RunRequest, RunStatus, RunStore,
};
use clap::Parser;
use cli::{Cli, Command};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Validate { template } => {
            let draft = template_file::load_template(&template)?;
            let template = DebateTemplate::from_draft(draft)?;
            print_plan(&template, cli.json)?;
            Ok(())
        }
        Command::Probe => {
            let client = ChatCompletionsClient::new(&config)?;
            match client.probe().await {
                Ok(status) => {
                    info!(url = %config.base_url, status, "endpoint reachable");
                    Ok(())
                }
                Err(e) => bail!("endpoint {} unreachable: {}", config.base_url, e.reason),
            }
        }
        Command::Run {
            template,
            mode,
            topic,
            rounds,
            timeout_secs,
        } => {
            let draft = template_file::load_template(&template)?;
            let client = Arc::new(ChatCompletionsClient::new(&config)?);
            if let Err(e) = client.probe().await {
                warn!(url = %config.base_url, reason = %e.reason, "endpoint probe failed, continuing");
            }

            let store = RunStore::new(client, config)?.shared();
            let template = store.create_template(draft)?;

            let mut request = RunRequest::new(&template.id, mode);
            request.topic = topic;
            request.rounds = rounds;
            let run_id = store.create_run(request)?;
            info!(run_id = %run_id, mode = %mode, "debate started");

            let deadline = Duration::from_secs(timeout_secs);
            let run = match mode {
                RunMode::Auto => follow_auto(&store, &run_id, deadline, cli.json).await?,
                RunMode::Step => drive_step(&store, &run_id, cli.json).await?,
            };

            if let Some(final_record) = &run.final_record {
                print_final(final_record, cli.json)?;
            }
            if run.status == RunStatus::Failed {
                bail!(
                    "run {} failed: {}",
                    run.id,
                    run.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::from_env().context("reading ARENA_* environment")?,
    };
    config.validate()?;
    Ok(config)
}

/// Poll the run and print phases as they land until it is terminal.
async fn follow_auto(store: &RunStore, run_id: &str, deadline: Duration, json: bool) -> Result<Run> {
    let started = Instant::now();
    let mut printed = 0;
    loop {
        let run = store.get_run(run_id)?;
        for phase in &run.transcript[printed..] {
            print_phase(&run, phase, json)?;
        }
        printed = run.transcript.len();

        if run.is_terminal() {
            return Ok(run);
        }
        if started.elapsed() > deadline {
            store.cancel_run(run_id)?;
            bail!("run {} did not finish within {:?}", run_id, deadline);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Advance once per line read from stdin.
async fn drive_step(store: &RunStore, run_id: &str, json: bool) -> Result<Run> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let run = store.get_run(run_id)?;
        if run.is_terminal() {
            return Ok(run);
        }

        eprintln!(
            "{} - press Enter for phase {}/{}",
            run.status_line(),
            run.phase_index + 1,
            run.total_phases
        );
        if lines.next_line().await?.is_none() {
            let run = store.cancel_run(run_id)?;
            warn!(run_id, "stdin closed, run cancelled");
            return Ok(run);
        }

        let run = store.advance(run_id).await?;
        if let Some(phase) = run.transcript.last() {
            print_phase(&run, phase, json)?;
        }
    }
}

fn print_plan(template: &DebateTemplate, json: bool) -> Result<()> {
    let plan = template.phase_plan(template.rounds);
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    println!(
        "{}: {} participant(s), {} round(s), {} phase(s)",
        template.name,
        template.participants.len(),
        template.rounds,
        plan.len()
    );
    for phase in plan {
        println!(
            "  {:>3}. round {} / {} ({})",
            phase.index + 1,
            phase.round,
            phase.spec.id,
            phase.spec.kind
        );
    }
    Ok(())
}

fn print_phase(run: &Run, phase: &PhaseResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(phase)?);
        return Ok(());
    }
    println!(
        "\n== Round {} / {} ({}) ==",
        phase.round, phase.phase_id, phase.kind
    );
    for entry in &phase.turns {
        println!("[{}] {}", entry.participant_id, entry.turn.render());
    }
    if let Some(tally) = &phase.tally {
        println!("Votes: {}", tally.summary_line());
    }
    if let Some(summary) = &phase.moderator_summary {
        println!("Moderator: {}", summary.render());
    }
    debug!(run_id = %run.id, phase_index = phase.phase_index, "phase printed");
    Ok(())
}

fn print_final(final_record: &Final, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(final_record)?);
        return Ok(());
    }
    println!("\n== Verdict: {} ==", final_record.title);
    println!("{}", final_record.verdict);
    if let Some(outcome) = final_record.outcome {
        println!("Vote outcome: {}", outcome);
    }
    Ok(())
}
