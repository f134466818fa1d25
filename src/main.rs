use anyhow::Result;
use clap::Parser;
use ralph::agent::ProcessAgentRunner;
use ralph::batcher::{Batcher, Epic, Sequential, Targeted, Wave};
use ralph::cli::Cli;
use ralph::observer::{FanOut, LoggingObserver, ProgressObserver};
use ralph::prompt::PromptBuilder;
use ralph::runner::Runner;
use ralph::trace::TracingObserver;
use ralph::tracker::CliTrackerClient;
use ralph::worktree::WorktreeManager;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ralph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.to_run_config();
    config.validate()?;

    let tracker = Arc::new(CliTrackerClient::new(
        config.tracker_command.clone(),
        config.repo_path.clone(),
    ));
    let worktrees = Arc::new(WorktreeManager::new(&config.repo_path, &config.mainline)?);
    let agent = Arc::new(ProcessAgentRunner::new(config.agent_command.clone()));
    let prompts = Arc::new(PromptBuilder::new()?);
    let observer: Arc<dyn ProgressObserver> = Arc::new(FanOut::new(vec![
        Box::new(LoggingObserver),
        Box::new(TracingObserver::new()),
    ]));

    let runner = Runner::new(config.clone(), tracker, worktrees, agent, prompts, observer);

    let mut batcher: Box<dyn Batcher> = if let Some(bead) = &cli.bead {
        Box::new(Targeted::new(bead.clone()))
    } else if let Some(epic) = &cli.epic {
        Box::new(Epic::new(epic.clone()))
    } else if cli.wave {
        Box::new(Wave::new())
    } else {
        Box::new(Sequential::new())
    };

    let cancellation = CancellationToken::new();
    let ctrlc_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_token.cancel();
        }
    });

    let summary = runner.run(batcher.as_mut(), cancellation).await?;

    println!(
        "iterations={} succeeded={} questions={} failed={} timed_out={} skipped={} stop_reason={}",
        summary.iterations,
        summary.succeeded,
        summary.questions,
        summary.failed,
        summary.timed_out,
        summary.skipped,
        summary.stop_reason
    );

    std::process::exit(summary.stop_reason.exit_code());
}
