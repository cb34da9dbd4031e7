use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use emcee::circumstance::dial::DialRoom;
use emcee::circumstance::phrase_gate::PhraseGate;
use emcee::circumstance::{Circumstance, SceneObserver, SceneProgress};
use emcee::config::OrchestratorConfig;
use emcee::engine::{CompletionEngine, EngineSettings, InteractionMode};
use emcee::events::{EventSinkObserver, OrchestratorEvent};
use emcee::llm::HttpCompletionApi;
use emcee::log::ConversationLog;
use emcee::producers::StdinLineProducer;
use emcee::prompts::load_prompt;
use emcee::scheduler::Scheduler;
use emcee::tasks::{DueTaskProducer, TaskBoard};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,emcee=debug".into()),
        )
        .init();

    let config = OrchestratorConfig::load();

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: OrchestratorConfig) -> Result<()> {
    let data_dir = PathBuf::from(&config.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {:?}", data_dir))?;
    let prompts_dir = PathBuf::from(&config.prompts_dir);

    let board = TaskBoard::load_or_default(data_dir.join("tasks.txt"))?;

    let briefing = PhraseGate::new(
        "briefing",
        load_prompt(&prompts_dir, "briefing"),
        &config.briefing_exit_phrase,
        1,
    )?
    .with_tools(board.tool_set());
    let dial_room = DialRoom::load_or_default(
        load_prompt(&prompts_dir, "dial_room"),
        load_prompt(&prompts_dir, "dial_room_game_over"),
        data_dir.join("dial_room.txt"),
    )?;
    let finale = PhraseGate::new(
        "finale",
        load_prompt(&prompts_dir, "finale"),
        &config.finale_exit_phrase,
        1,
    )?
    .with_tools(board.tool_set());

    let scenes: Vec<Arc<dyn Circumstance>> = vec![Arc::new(briefing), dial_room, Arc::new(finale)];
    let progress = SceneProgress::load_or_default(data_dir.join("tracks.txt"), scenes)?;
    info!("Current scene: {}", progress.current().name());

    let log = ConversationLog::load_or_default(
        data_dir.join("conversation.json"),
        config.retention_window,
        progress.pinned_message(),
    )?;

    let (event_tx, event_rx) = flume::unbounded();

    let api = Arc::new(HttpCompletionApi::new(
        config.llm_api_url.clone(),
        config.llm_api_key.clone(),
    ));
    let mode = InteractionMode::from_config(&config.interaction_mode)?;
    let engine = CompletionEngine::new(
        api,
        log.clone(),
        progress.clone(),
        mode,
        &config.wake_phrase,
        EngineSettings {
            model: config.llm_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_attempts: config.max_request_attempts,
            max_chain_depth: config.max_chain_depth,
        },
        event_tx.clone(),
    )?;

    // Observer order matters: the scene may advance (and swap the pinned
    // persona) before the engine decides whether to fire a request.
    log.register_observer(SceneObserver::new(progress.clone(), log.clone()))
        .await;
    log.register_observer(engine.clone()).await;
    log.register_observer(EventSinkObserver::new(event_tx)).await;

    let mut scheduler = Scheduler::new(
        log.clone(),
        Duration::from_millis(config.tick_floor_ms),
        Duration::from_millis(config.error_cooldown_ms),
    );
    scheduler.register_producer(StdinLineProducer::spawn());
    scheduler.register_producer(engine.clone());
    scheduler.register_producer(DueTaskProducer::new(board));

    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            match event {
                OrchestratorEvent::AssistantSaid(text) => info!("assistant: {}", text),
                OrchestratorEvent::ToolResolved { name, output } => {
                    info!("tool {} -> {}", name, output)
                }
                OrchestratorEvent::ServiceDegraded(reason) => {
                    warn!("completion service degraded: {}", reason)
                }
            }
        }
    });

    scheduler.run().await;
    Ok(())
}
