use std::sync::Arc;

use anyhow::{Context, Result};
use page_agent::{AgentSupervisor, ChromeInjector, ChromeSession, HostBridge, NetworkMonitor};
use prompt_gen::{GenerateRequest, MediaKind, OllamaGenerator, PromptGenerator};
use prompt_queue::{
    recount, AgentSubmitter, BroadcastSink, PromptItem, PromptStore, QueueEvent,
    QueueOrchestrator, SqliteStore,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::settings::RunnerConfig;

pub fn media_kind(video: bool) -> MediaKind {
    if video {
        MediaKind::Video
    } else {
        MediaKind::Image
    }
}

fn open_store(config: &RunnerConfig) -> Result<SqliteStore> {
    SqliteStore::open(Some(config.db_path.as_path()))
        .with_context(|| format!("Failed to open {}", config.db_path.display()))
}

pub async fn add(config: &RunnerConfig, texts: Vec<String>, video: bool) -> Result<()> {
    let store = open_store(config)?;
    let kind = media_kind(video);
    let items: Vec<PromptItem> = texts
        .into_iter()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .map(|text| PromptItem::new(text).with_media_kind(kind))
        .collect();
    if items.is_empty() {
        anyhow::bail!("No non-empty prompts given");
    }

    for item in &items {
        println!("{}  {}", item.id, item.text);
    }
    let count = items.len();
    store.append_items(items).await?;
    println!("Added {} prompt(s)", count);
    Ok(())
}

pub async fn list(config: &RunnerConfig) -> Result<()> {
    let store = open_store(config)?;
    let items = store.items().await?;
    for item in &items {
        let detail = item.error.as_deref().unwrap_or("");
        println!(
            "{:<10} {:<5} {}  {} {}",
            item.status.as_str(),
            item.media_kind.as_str(),
            item.id,
            item.text,
            detail
        );
    }

    let counts = recount(&items);
    let state = store.queue_state().await?;
    println!(
        "total {}  pending {}  processing {}  completed {}  failed {}  editing {}",
        counts.total,
        counts.pending,
        counts.processing,
        counts.completed,
        counts.failed,
        counts.editing
    );
    if let Some(error) = state.last_error {
        println!("last error: {}", error);
    }
    Ok(())
}

pub async fn recover(config: &RunnerConfig) -> Result<()> {
    let store = open_store(config)?;
    let requeued = prompt_queue::recover_interrupted(&store).await?;
    println!("Requeued {} interrupted prompt(s)", requeued);
    Ok(())
}

pub async fn generate(
    config: &RunnerConfig,
    context: String,
    count: usize,
    video: bool,
    enhanced: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let generator = OllamaGenerator::new(config.generator.clone())?;
    let kind = media_kind(video);
    let request = GenerateRequest::new(context, count)
        .with_media_kind(kind)
        .with_enhanced(enhanced);

    let prompts = generator
        .generate(&request)
        .await
        .context("Prompt generation failed")?;
    let items: Vec<PromptItem> = prompts
        .into_iter()
        .map(|text| PromptItem::new(text).with_media_kind(kind))
        .collect();
    for item in &items {
        println!("{}", item.text);
    }
    let added = items.len();
    store.append_items(items).await?;
    println!("Added {} generated prompt(s)", added);
    Ok(())
}

/// Wire browser, agent, host bridge and queue together and process until
/// the queue stops or Ctrl-C.
pub async fn run(config: &RunnerConfig) -> Result<()> {
    let store = Arc::new(open_store(config)?);

    let session = ChromeSession::open(&config.chrome)
        .await
        .context("Failed to open the target tab")?;
    let page_id = session.page_id().to_string();
    info!(page_id = %page_id, "Target tab ready");

    let selectors = Arc::new(config.selectors.clone());
    let monitor = NetworkMonitor::new(config.monitor_config());
    let (host_tx, host_rx) = mpsc::channel(32);

    let injector = Arc::new(ChromeInjector::new(
        session.page().clone(),
        host_tx,
        Arc::clone(&selectors),
        config.agent_timings(),
    ));
    let supervisor = Arc::new(AgentSupervisor::new(injector, config.supervisor_config()));

    let events = BroadcastSink::default();
    let mut updates = events.subscribe();

    let mut orchestrator = QueueOrchestrator::new(
        config.queue_config(),
        store.clone(),
        Arc::new(AgentSubmitter::new(Arc::clone(&supervisor), page_id.clone())),
    )
    .with_events(Arc::new(events));
    if config.auto_generate.is_some() {
        orchestrator =
            orchestrator.with_generator(Arc::new(OllamaGenerator::new(config.generator.clone())?));
    }
    let queue = orchestrator.spawn().await?;

    let bridge = HostBridge::new(monitor.clone(), Arc::clone(&supervisor), Arc::new(queue.clone()))
        .spawn(host_rx);
    let watcher = session.watch_network(monitor, selectors).await?;

    supervisor
        .ensure_ready(&page_id)
        .await
        .context("Page agent did not come up")?;
    queue.start().await.into_result()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping queue");
                if let Err(e) = queue.stop().await.into_result() {
                    warn!(error = %e, "Stop failed");
                }
                break;
            }
            event = updates.recv() => match event {
                Ok(QueueEvent::StateChanged(changed)) if !changed.state.is_running => {
                    if let Some(error) = &changed.state.last_error {
                        warn!(error = %error, "Queue halted");
                    }
                    break;
                }
                Ok(QueueEvent::ItemCompleted(done)) => {
                    info!(item_id = %done.item_id, duration_ms = ?done.duration_ms, "Prompt done");
                }
                Ok(QueueEvent::ItemFailed(failed)) => {
                    warn!(item_id = %failed.item_id, error = %failed.error, "Prompt failed");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    watcher.abort();
    bridge.abort();
    session.close().await;

    let state = store.queue_state().await?;
    println!(
        "Processed {} of {} prompt(s)",
        state.processed_count, state.total_count
    );
    if let Some(error) = state.last_error {
        println!("Stopped: {}", error);
    }
    Ok(())
}
