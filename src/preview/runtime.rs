use std::time::Instant as StdInstant;

use reqwest::Url;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::dom::NodeId;
use crate::fetch::{ContentFetcher, FetchError, PageContent};
use crate::layout::Viewport;

use super::popup::PopupId;
use super::{PreviewEvent, PreviewManager};

#[derive(Debug, Clone)]
pub struct PreviewHandle {
    command_tx: UnboundedSender<PreviewCommand>,
}

impl PreviewHandle {
    pub fn link_entered(&self, link: NodeId) {
        let _ = self.command_tx.send(PreviewCommand::LinkEntered(link));
    }

    pub fn link_left(&self, link: NodeId, related: Option<NodeId>) {
        let _ = self
            .command_tx
            .send(PreviewCommand::LinkLeft { link, related });
    }

    pub fn pointer_moved(&self, target: Option<NodeId>) {
        let _ = self.command_tx.send(PreviewCommand::PointerMoved(target));
    }

    pub fn link_activated(&self, link: NodeId) {
        let _ = self.command_tx.send(PreviewCommand::LinkActivated(link));
    }

    pub fn viewport_resized(&self, viewport: Viewport) {
        let _ = self
            .command_tx
            .send(PreviewCommand::ViewportResized(viewport));
    }

    pub fn content_inserted(&self, root: NodeId) {
        let _ = self.command_tx.send(PreviewCommand::ContentInserted(root));
    }

    pub fn page_unloaded(&self) {
        let _ = self.command_tx.send(PreviewCommand::PageUnloaded);
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(PreviewCommand::Shutdown);
    }
}

#[derive(Debug)]
enum PreviewCommand {
    LinkEntered(NodeId),
    LinkLeft {
        link: NodeId,
        related: Option<NodeId>,
    },
    PointerMoved(Option<NodeId>),
    LinkActivated(NodeId),
    ViewportResized(Viewport),
    ContentInserted(NodeId),
    PageUnloaded,
    Shutdown,
}

#[derive(Debug)]
struct LoadedContent {
    popup: PopupId,
    url: Url,
    result: Result<PageContent, FetchError>,
}

/// Runs `manager` on `handle`: commands drive it, its timers fire on the
/// tokio clock and requested pages are fetched concurrently.
pub fn spawn_preview_worker(
    handle: &Handle,
    manager: PreviewManager,
    fetcher: ContentFetcher,
) -> (PreviewHandle, UnboundedReceiver<PreviewEvent>) {
    let (command_tx, command_rx) = unbounded_channel();
    let (event_tx, event_rx) = unbounded_channel();
    let preview_handle = PreviewHandle { command_tx };

    let _task = handle.spawn(run_preview_loop(manager, fetcher, command_rx, event_tx));

    (preview_handle, event_rx)
}

async fn run_preview_loop(
    mut manager: PreviewManager,
    fetcher: ContentFetcher,
    mut command_rx: UnboundedReceiver<PreviewCommand>,
    event_tx: UnboundedSender<PreviewEvent>,
) {
    let (loaded_tx, mut loaded_rx) = unbounded_channel::<LoadedContent>();

    loop {
        let deadline = manager.next_deadline().map(Instant::from_std);
        let timer = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            maybe_command = command_rx.recv() => {
                match maybe_command {
                    Some(PreviewCommand::Shutdown) | None => break,
                    Some(command) => apply_command(&mut manager, command),
                }
            }
            Some(loaded) = loaded_rx.recv() => {
                manager.content_loaded(loaded.popup, &loaded.url, loaded.result, StdInstant::now());
            }
            _ = timer => {}
        }

        manager.advance(StdInstant::now());

        let mut receiver_gone = false;
        for event in manager.drain_events() {
            if let PreviewEvent::FetchRequested { popup, url } = &event {
                spawn_fetch(fetcher.clone(), *popup, url.clone(), loaded_tx.clone());
            }
            if event_tx.send(event).is_err() {
                receiver_gone = true;
            }
        }
        if receiver_gone {
            debug!("preview event receiver dropped; stopping worker");
            break;
        }
    }

    manager.page_unloaded();
}

fn apply_command(manager: &mut PreviewManager, command: PreviewCommand) {
    let now = StdInstant::now();
    match command {
        PreviewCommand::LinkEntered(link) => manager.link_entered(link, now),
        PreviewCommand::LinkLeft { link, related } => manager.link_left(link, related, now),
        PreviewCommand::PointerMoved(target) => manager.pointer_moved(target, now),
        PreviewCommand::LinkActivated(link) => {
            if let Err(error) = manager.link_activated(link) {
                warn!(error = %error, "failed to record navigation");
            }
        }
        PreviewCommand::ViewportResized(viewport) => manager.viewport_resized(viewport),
        PreviewCommand::ContentInserted(root) => {
            let wired = manager.content_inserted(root);
            debug!(root = root.index(), wired, "wired links in inserted content");
        }
        PreviewCommand::PageUnloaded => manager.page_unloaded(),
        PreviewCommand::Shutdown => {}
    }
}

/// A panic inside the fetch becomes an ordinary preview failure.
fn spawn_fetch(
    fetcher: ContentFetcher,
    popup: PopupId,
    url: Url,
    loaded_tx: UnboundedSender<LoadedContent>,
) {
    tokio::spawn(async move {
        let target = url.clone();
        let result = match tokio::spawn(async move { fetcher.fetch(&target).await }).await {
            Ok(result) => result,
            Err(error) => {
                warn!(url = %url, error = %error, "preview fetch task failed");
                Err(FetchError::Unreachable {
                    url: url.clone(),
                    reason: error.to_string(),
                })
            }
        };
        let _ = loaded_tx.send(LoadedContent { popup, url, result });
    });
}
