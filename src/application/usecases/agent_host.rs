use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    application::usecases::{
        chunked_upload::ChunkedUploadDriver,
        delivery_agent::{AgentSignal, DeliveryAgent},
    },
    config::config_model::AgentConfig,
    domain::{
        repositories::upload_records::UploadRecordRepository,
        value_objects::{
            agent_messages::{AgentCommand, AgentNotification},
            enums::agent_states::AgentState,
        },
    },
};

const SIGNAL_QUEUE_CAPACITY: usize = 256;
const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Clone)]
struct AgentSlot {
    version: u64,
    signals: mpsc::Sender<AgentSignal>,
    state: watch::Receiver<AgentState>,
}

#[derive(Default)]
struct HostInner {
    active: Option<AgentSlot>,
    /// Installing or waiting for the active one to be released.
    incoming: Option<AgentSlot>,
    clients: usize,
    next_version: u64,
    recovery_tags: BTreeSet<String>,
}

/// Registry of delivery agents for one process: at most one active agent,
/// at most one incoming, and the pages (clients) attached to them.
#[derive(Clone)]
pub struct AgentHost {
    inner: Arc<Mutex<HostInner>>,
    notifications: broadcast::Sender<AgentNotification>,
    ready: watch::Sender<bool>,
    store: Arc<dyn UploadRecordRepository + Send + Sync>,
    driver: Arc<ChunkedUploadDriver>,
    config: AgentConfig,
}

impl AgentHost {
    pub fn new(
        store: Arc<dyn UploadRecordRepository + Send + Sync>,
        driver: Arc<ChunkedUploadDriver>,
        config: AgentConfig,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(HostInner::default())),
            notifications,
            ready,
            store,
            driver,
            config,
        }
    }

    /// Installs a new agent version. It activates right away unless an
    /// active agent still has pages attached, in which case it waits for
    /// `ACTIVATE_NOW` or for the last page to detach.
    pub fn register(&self) -> watch::Receiver<AgentState> {
        let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(AgentState::Installing);
        let (activated_tx, activated_rx) = oneshot::channel();

        let (version, must_wait) = {
            let mut inner = self.inner.lock();
            inner.next_version += 1;
            let version = inner.next_version;
            let must_wait = inner.active.is_some() && inner.clients > 0;
            // A newer registration supersedes one still waiting.
            inner.incoming = Some(AgentSlot {
                version,
                signals: signals_tx,
                state: state_rx.clone(),
            });
            (version, must_wait)
        };

        info!(version, must_wait, "agent_host: registering delivery agent");

        let agent = DeliveryAgent::new(
            Arc::clone(&self.store),
            Arc::clone(&self.driver),
            self.notifications.clone(),
        );
        tokio::spawn(agent.run(signals_rx, state_tx, must_wait, activated_tx));

        let host = self.clone();
        tokio::spawn(async move {
            if activated_rx.await.is_ok() {
                host.promote(version);
            }
        });

        state_rx
    }

    fn promote(&self, version: u64) {
        let replaced = {
            let mut inner = self.inner.lock();
            if inner.incoming.as_ref().map(|slot| slot.version) != Some(version) {
                debug!(version, "agent_host: superseded agent activated late, ignored");
                return;
            }
            let incoming = inner.incoming.take();
            std::mem::replace(&mut inner.active, incoming)
        };
        if let Some(old) = replaced {
            info!(old_version = old.version, "agent_host: previous agent released");
        }
        self.ready.send_replace(true);
        info!(version, "agent_host: agent active");
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn has_agent(&self) -> bool {
        let inner = self.inner.lock();
        inner.active.is_some() || inner.incoming.is_some()
    }

    pub fn active_state(&self) -> Option<AgentState> {
        let inner = self.inner.lock();
        inner.active.as_ref().map(|slot| *slot.state.borrow())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentNotification> {
        self.notifications.subscribe()
    }

    /// Routes a command. `ACTIVATE_NOW` goes to the waiting agent when there
    /// is one; everything else needs an active agent. Returns whether the
    /// command was accepted.
    pub fn dispatch(&self, command: AgentCommand) -> bool {
        let target = {
            let inner = self.inner.lock();
            match command {
                AgentCommand::ActivateNow => inner.incoming.clone().or_else(|| inner.active.clone()),
                _ => inner.active.clone(),
            }
        };
        let Some(slot) = target else {
            return false;
        };
        send_signal(&slot, AgentSignal::Command(command))
    }

    pub fn attach_client(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.clients += 1;
        inner.clients
    }

    /// When the last page detaches, a waiting agent takes over.
    pub fn detach_client(&self) -> usize {
        let (remaining, waiting) = {
            let mut inner = self.inner.lock();
            inner.clients = inner.clients.saturating_sub(1);
            (inner.clients, inner.incoming.clone())
        };
        if remaining == 0 {
            if let Some(slot) = waiting {
                debug!(version = slot.version, "agent_host: last client gone, activating waiting agent");
                send_signal(&slot, AgentSignal::Command(AgentCommand::ActivateNow));
            }
        }
        remaining
    }

    /// Best effort: hosts without recovery support accept and ignore.
    pub fn register_recovery(&self, tag: &str) {
        if !self.config.recovery_supported {
            debug!(tag, "agent_host: recovery signals unsupported, request ignored");
            return;
        }
        self.inner.lock().recovery_tags.insert(tag.to_string());
    }

    /// Connectivity is back: fire every registered tag once at the active
    /// agent. Returns how many signals were delivered.
    pub fn connectivity_restored(&self) -> usize {
        let (tags, active) = {
            let mut inner = self.inner.lock();
            if inner.active.is_none() {
                return 0;
            }
            (std::mem::take(&mut inner.recovery_tags), inner.active.clone())
        };
        let Some(slot) = active else {
            return 0;
        };

        tags.into_iter()
            .filter(|tag| send_signal(&slot, AgentSignal::Recovery { tag: tag.clone() }))
            .count()
    }
}

fn send_signal(slot: &AgentSlot, signal: AgentSignal) -> bool {
    match slot.signals.try_send(signal) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(version = slot.version, "agent_host: agent queue full, signal dropped");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(version = slot.version, "agent_host: agent stopped, signal dropped");
            false
        }
    }
}
