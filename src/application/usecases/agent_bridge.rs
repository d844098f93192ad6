use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    application::usecases::agent_host::AgentHost,
    domain::{
        errors::UplinkError,
        value_objects::{
            agent_messages::{AgentCommand, AgentNotification},
            enums::agent_states::AgentState,
        },
    },
};

/// Recovery tag the bridge registers for pending uploads.
pub const RECOVERY_TAG: &str = "uplink-pending-uploads";

type CompleteCallback = Box<dyn Fn(&str, &str) + Send + Sync>;
type FailedCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    on_complete: Vec<CompleteCallback>,
    on_failed: Vec<FailedCallback>,
}

impl Callbacks {
    fn dispatch(&self, notification: &AgentNotification) {
        match notification {
            AgentNotification::UploadComplete {
                id,
                remote_upload_id,
            } => self.on_complete.iter().for_each(|cb| cb(id, remote_upload_id)),
            AgentNotification::UploadFailed { id, error } => {
                self.on_failed.iter().for_each(|cb| cb(id, error))
            }
        }
    }
}

/// A page's handle on the delivery agent. Dropping it detaches the page and
/// stops its notification dispatch.
pub struct AgentBridge {
    host: AgentHost,
    registration: Option<watch::Receiver<AgentState>>,
    callbacks: Arc<Mutex<Callbacks>>,
    dispatcher: JoinHandle<()>,
}

impl AgentBridge {
    pub fn connect(host: &AgentHost) -> Self {
        host.attach_client();
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));
        let dispatcher = tokio::spawn(dispatch_notifications(
            host.subscribe(),
            Arc::clone(&callbacks),
        ));

        Self {
            host: host.clone(),
            registration: None,
            callbacks,
            dispatcher,
        }
    }

    /// Registers the agent on first use. Later calls are no-ops.
    pub fn ensure_registered(&mut self) {
        if self.registration.is_some() || self.host.has_agent() {
            return;
        }
        self.registration = Some(self.host.register());
    }

    /// Lifecycle of the agent this bridge registered, if it registered one.
    pub fn registration_state(&self) -> Option<AgentState> {
        self.registration.as_ref().map(|state| *state.borrow())
    }

    pub fn is_ready(&self) -> bool {
        self.host.is_ready()
    }

    /// Resolves once an active agent exists.
    pub async fn wait_until_ready(&self) {
        let mut ready = self.host.ready();
        if ready.wait_for(|ready| *ready).await.is_err() {
            debug!("agent_bridge: host dropped while waiting for an agent");
        }
    }

    pub fn start_upload(&self, id: &str) -> bool {
        self.post_message(AgentCommand::StartUpload { id: id.to_string() })
    }

    pub fn process_pending_uploads(&self) -> bool {
        self.post_message(AgentCommand::ProcessPending)
    }

    /// `false` means no agent took the message; retry once `is_ready` flips.
    pub fn post_message(&self, command: AgentCommand) -> bool {
        let accepted = self.host.dispatch(command.clone());
        if !accepted {
            warn!(command = ?command, "agent_bridge: no active agent, message not delivered");
        }
        accepted
    }

    /// Best effort; succeeds as a no-op where recovery signals are not
    /// supported.
    pub fn request_recovery_notification(&self) -> Result<(), UplinkError> {
        self.host.register_recovery(RECOVERY_TAG);
        Ok(())
    }

    pub fn on_upload_complete<F>(&self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.callbacks.lock().on_complete.push(Box::new(callback));
    }

    pub fn on_upload_failed<F>(&self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.callbacks.lock().on_failed.push(Box::new(callback));
    }
}

impl Drop for AgentBridge {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.host.detach_client();
    }
}

async fn dispatch_notifications(
    mut notifications: broadcast::Receiver<AgentNotification>,
    callbacks: Arc<Mutex<Callbacks>>,
) {
    loop {
        match notifications.recv().await {
            Ok(notification) => {
                debug!(record_id = %notification.record_id(), "agent_bridge: notification received");
                callbacks.lock().dispatch(&notification);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "agent_bridge: fell behind, notifications skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
