//! Bridges schedule firings onto live page sessions.
//!
//! `Run action:` imperatives resolve to a block action dispatch on the
//! page's session; `Notify` imperatives go to a host-supplied channel
//! (system tray, email, whatever the embedder wires in).

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use livemark_schedule::{ScheduleError, ScheduleHandler};

use crate::session::PageSession;

pub type NotifyFn = dyn Fn(&str, &str) + Send + Sync;

pub struct ScheduleBridge {
    sessions: std::sync::RwLock<HashMap<String, Arc<PageSession>>>,
    notifier: Arc<NotifyFn>,
}

impl ScheduleBridge {
    pub fn new(notifier: Arc<NotifyFn>) -> Self {
        Self {
            sessions: std::sync::RwLock::new(HashMap::new()),
            notifier,
        }
    }

    pub fn register_session(&self, session: Arc<PageSession>) {
        self.sessions
            .write()
            .expect("sessions lock poisoned")
            .insert(session.page_id().to_string(), session);
    }

    pub fn remove_session(&self, page_id: &str) {
        self.sessions
            .write()
            .expect("sessions lock poisoned")
            .remove(page_id);
    }

    fn session(&self, page_id: &str) -> Option<Arc<PageSession>> {
        self.sessions
            .read()
            .expect("sessions lock poisoned")
            .get(page_id)
            .cloned()
    }
}

#[async_trait::async_trait]
impl ScheduleHandler for ScheduleBridge {
    async fn on_notify(&self, page_id: &str, message: &str) -> Result<(), ScheduleError> {
        (self.notifier)(page_id, message);
        Ok(())
    }

    async fn on_action(
        &self,
        page_id: &str,
        action: &str,
        args: &IndexMap<String, String>,
        _message: &str,
    ) -> Result<(), ScheduleError> {
        let session = self.session(page_id).ok_or_else(|| {
            ScheduleError::Handler(format!("no live session for page '{page_id}'"))
        })?;
        session
            .run_action(action, args)
            .await
            .map_err(|e| ScheduleError::Handler(e.to_string()))
    }
}
