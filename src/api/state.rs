//! Shared application state.

use std::sync::Arc;

use crate::config::{OpenClawPaths, Settings};
use crate::error::{ApiResult, SshError};
use crate::history::HistoryStore;
use crate::ssh::{RemoteShell, SshShell};

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    shell: Option<Arc<dyn RemoteShell>>,
    pub settings: Arc<Settings>,
    pub history: Arc<HistoryStore>,
}

impl AppState {
    /// Build the state from resolved settings, with a russh-backed shell when
    /// a host is configured.
    pub fn new(settings: Settings) -> Self {
        let shell = settings
            .ssh
            .clone()
            .map(|ssh| Arc::new(SshShell::new(ssh)) as Arc<dyn RemoteShell>);
        Self::with_shell(settings, shell)
    }

    pub fn with_shell(settings: Settings, shell: Option<Arc<dyn RemoteShell>>) -> Self {
        let history = Arc::new(HistoryStore::new(settings.history_dir()));
        Self {
            shell,
            settings: Arc::new(settings),
            history,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.shell.is_some()
    }

    /// The remote shell, or `SSH not configured`.
    pub fn shell(&self) -> ApiResult<&dyn RemoteShell> {
        self.shell
            .as_deref()
            .ok_or_else(|| SshError::NotConfigured.into())
    }

    /// Owned handle for work that outlives the request (SSE streams).
    pub fn shared_shell(&self) -> ApiResult<Arc<dyn RemoteShell>> {
        self.shell
            .clone()
            .ok_or_else(|| SshError::NotConfigured.into())
    }

    pub fn paths(&self) -> &OpenClawPaths {
        &self.settings.paths
    }
}
