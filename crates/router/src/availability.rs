use hivemind_core::{AgentRole, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Assignments {
    /// Busy role → task holding it.
    busy: HashMap<AgentRole, String>,
    /// Task → role it holds.
    tasks: HashMap<String, AgentRole>,
}

/// Idle/busy state per role, used to avoid double-assigning a role.
/// Never blocks waiting for a role to free up.
#[derive(Clone, Default)]
pub struct AvailabilityTracker {
    inner: Arc<Mutex<Assignments>>,
}

impl AvailabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `role` busy with `task_id`. Fails with `NoAvailableRole` when the
    /// role is already busy.
    pub async fn assign(&self, task_id: &str, role: AgentRole) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(holder) = inner.busy.get(&role) {
            debug!(role = %role, holder = %holder, task = %task_id, "Role busy");
            return Err(Error::NoAvailableRole(role.to_string()));
        }
        if inner.tasks.contains_key(task_id) {
            return Err(Error::Validation(format!("task {} already assigned", task_id)));
        }
        inner.busy.insert(role, task_id.to_string());
        inner.tasks.insert(task_id.to_string(), role);
        debug!(role = %role, task = %task_id, "Role assigned");
        Ok(())
    }

    /// Free the role held by `task_id`. Returns the role, or `None` for an
    /// unknown task.
    pub async fn complete(&self, task_id: &str) -> Option<AgentRole> {
        let mut inner = self.inner.lock().await;
        let role = inner.tasks.remove(task_id)?;
        inner.busy.remove(&role);
        debug!(role = %role, task = %task_id, "Role released");
        Some(role)
    }

    pub async fn is_idle(&self, role: AgentRole) -> bool {
        !self.inner.lock().await.busy.contains_key(&role)
    }

    pub async fn assignment(&self, task_id: &str) -> Option<AgentRole> {
        self.inner.lock().await.tasks.get(task_id).copied()
    }

    /// `preferred` if idle, else the first idle role in fixed order, else
    /// `None`.
    pub async fn get_available_role(&self, preferred: AgentRole) -> Option<AgentRole> {
        self.get_available_role_among(preferred, &AgentRole::ALL)
            .await
    }

    /// Like [`get_available_role`](Self::get_available_role) but only
    /// considers `candidates` when falling back.
    pub async fn get_available_role_among(
        &self,
        preferred: AgentRole,
        candidates: &[AgentRole],
    ) -> Option<AgentRole> {
        let inner = self.inner.lock().await;
        if !inner.busy.contains_key(&preferred) {
            return Some(preferred);
        }
        AgentRole::ALL
            .iter()
            .copied()
            .filter(|r| candidates.contains(r))
            .find(|r| !inner.busy.contains_key(r))
    }

    /// Busy roles in fixed order.
    pub async fn busy_roles(&self) -> Vec<AgentRole> {
        let inner = self.inner.lock().await;
        AgentRole::ALL
            .iter()
            .copied()
            .filter(|r| inner.busy.contains_key(r))
            .collect()
    }
}
