//! Intervention gate: hold a specific tool execution until an operator
//! decides.
//!
//! Each `(agent, tool)` pair is Idle unless paused. An execution of a paused
//! pair registers a pending approval keyed by its execution id and waits on
//! a oneshot channel; only that execution is suspended. Approve, reject,
//! resume, timeout, and the waiter being dropped all remove the pending
//! entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use vigil_core::ExecutionId;
use vigil_settings::{InterventionSettings, TimeoutPolicy};

use crate::errors::GateError;

/// One execution attempt that may be gated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Unique attempt id; operators approve by this id.
    pub execution_id: ExecutionId,
    /// Agent running the tool.
    pub agent_id: String,
    /// Tool being executed.
    pub tool_id: String,
    /// Parameters the tool would run with.
    pub params: Value,
}

impl ExecutionRequest {
    /// Request with a freshly generated execution id.
    pub fn new(agent_id: impl Into<String>, tool_id: impl Into<String>, params: Value) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            agent_id: agent_id.into(),
            tool_id: tool_id.into(),
            params,
        }
    }
}

/// Outcome of passing through the gate.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum GateDecision {
    /// Run the tool with `params`.
    Proceed {
        /// Parameters to run with.
        params: Value,
        /// Whether an operator replaced the original parameters.
        overridden: bool,
    },
    /// Do not run the tool.
    Rejected {
        /// Why.
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PointKey {
    agent_id: String,
    tool_id: String,
}

impl PointKey {
    fn new(agent_id: &str, tool_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_owned(),
            tool_id: tool_id.to_owned(),
        }
    }
}

#[derive(Debug)]
enum Resolution {
    Approve(Option<Value>),
    Reject(Option<String>),
    Release,
}

#[derive(Debug)]
struct PendingApproval {
    key: PointKey,
    tx: oneshot::Sender<Resolution>,
}

type PendingMap = Arc<Mutex<HashMap<ExecutionId, PendingApproval>>>;

/// Per-pair pause switches and the executions waiting on them.
pub struct InterventionGate {
    points: DashMap<PointKey, bool>,
    pending: PendingMap,
    timeout: Option<Duration>,
    on_timeout: TimeoutPolicy,
}

impl InterventionGate {
    /// Gate with the given waiting policy.
    pub fn new(timeout: Option<Duration>, on_timeout: TimeoutPolicy) -> Self {
        Self {
            points: DashMap::new(),
            pending: Arc::default(),
            timeout,
            on_timeout,
        }
    }

    /// Gate configured from settings.
    pub fn from_settings(settings: &InterventionSettings) -> Self {
        Self::new(
            settings.approval_timeout_ms.map(Duration::from_millis),
            settings.on_timeout,
        )
    }

    /// Set `pauseBeforeExecution` for a pair.
    pub fn configure(&self, agent_id: &str, tool_id: &str, pause_before_execution: bool) {
        let key = PointKey::new(agent_id, tool_id);
        if pause_before_execution {
            let _ = self.points.insert(key, true);
        } else {
            let _ = self.points.remove(&key);
        }
        info!(agent_id, tool_id, pause_before_execution, "intervention point configured");
    }

    /// Pause future executions of a pair.
    pub fn pause(&self, agent_id: &str, tool_id: &str) {
        self.configure(agent_id, tool_id, true);
    }

    /// Stop pausing a pair and release its waiting executions with their
    /// original parameters. Returns how many were released.
    pub fn resume(&self, agent_id: &str, tool_id: &str) -> usize {
        self.configure(agent_id, tool_id, false);
        let key = PointKey::new(agent_id, tool_id);
        let released: Vec<PendingApproval> = {
            let mut pending = self.pending.lock();
            let ids: Vec<ExecutionId> = pending
                .iter()
                .filter(|(_, p)| p.key == key)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let count = released.len();
        for approval in released {
            let _ = approval.tx.send(Resolution::Release);
        }
        if count > 0 {
            info!(agent_id, tool_id, count, "released waiting executions");
        }
        count
    }

    /// Whether executions of the pair are paused.
    pub fn is_paused(&self, agent_id: &str, tool_id: &str) -> bool {
        self.points
            .get(&PointKey::new(agent_id, tool_id))
            .is_some_and(|p| *p)
    }

    /// Register an execution attempt.
    ///
    /// Returns `None` when the pair is not paused (the execution proceeds
    /// immediately), otherwise a ticket to wait on.
    pub fn register(&self, request: &ExecutionRequest) -> Option<PendingTicket> {
        if !self.is_paused(&request.agent_id, &request.tool_id) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        let key = PointKey::new(&request.agent_id, &request.tool_id);
        let replaced = self
            .pending
            .lock()
            .insert(request.execution_id.clone(), PendingApproval { key, tx });
        if replaced.is_some() {
            warn!(execution_id = %request.execution_id, "duplicate execution id replaced a pending approval");
        }
        debug!(
            execution_id = %request.execution_id,
            agent_id = %request.agent_id,
            tool_id = %request.tool_id,
            "execution waiting for approval"
        );
        Some(PendingTicket {
            execution_id: request.execution_id.clone(),
            params: request.params.clone(),
            rx,
            pending: Arc::clone(&self.pending),
            timeout: self.timeout,
            on_timeout: self.on_timeout,
        })
    }

    /// Pass through the gate, waiting if the pair is paused.
    pub async fn checkpoint(&self, request: &ExecutionRequest) -> GateDecision {
        match self.register(request) {
            Some(ticket) => ticket.wait().await,
            None => GateDecision::Proceed {
                params: request.params.clone(),
                overridden: false,
            },
        }
    }

    /// Release a waiting execution; `params` replaces its parameters.
    pub fn approve(&self, execution_id: &ExecutionId, params: Option<Value>) -> Result<(), GateError> {
        self.resolve(execution_id, Resolution::Approve(params))
    }

    /// Refuse a waiting execution.
    pub fn reject(&self, execution_id: &ExecutionId, reason: Option<String>) -> Result<(), GateError> {
        self.resolve(execution_id, Resolution::Reject(reason))
    }

    fn resolve(&self, execution_id: &ExecutionId, resolution: Resolution) -> Result<(), GateError> {
        let approval = self
            .pending
            .lock()
            .remove(execution_id)
            .ok_or_else(|| GateError::UnknownExecution(execution_id.clone()))?;
        info!(%execution_id, ?resolution, "intervention resolved");
        approval
            .tx
            .send(resolution)
            .map_err(|_| GateError::UnknownExecution(execution_id.clone()))
    }

    /// Executions currently waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Ids of executions of a pair currently waiting.
    pub fn pending_for(&self, agent_id: &str, tool_id: &str) -> Vec<ExecutionId> {
        let key = PointKey::new(agent_id, tool_id);
        self.pending
            .lock()
            .iter()
            .filter(|(_, p)| p.key == key)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// A registered execution waiting for its decision.
///
/// Dropping the ticket withdraws the pending approval.
pub struct PendingTicket {
    execution_id: ExecutionId,
    params: Value,
    rx: oneshot::Receiver<Resolution>,
    pending: PendingMap,
    timeout: Option<Duration>,
    on_timeout: TimeoutPolicy,
}

impl PendingTicket {
    /// The waiting execution's id.
    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    /// Wait for an operator decision (or the timeout, if configured).
    pub async fn wait(mut self) -> GateDecision {
        let received = match self.timeout {
            None => Some((&mut self.rx).await),
            Some(limit) => tokio::time::timeout(limit, &mut self.rx).await.ok(),
        };
        let params = std::mem::take(&mut self.params);
        match received {
            Some(Ok(Resolution::Approve(Some(params)))) => GateDecision::Proceed {
                params,
                overridden: true,
            },
            Some(Ok(Resolution::Approve(None) | Resolution::Release)) => GateDecision::Proceed {
                params,
                overridden: false,
            },
            Some(Ok(Resolution::Reject(reason))) => GateDecision::Rejected {
                reason: reason.unwrap_or_else(|| "rejected by operator".to_owned()),
            },
            Some(Err(_)) => GateDecision::Rejected {
                reason: "intervention gate closed".to_owned(),
            },
            None => {
                warn!(execution_id = %self.execution_id, policy = ?self.on_timeout, "approval timed out");
                match self.on_timeout {
                    TimeoutPolicy::Allow => GateDecision::Proceed {
                        params,
                        overridden: false,
                    },
                    TimeoutPolicy::Deny => GateDecision::Rejected {
                        reason: "approval timed out".to_owned(),
                    },
                }
            }
        }
    }
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        let _ = self.pending.lock().remove(&self.execution_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn gate() -> Arc<InterventionGate> {
        Arc::new(InterventionGate::new(None, TimeoutPolicy::Deny))
    }

    fn request(agent: &str, tool: &str) -> ExecutionRequest {
        ExecutionRequest::new(agent, tool, json!({"query": "original"}))
    }

    #[tokio::test]
    async fn idle_pair_passes_through() {
        let g = gate();
        let decision = g.checkpoint(&request("a", "t")).await;
        assert_eq!(
            decision,
            GateDecision::Proceed {
                params: json!({"query": "original"}),
                overridden: false
            }
        );
        assert_eq!(g.pending_count(), 0);
    }

    #[tokio::test]
    async fn paused_pair_waits_for_approval() {
        let g = gate();
        g.pause("agentX", "toolY");
        let req = request("agentX", "toolY");
        let ticket = g.register(&req).unwrap();
        let waiter = tokio::spawn(ticket.wait());

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(g.pending_for("agentX", "toolY"), vec![req.execution_id.clone()]);

        g.approve(&req.execution_id, None).unwrap();
        let decision = waiter.await.unwrap();
        assert_matches!(decision, GateDecision::Proceed { overridden: false, .. });
        assert_eq!(g.pending_count(), 0);
    }

    #[tokio::test]
    async fn other_pairs_are_unaffected() {
        let g = gate();
        g.pause("agentX", "toolY");
        let blocked = g.register(&request("agentX", "toolY")).unwrap();
        let _parked = tokio::spawn(blocked.wait());

        let decision = g.checkpoint(&request("agentX", "toolZ")).await;
        assert_matches!(decision, GateDecision::Proceed { .. });
        assert_eq!(g.pending_count(), 1);
    }

    #[tokio::test]
    async fn override_replaces_params() {
        let g = gate();
        g.pause("a", "t");
        let req = request("a", "t");
        let ticket = g.register(&req).unwrap();
        g.approve(&req.execution_id, Some(json!({"query": "safer"}))).unwrap();
        assert_eq!(
            ticket.wait().await,
            GateDecision::Proceed {
                params: json!({"query": "safer"}),
                overridden: true
            }
        );
    }

    #[tokio::test]
    async fn reject_stops_execution() {
        let g = gate();
        g.pause("a", "t");
        let req = request("a", "t");
        let ticket = g.register(&req).unwrap();
        g.reject(&req.execution_id, Some("too risky".into())).unwrap();
        assert_eq!(
            ticket.wait().await,
            GateDecision::Rejected {
                reason: "too risky".into()
            }
        );
    }

    #[tokio::test]
    async fn resume_releases_waiters() {
        let g = gate();
        g.pause("a", "t");
        let first = g.register(&request("a", "t")).unwrap();
        let second = g.register(&request("a", "t")).unwrap();
        g.pause("a", "u");
        let other = g.register(&request("a", "u"));
        assert!(other.is_some());

        assert_eq!(g.resume("a", "t"), 2);
        assert!(!g.is_paused("a", "t"));
        assert_matches!(first.wait().await, GateDecision::Proceed { overridden: false, .. });
        assert_matches!(second.wait().await, GateDecision::Proceed { overridden: false, .. });
        assert_eq!(g.pending_count(), 1);
    }

    #[test]
    fn unknown_execution_is_an_error() {
        let g = gate();
        let id = ExecutionId::from("exec_missing");
        assert_eq!(g.approve(&id, None), Err(GateError::UnknownExecution(id.clone())));
        assert_eq!(g.reject(&id, None), Err(GateError::UnknownExecution(id)));
    }

    #[test]
    fn dropping_ticket_withdraws_approval() {
        let g = gate();
        g.pause("a", "t");
        let req = request("a", "t");
        let ticket = g.register(&req).unwrap();
        assert_eq!(g.pending_count(), 1);
        drop(ticket);
        assert_eq!(g.pending_count(), 0);
        assert!(g.approve(&req.execution_id, None).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_denies_by_default() {
        let g = InterventionGate::new(Some(Duration::from_secs(5)), TimeoutPolicy::Deny);
        g.pause("a", "t");
        let decision = g.checkpoint(&request("a", "t")).await;
        assert_eq!(
            decision,
            GateDecision::Rejected {
                reason: "approval timed out".into()
            }
        );
        assert_eq!(g.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_can_allow() {
        let g = InterventionGate::new(Some(Duration::from_secs(5)), TimeoutPolicy::Allow);
        g.pause("a", "t");
        let decision = g.checkpoint(&request("a", "t")).await;
        assert_matches!(decision, GateDecision::Proceed { overridden: false, .. });
    }

    #[test]
    fn decision_wire_shape() {
        let json = serde_json::to_value(GateDecision::Proceed {
            params: json!({}),
            overridden: true,
        })
        .unwrap();
        assert_eq!(json["outcome"], "proceed");
        assert_eq!(json["overridden"], true);
        let json = serde_json::to_value(GateDecision::Rejected { reason: "x".into() }).unwrap();
        assert_eq!(json["outcome"], "rejected");
    }
}
