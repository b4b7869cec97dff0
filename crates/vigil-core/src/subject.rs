//! Subject keys: the per-entity rooms observers can focus on.
//!
//! Wire form is `kind:id`:
//!
//! | Kind | Example |
//! |------|---------|
//! | `agentThoughts` | `agentThoughts:agent-7` |
//! | `quantumState` | `quantumState:engine-2` |
//! | `toolExecution` | `toolExecution:agent-7:web_search` |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::SubjectKeyError;

/// The family a subject key belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubjectKind {
    /// Reasoning stream of one agent.
    AgentThoughts,
    /// State stream of one state engine instance.
    QuantumState,
    /// Executions of one tool by one agent.
    ToolExecution,
}

impl SubjectKind {
    /// Wire prefix for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentThoughts => "agentThoughts",
            Self::QuantumState => "quantumState",
            Self::ToolExecution => "toolExecution",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = SubjectKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agentThoughts" => Ok(Self::AgentThoughts),
            "quantumState" => Ok(Self::QuantumState),
            "toolExecution" => Ok(Self::ToolExecution),
            other => Err(SubjectKeyError::UnknownKind(other.to_owned())),
        }
    }
}

/// A key naming one subject room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKey {
    /// `agentThoughts:<agentId>`
    AgentThoughts(String),
    /// `quantumState:<systemId>`
    QuantumState(String),
    /// `toolExecution:<agentId>:<toolId>`
    ToolExecution {
        /// Agent running the tool.
        agent_id: String,
        /// Tool being executed.
        tool_id: String,
    },
}

impl SubjectKey {
    /// Thought stream of `agent_id`.
    pub fn agent_thoughts(agent_id: impl Into<String>) -> Self {
        Self::AgentThoughts(agent_id.into())
    }

    /// State stream of `system_id`.
    pub fn quantum_state(system_id: impl Into<String>) -> Self {
        Self::QuantumState(system_id.into())
    }

    /// Execution stream of `tool_id` run by `agent_id`.
    pub fn tool_execution(agent_id: impl Into<String>, tool_id: impl Into<String>) -> Self {
        Self::ToolExecution {
            agent_id: agent_id.into(),
            tool_id: tool_id.into(),
        }
    }

    /// Build a key from a kind and the id part of the wire form.
    ///
    /// For [`SubjectKind::ToolExecution`] the id is `<agentId>:<toolId>`,
    /// split at the last `:`. Agent ids may contain `:`; tool ids may not.
    pub fn from_parts(kind: SubjectKind, id: &str) -> Result<Self, SubjectKeyError> {
        let full = || format!("{}:{id}", kind.as_str());
        if id.is_empty() {
            return Err(SubjectKeyError::EmptyId(full()));
        }
        match kind {
            SubjectKind::AgentThoughts => Ok(Self::agent_thoughts(id)),
            SubjectKind::QuantumState => Ok(Self::quantum_state(id)),
            SubjectKind::ToolExecution => match id.rsplit_once(':') {
                Some((agent, tool)) if !agent.is_empty() && !tool.is_empty() => {
                    Ok(Self::tool_execution(agent, tool))
                }
                _ => Err(SubjectKeyError::EmptyId(full())),
            },
        }
    }

    /// The family of this key.
    pub fn kind(&self) -> SubjectKind {
        match self {
            Self::AgentThoughts(_) => SubjectKind::AgentThoughts,
            Self::QuantumState(_) => SubjectKind::QuantumState,
            Self::ToolExecution { .. } => SubjectKind::ToolExecution,
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgentThoughts(id) => write!(f, "agentThoughts:{id}"),
            Self::QuantumState(id) => write!(f, "quantumState:{id}"),
            Self::ToolExecution { agent_id, tool_id } => {
                write!(f, "toolExecution:{agent_id}:{tool_id}")
            }
        }
    }
}

impl FromStr for SubjectKey {
    type Err = SubjectKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| SubjectKeyError::MissingSeparator(s.to_owned()))?;
        Self::from_parts(kind.parse()?, id)
    }
}

impl Serialize for SubjectKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SubjectKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn display_forms() {
        assert_eq!(SubjectKey::agent_thoughts("a1").to_string(), "agentThoughts:a1");
        assert_eq!(SubjectKey::quantum_state("q9").to_string(), "quantumState:q9");
        assert_eq!(
            SubjectKey::tool_execution("a1", "search").to_string(),
            "toolExecution:a1:search"
        );
    }

    #[test]
    fn parse_each_kind() {
        assert_eq!(
            "agentThoughts:a1".parse::<SubjectKey>().unwrap(),
            SubjectKey::agent_thoughts("a1")
        );
        assert_eq!(
            "quantumState:q9".parse::<SubjectKey>().unwrap(),
            SubjectKey::quantum_state("q9")
        );
        assert_eq!(
            "toolExecution:a1:search".parse::<SubjectKey>().unwrap(),
            SubjectKey::tool_execution("a1", "search")
        );
    }

    #[test]
    fn parse_errors() {
        assert_matches!(
            "agentThoughts".parse::<SubjectKey>(),
            Err(SubjectKeyError::MissingSeparator(_))
        );
        assert_matches!(
            "planet:mars".parse::<SubjectKey>(),
            Err(SubjectKeyError::UnknownKind(k)) if k == "planet"
        );
        assert_matches!(
            "agentThoughts:".parse::<SubjectKey>(),
            Err(SubjectKeyError::EmptyId(_))
        );
        assert_matches!(
            "toolExecution:a1".parse::<SubjectKey>(),
            Err(SubjectKeyError::EmptyId(_))
        );
        assert_matches!(
            "toolExecution:a1:".parse::<SubjectKey>(),
            Err(SubjectKeyError::EmptyId(_))
        );
    }

    #[test]
    fn from_parts_matches_parse() {
        let a = SubjectKey::from_parts(SubjectKind::ToolExecution, "a1:t1").unwrap();
        let b: SubjectKey = "toolExecution:a1:t1".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.kind(), SubjectKind::ToolExecution);
    }

    #[test]
    fn agent_id_keeps_extra_colons() {
        let key = SubjectKey::tool_execution("team:a1", "search");
        assert_eq!(key.to_string(), "toolExecution:team:a1:search");
        let back: SubjectKey = key.to_string().parse().unwrap();
        assert_eq!(back, key);
        assert!("toolExecution:a1:".parse::<SubjectKey>().is_err());
        assert!("toolExecution::t1".parse::<SubjectKey>().is_err());
    }

    #[test]
    fn serde_uses_wire_string() {
        let key = SubjectKey::quantum_state("q1");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"quantumState:q1\"");
        let back: SubjectKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<SubjectKey>("\"nope\"").is_err());
    }

    #[test]
    fn kind_serde_is_camel_case() {
        let json = serde_json::to_string(&SubjectKind::AgentThoughts).unwrap();
        assert_eq!(json, "\"agentThoughts\"");
        let kind: SubjectKind = serde_json::from_str("\"toolExecution\"").unwrap();
        assert_eq!(kind, SubjectKind::ToolExecution);
    }
}
