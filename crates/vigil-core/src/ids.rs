//! Branded string identifiers.
//!
//! Each id is a newtype over `String` so a connection id can never be passed
//! where an execution id is expected. Generated ids are UUID v7 with a short
//! prefix, which keeps them time-ordered and readable in logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, time-ordered id.
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the id, returning the inner string.
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Identifies one observer connection on the transport.
    ConnectionId,
    "conn"
);
branded_id!(
    /// Identifies one tool execution attempt (the key for intervention approvals).
    ExecutionId,
    "exec"
);
branded_id!(
    /// Identifies one telemetry event.
    EventId,
    "evt"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(ConnectionId::new().as_str().starts_with("conn_"));
        assert!(ExecutionId::new().as_str().starts_with("exec_"));
        assert!(EventId::new().as_str().starts_with("evt_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_str_keeps_value() {
        let id = ExecutionId::from("tc_42");
        assert_eq!(id.as_str(), "tc_42");
        assert_eq!(id.to_string(), "tc_42");
    }

    #[test]
    fn serializes_transparently() {
        let id = ConnectionId::from("c1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"c1\"");
        let back: ConnectionId = serde_json::from_str("\"c1\"").unwrap();
        assert_eq!(back, id);
    }
}
