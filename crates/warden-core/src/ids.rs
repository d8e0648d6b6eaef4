//! Prefixed, time-ordered identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(format!("{}_{}", Self::PREFIX, Uuid::now_v7().simple()))
            }

            /// Wrap an id read back from storage or a log line.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
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
    };
}

prefixed_id!(
    /// One shared conversation, from creation until rotation or reset.
    SessionId => "sess"
);
prefixed_id!(
    /// One dispatched call, across all of its attempts.
    RequestId => "req"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        assert!(SessionId::new().as_str().starts_with("sess_"));
        assert!(RequestId::new().as_str().starts_with("req_"));
        assert_eq!(RequestId::PREFIX, "req");
    }

    #[test]
    fn new_ids_sort_by_creation() {
        let ids: Vec<RequestId> = (0..50).map(|_| RequestId::new()).collect();
        assert!(ids.windows(2).all(|w| w[0].as_str() < w[1].as_str()));
    }

    #[test]
    fn serde_is_a_bare_string() {
        let id = SessionId::from_raw("sess_restored");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess_restored\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.to_string(), "sess_restored");
    }
}
