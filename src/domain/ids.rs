//! Type-safe session and group identifiers.
//!
//! Both identifiers are opaque strings produced by a pluggable
//! [`IdGenerator`] (UUID v4 by default). The newtypes keep a session ID
//! from being passed where a group ID is expected.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Function producing fresh, unique identifiers.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Returns the default generator: a random UUID v4 per call.
#[must_use]
pub fn uuid_generator() -> IdGenerator {
    Arc::new(|| uuid::Uuid::new_v4().to_string())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an already generated identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id!(
    /// Unique identifier of a connected session.
    ///
    /// Assigned once at connect time and immutable thereafter. Used as the
    /// map key wherever a session must be found (hub registry, group
    /// membership).
    SessionId
);

string_id!(
    /// Unique identifier of a group, generated at group creation.
    GroupId
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn uuid_generator_produces_unique_ids() {
        let generate = uuid_generator();
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn display_matches_inner_string() {
        let id = SessionId::from("conn-1");
        assert_eq!(format!("{id}"), "conn-1");
        assert_eq!(id.as_str(), "conn-1");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = GroupId::new("room-7");
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "\"room-7\"");
    }

    #[test]
    fn hash_works_in_hashmap() {
        use std::collections::HashMap;
        let id = GroupId::new("g");
        let mut map = HashMap::new();
        map.insert(id.clone(), 1);
        assert_eq!(map.get(&id), Some(&1));
    }
}
