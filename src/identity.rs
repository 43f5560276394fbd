use serde::{Deserialize, Serialize};

/// A room member's role. Immutable for the lifetime of the identity (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Broadcaster,
    Viewer,
}

impl Role {
    /// Parse the wire role string. Unlike the envelope's structural fields,
    /// the role *value* is a semantic join failure (`INVALID_ROLE`), not a
    /// decode failure, so callers validate this explicitly rather than
    /// relying on serde to reject the frame.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "broadcaster" => Some(Role::Broadcaster),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Broadcaster => "broadcaster",
            Role::Viewer => "viewer",
        }
    }
}

/// A joined room member. Created on a successful `JOIN_ROOM`, destroyed on
/// disconnect or leave. Once created, `role` and `room_id` never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub room_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_roles() {
        assert_eq!(Role::parse("broadcaster"), Some(Role::Broadcaster));
        assert_eq!(Role::parse("viewer"), Some(Role::Viewer));
    }

    #[test]
    fn rejects_unknown_role() {
        assert_eq!(Role::parse("admin"), None);
        assert_eq!(Role::parse("Broadcaster"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Role::Broadcaster).unwrap();
        assert_eq!(json, "\"broadcaster\"");
    }
}
