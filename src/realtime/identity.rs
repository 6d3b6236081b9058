//! Connection identities
//!
//! Identities are generated when a connection is accepted and are not tied
//! to the credential that authorised it.

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generated identity of one connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    /// Opaque unique id
    pub id: String,
    /// Name shown next to the peer's cursor
    pub display_name: String,
    /// Cursor colour, `#rrggbb`
    pub color: String,
}

impl PeerIdentity {
    /// Generate a fresh identity
    pub fn generate() -> Self {
        let id = Uuid::new_v4().to_string();
        let color = format!("#{:06x}", rand::rng().random_range(0..=0xFF_FFFFu32));
        PeerIdentity {
            display_name: format!("User {}", &id[..4]),
            id,
            color,
        }
    }

    /// Identity with fixed fields
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, color: impl Into<String>) -> Self {
        PeerIdentity {
            id: id.into(),
            display_name: display_name.into(),
            color: color.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_shape() {
        let identity = PeerIdentity::generate();
        assert_eq!(identity.id.len(), 36);
        assert_eq!(identity.display_name, format!("User {}", &identity.id[..4]));
        assert_eq!(identity.color.len(), 7);
        assert!(identity.color.starts_with('#'));
        assert!(identity.color[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identities_are_unique() {
        let a = PeerIdentity::generate();
        let b = PeerIdentity::generate();
        assert_ne!(a.id, b.id);
    }
}
