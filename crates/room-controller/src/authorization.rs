//! Roles and permission checks.
//!
//! Every peer always carries the baseline [`Role::Normal`]; it can never be
//! added twice or removed. Further roles are granted and revoked at runtime,
//! and authorization-aware middlewares consult [`has_permission`] before
//! acting on a message.

use crate::signaling::Peer;
use serde::{Deserialize, Serialize};

/// A role held by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Baseline role every peer holds for its entire lifetime.
    Normal,
    /// May moderate the room (mute others, close the room, manage timers).
    Moderator,
    /// Full control, including role management.
    Admin,
}

/// The baseline role; present on every peer, never removable.
pub const BASELINE_ROLE: Role = Role::Normal;

/// An action a middleware may need to authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Send chat messages to the room.
    SendChat,
    /// Produce audio/video into the room.
    ShareMedia,
    /// Moderate the room.
    ModerateRoom,
    /// Grant or revoke roles.
    ManageRoles,
}

impl Role {
    /// The permissions this role grants.
    #[must_use]
    pub fn permissions(self) -> &'static [Permission] {
        match self {
            Role::Normal => &[Permission::SendChat, Permission::ShareMedia],
            Role::Moderator => &[
                Permission::SendChat,
                Permission::ShareMedia,
                Permission::ModerateRoom,
            ],
            Role::Admin => &[
                Permission::SendChat,
                Permission::ShareMedia,
                Permission::ModerateRoom,
                Permission::ManageRoles,
            ],
        }
    }
}

/// A role grant or revocation, observed by authorization-aware middlewares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    /// The peer gained a role.
    Got(Role),
    /// The peer lost a role.
    Lost(Role),
}

/// Whether `peer` currently holds any role granting `permission`.
#[must_use]
pub fn has_permission(peer: &Peer, permission: Permission) -> bool {
    peer.roles()
        .iter()
        .any(|role| role.permissions().contains(&permission))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_grants_chat_but_not_moderation() {
        assert!(Role::Normal.permissions().contains(&Permission::SendChat));
        assert!(!Role::Normal
            .permissions()
            .contains(&Permission::ModerateRoom));
    }

    #[test]
    fn test_moderator_cannot_manage_roles() {
        assert!(Role::Moderator
            .permissions()
            .contains(&Permission::ModerateRoom));
        assert!(!Role::Moderator
            .permissions()
            .contains(&Permission::ManageRoles));
    }

    #[test]
    fn test_admin_grants_everything() {
        for permission in [
            Permission::SendChat,
            Permission::ShareMedia,
            Permission::ModerateRoom,
            Permission::ManageRoles,
        ] {
            assert!(Role::Admin.permissions().contains(&permission));
        }
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&Role::Moderator).unwrap(),
            "\"moderator\""
        );
        let back: Role = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(back, Role::Normal);
    }
}
