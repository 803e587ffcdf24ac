//! Role-based authorization policies

use serde::Serialize;

use crate::enums::UserRole;

/// Named policies gating each route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Policy {
    RequireAdminRole,
    RequireGRCRole,
    RequireGRCOrAdminRole,
    RequireAnyRole,
}

impl Policy {
    pub fn allows(&self, role: UserRole) -> bool {
        match self {
            Self::RequireAdminRole => role == UserRole::Admin,
            Self::RequireGRCRole => role == UserRole::GrcUser,
            Self::RequireGRCOrAdminRole => matches!(role, UserRole::GrcUser | UserRole::Admin),
            Self::RequireAnyRole => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RequireAdminRole => "RequireAdminRole",
            Self::RequireGRCRole => "RequireGRCRole",
            Self::RequireGRCOrAdminRole => "RequireGRCOrAdminRole",
            Self::RequireAnyRole => "RequireAnyRole",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use UserRole::*;

    #[test]
    fn policy_table() {
        let table = [
            (Policy::RequireAdminRole, [false, false, true]),
            (Policy::RequireGRCRole, [false, true, false]),
            (Policy::RequireGRCOrAdminRole, [false, true, true]),
            (Policy::RequireAnyRole, [true, true, true]),
        ];
        for (policy, expected) in table {
            for (role, allowed) in [ItUser, GrcUser, Admin].into_iter().zip(expected) {
                assert_eq!(policy.allows(role), allowed, "{} / {}", policy.name(), role);
            }
        }
    }
}
