use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tester,
    Curator,
    Admin,
    Superadmin,
    Plus,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Tester,
        Role::Curator,
        Role::Admin,
        Role::Superadmin,
        Role::Plus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Tester => "tester",
            Role::Curator => "curator",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
            Role::Plus => "plus",
        }
    }

    /// Capability a caller must hold to grant or revoke this role.
    pub fn grant_requires(self) -> Capability {
        match self {
            Role::Admin | Role::Superadmin => Capability::ManageRoles,
            _ => Capability::Moderate,
        }
    }

    /// Roles whose holders count as curators for the default feed.
    pub fn curator_class() -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| Capability::Curate.granted_by(*r))
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    BetaAccess,
    PlusFeatures,
    Curate,
    Moderate,
    ManageRoles,
}

impl Capability {
    /// superadmin ⊇ admin ⊇ curator
    pub fn granted_by(self, role: Role) -> bool {
        match self {
            Capability::BetaAccess => {
                matches!(role, Role::Tester | Role::Admin | Role::Superadmin)
            }
            Capability::PlusFeatures => matches!(role, Role::Plus | Role::Superadmin),
            Capability::Curate => matches!(role, Role::Curator | Role::Admin | Role::Superadmin),
            Capability::Moderate => matches!(role, Role::Admin | Role::Superadmin),
            Capability::ManageRoles => role == Role::Superadmin,
        }
    }
}

pub fn has_capability(roles: &[Role], capability: Capability) -> bool {
    roles.iter().any(|r| capability.granted_by(*r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_order() {
        assert!(has_capability(&[Role::Superadmin], Capability::Moderate));
        assert!(has_capability(&[Role::Superadmin], Capability::Curate));
        assert!(has_capability(&[Role::Admin], Capability::Curate));
        assert!(!has_capability(&[Role::Admin], Capability::ManageRoles));
        assert!(!has_capability(&[Role::Curator], Capability::Moderate));
        assert!(!has_capability(&[Role::Tester, Role::Plus], Capability::Curate));
        assert!(!has_capability(&[], Capability::BetaAccess));
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("SuperAdmin".parse::<Role>().unwrap(), Role::Superadmin);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn curator_class_excludes_non_curators() {
        let class = Role::curator_class();
        assert_eq!(class, vec![Role::Curator, Role::Admin, Role::Superadmin]);
    }
}
