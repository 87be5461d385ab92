use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalId(pub String);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed set of role tokens shared by step templates, the authorization
/// predicate and the principal model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Accountant,
    Supervisor,
    Manager,
    Admin,
    DepartmentHead,
    FinanceTeam,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Accountant => "accountant",
            Self::Supervisor => "supervisor",
            Self::Manager => "manager",
            Self::Admin => "admin",
            Self::DepartmentHead => "department_head",
            Self::FinanceTeam => "finance_team",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "employee" => Some(Self::Employee),
            "accountant" => Some(Self::Accountant),
            "supervisor" => Some(Self::Supervisor),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            "department_head" => Some(Self::DepartmentHead),
            "finance_team" => Some(Self::FinanceTeam),
            _ => None,
        }
    }

    /// Roles allowed to cancel requests they did not open.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: PrincipalId(id.into()), role }
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn role_tokens_parse_case_insensitively() {
        assert_eq!(Role::parse(" Department_Head "), Some(Role::DepartmentHead));
        assert_eq!(Role::parse("FINANCE_TEAM"), Some(Role::FinanceTeam));
        assert_eq!(Role::parse("intern"), None);
    }

    #[test]
    fn only_admin_and_manager_are_elevated() {
        assert!(Role::Admin.is_elevated());
        assert!(Role::Manager.is_elevated());
        assert!(!Role::Supervisor.is_elevated());
        assert!(!Role::DepartmentHead.is_elevated());
    }
}
