use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Project-scoped role, ordered by precedence.
///
/// `Owner ⊇ Contributor ⊇ Approver ⊇ Viewer`: a higher role satisfies every
/// check that requires a lower one. Legacy role strings are normalized once
/// through [`Role::parse`]; nothing downstream compares role strings.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Approver,
    Contributor,
    Owner,
}

impl Role {
    /// Normalizes a role string, including legacy aliases. Unknown strings
    /// map to `None`, which denies every action.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "owner" | "admin" | "project_admin" | "project-admin" => Some(Role::Owner),
            "contributor" | "editor" | "maintainer" | "writer" | "write" => {
                Some(Role::Contributor)
            }
            "approver" | "reviewer" | "steward" => Some(Role::Approver),
            "viewer" | "reader" | "read" | "guest" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Approver => "approver",
            Role::Contributor => "contributor",
            Role::Owner => "owner",
        }
    }

    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ProposeChange,
    Decide,
    Withdraw,
    Read,
    /// Direct overwrite of canonical rows and rule maintenance.
    ManageDataset,
}

impl Action {
    /// Minimum role for the action. `Withdraw` is requester-bound and has no
    /// role floor.
    pub fn minimum_role(self) -> Option<Role> {
        match self {
            Action::ProposeChange => Some(Role::Contributor),
            Action::Decide => Some(Role::Approver),
            Action::Read => Some(Role::Viewer),
            Action::ManageDataset => Some(Role::Owner),
            Action::Withdraw => None,
        }
    }
}

/// Role-only permission check. Absence of a role denies every action.
pub fn allowed(role: Option<Role>, action: Action) -> bool {
    match (role, action.minimum_role()) {
        (Some(role), Some(required)) => role.satisfies(required),
        _ => false,
    }
}

/// Identity supplied by the session layer for one call. The gate trusts this
/// input; no credential verification happens here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerContext {
    pub actor_id: String,
    #[serde(default)]
    project_roles: BTreeMap<String, Role>,
}

impl CallerContext {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            project_roles: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, project_id: impl Into<String>, role: Role) -> Self {
        self.project_roles.insert(project_id.into(), role);
        self
    }

    /// Attaches a raw role string; unknown aliases are dropped.
    pub fn with_role_str(self, project_id: impl Into<String>, raw: &str) -> Self {
        match Role::parse(raw) {
            Some(role) => self.with_role(project_id, role),
            None => self,
        }
    }

    pub fn role_for(&self, project_id: &str) -> Option<Role> {
        self.project_roles.get(project_id).copied()
    }
}

/// Access Gate decisions for the change-request operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGate;

impl AccessGate {
    pub fn can_propose(caller: &CallerContext, project_id: &str) -> bool {
        allowed(caller.role_for(project_id), Action::ProposeChange)
    }

    /// Assigned reviewers may decide regardless of role.
    pub fn can_decide(caller: &CallerContext, project_id: &str, reviewers: &[String]) -> bool {
        reviewers.iter().any(|r| r == &caller.actor_id)
            || allowed(caller.role_for(project_id), Action::Decide)
    }

    pub fn can_withdraw(caller: &CallerContext, requester_id: &str) -> bool {
        caller.actor_id == requester_id
    }

    pub fn can_read(caller: &CallerContext, project_id: &str) -> bool {
        allowed(caller.role_for(project_id), Action::Read)
    }

    pub fn can_manage(caller: &CallerContext, project_id: &str) -> bool {
        allowed(caller.role_for(project_id), Action::ManageDataset)
    }
}
