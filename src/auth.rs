//! Role and capability model.
//!
//! Handlers never branch on roles directly; they ask `role_allows` with the
//! resource and action they are about to touch.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    Admin,
    Moderator,
    Teacher,
    Parent,
    Student,
    Cook,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUPER_ADMIN" => Some(Role::SuperAdmin),
            "ADMIN" => Some(Role::Admin),
            "MODERATOR" => Some(Role::Moderator),
            "TEACHER" => Some(Role::Teacher),
            "PARENT" => Some(Role::Parent),
            "STUDENT" => Some(Role::Student),
            "COOK" => Some(Role::Cook),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Admin => "ADMIN",
            Role::Moderator => "MODERATOR",
            Role::Teacher => "TEACHER",
            Role::Parent => "PARENT",
            Role::Student => "STUDENT",
            Role::Cook => "COOK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Tenants,
    Students,
    Payments,
    Settings,
    Backups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Manage,
}

/// The one capability matrix. Tenant creation/deletion stays platform-level;
/// everything else an ADMIN can do within its tenant.
pub fn role_allows(role: Role, resource: Resource, action: Action) -> bool {
    use Action::*;
    use Resource::*;

    match role {
        Role::SuperAdmin => true,
        Role::Admin => !matches!((resource, action), (Tenants, Manage)),
        Role::Moderator => matches!(
            (resource, action),
            (Students, _) | (Payments, Read) | (Settings, Read)
        ),
        Role::Teacher => matches!((resource, action), (Students, Read) | (Settings, Read)),
        Role::Parent | Role::Student => {
            matches!((resource, action), (Payments, Read) | (Settings, Read))
        }
        Role::Cook => matches!((resource, action), (Settings, Read)),
    }
}
