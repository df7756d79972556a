//! The resolved caller identity passed into every domain operation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role of an authenticated caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Technician,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Technician => "technician",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "customer" => Some(Role::Customer),
            "technician" => Some(Role::Technician),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role tag plus id, computed once per request by the auth extractor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Principal {
    pub role: Role,
    pub id: Uuid,
}

impl Principal {
    pub fn new(role: Role, id: Uuid) -> Self {
        Self { role, id }
    }

    pub fn customer(id: Uuid) -> Self {
        Self::new(Role::Customer, id)
    }

    pub fn technician(id: Uuid) -> Self {
        Self::new(Role::Technician, id)
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(Role::Admin, id)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}
