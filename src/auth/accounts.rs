//! Account rows provisioned from verified tokens
//!
//! The identity provider owns sign-up, so the first authenticated request of
//! an account creates its row in the table matching its role. Conversations,
//! reviews and service requests all reference those rows.

use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::AuthContext;
use crate::domain::Role;

/// Table holding the accounts of `role`
pub fn account_table(role: Role) -> &'static str {
    match role {
        Role::Customer => "customers",
        Role::Technician => "technicians",
        Role::Admin => "admins",
    }
}

/// Remembers which accounts already have a row so the upsert runs once per
/// account and process.
#[derive(Clone, Default)]
pub struct AccountRegistry {
    known: Arc<RwLock<HashSet<Uuid>>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_known(&self, id: Uuid) -> bool {
        self.known.read().contains(&id)
    }

    fn remember(&self, id: Uuid) {
        self.known.write().insert(id);
    }

    /// Insert the caller's account row if it does not exist yet
    pub async fn ensure(&self, db: &PgPool, context: &AuthContext) -> Result<(), sqlx::Error> {
        let principal = context.principal;
        if self.is_known(principal.id) {
            return Ok(());
        }

        let table = account_table(principal.role);
        let name = context.display_name();

        let inserted = sqlx::query(&format!(
            "INSERT INTO {table} (id, name, email) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"
        ))
        .bind(principal.id)
        .bind(&name)
        .bind(&context.email)
        .execute(db)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Either the row exists or the email belongs to another account
            sqlx::query(&format!(
                "INSERT INTO {table} (id, name, email) VALUES ($1, $2, NULL) ON CONFLICT (id) DO NOTHING"
            ))
            .bind(principal.id)
            .bind(&name)
            .execute(db)
            .await?;
        } else {
            tracing::info!(principal = %principal, "Provisioned account");
        }

        self.remember(principal.id);
        Ok(())
    }
}
