use super::Claims;
use crate::domain::{Principal, Role};
use uuid::Uuid;

/// Authenticated caller resolved from a verified JWT
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Role tag and id handed to domain operations
    pub principal: Principal,

    /// Account email if available
    pub email: Option<String>,

    /// Display name from the token's profile metadata
    pub name: Option<String>,
}

impl AuthContext {
    pub fn from_claims(claims: &Claims) -> Result<Self, &'static str> {
        let id = Uuid::parse_str(&claims.sub).map_err(|_| "Invalid account ID in token")?;
        let role = claims
            .app_metadata
            .as_ref()
            .and_then(|meta| meta.account_type.as_deref())
            .and_then(Role::parse)
            .ok_or("Token does not carry a recognized account type")?;

        let name = claims
            .user_metadata
            .as_ref()
            .and_then(|meta| meta.full_name.as_deref().or(meta.name.as_deref()))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Ok(Self {
            principal: Principal::new(role, id),
            email: claims.email.clone(),
            name,
        })
    }

    /// Name shown to the other party when the token carries none
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let id = self.principal.id.simple().to_string();
                format!("{} {}", self.principal.role, &id[..8])
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{AppMetadata, UserMetadata};

    fn claims(sub: &str, account_type: Option<&str>) -> Claims {
        Claims {
            sub: sub.to_string(),
            aud: "authenticated".into(),
            iss: "https://id.example".into(),
            iat: 0,
            exp: i64::MAX,
            nbf: None,
            email: Some("tech@example.com".into()),
            app_metadata: Some(AppMetadata {
                account_type: account_type.map(str::to_string),
            }),
            user_metadata: None,
        }
    }

    #[test]
    fn resolves_principal_from_claims() {
        let id = Uuid::new_v4();
        let ctx = AuthContext::from_claims(&claims(&id.to_string(), Some("Technician"))).unwrap();
        assert_eq!(ctx.principal, Principal::technician(id));
        assert_eq!(ctx.email.as_deref(), Some("tech@example.com"));
    }

    #[test]
    fn rejects_unknown_roles_and_bad_subjects() {
        let id = Uuid::new_v4().to_string();
        assert!(AuthContext::from_claims(&claims(&id, None)).is_err());
        assert!(AuthContext::from_claims(&claims(&id, Some("superuser"))).is_err());
        assert!(AuthContext::from_claims(&claims("not-a-uuid", Some("admin"))).is_err());
    }

    #[test]
    fn display_name_prefers_profile_then_email() {
        let id = Uuid::new_v4();
        let mut with_profile = claims(&id.to_string(), Some("customer"));
        with_profile.user_metadata = Some(UserMetadata {
            full_name: Some("  Ada Lovelace ".into()),
            name: Some("ada".into()),
        });
        let ctx = AuthContext::from_claims(&with_profile).unwrap();
        assert_eq!(ctx.display_name(), "Ada Lovelace");

        let ctx = AuthContext::from_claims(&claims(&id.to_string(), Some("customer"))).unwrap();
        assert_eq!(ctx.display_name(), "tech");

        let mut bare = claims(&id.to_string(), Some("technician"));
        bare.email = None;
        let ctx = AuthContext::from_claims(&bare).unwrap();
        assert_eq!(
            ctx.display_name(),
            format!("technician {}", &id.simple().to_string()[..8])
        );
    }
}
