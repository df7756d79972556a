//! Receipt attachments recorded on a service request
//!
//! Every entry has one shape. Entries written before uploader tracking
//! existed carry no uploader role and are treated as technician uploads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{WorkflowError, WorkflowResult};
use super::principal::{Principal, Role};

/// Maximum number of files accepted by a single upload call
pub const MAX_FILES_PER_UPLOAD: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptAttachment {
    pub path: String,
    #[serde(default)]
    pub uploaded_by_type: Option<Role>,
    #[serde(default)]
    pub uploaded_by_id: Option<Uuid>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl ReceiptAttachment {
    pub fn new(path: impl Into<String>, uploader: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            uploaded_by_type: Some(uploader.role),
            uploaded_by_id: Some(uploader.id),
            uploaded_at: Some(now),
        }
    }

    /// Uploader role used for removal rules
    pub fn effective_uploader_role(&self) -> Role {
        self.uploaded_by_type.unwrap_or(Role::Technician)
    }

    pub fn matches_path(&self, path: &str) -> bool {
        normalize_path(&self.path) == normalize_path(path)
    }
}

/// Case-insensitive, slash-normalized form of a stored path
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
        .to_lowercase()
}

/// Check whether `principal` may remove `attachment`.
///
/// `bound` is true when the principal is the customer or technician recorded
/// on the owning service request.
pub fn ensure_can_remove(
    principal: &Principal,
    bound: bool,
    attachment: &ReceiptAttachment,
) -> WorkflowResult<()> {
    let uploader_role = attachment.effective_uploader_role();

    if principal.is_admin() {
        if uploader_role == Role::Technician {
            return Err(WorkflowError::Forbidden(
                "Admins cannot remove receipts uploaded by the technician".to_string(),
            ));
        }
        return Ok(());
    }

    if !bound {
        return Err(WorkflowError::Forbidden(
            "You are not part of this service request".to_string(),
        ));
    }

    let same_role = uploader_role == principal.role;
    let same_uploader = attachment
        .uploaded_by_id
        .map_or(true, |id| id == principal.id);

    if same_role && same_uploader {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden(
            "You can only remove receipts you uploaded".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded_by(principal: &Principal) -> ReceiptAttachment {
        ReceiptAttachment::new("receipts/abc/photo.jpg", principal, Utc::now())
    }

    #[test]
    fn normalizes_case_and_slashes() {
        assert_eq!(
            normalize_path("\\Receipts\\ABC//Photo.JPG "),
            "receipts/abc/photo.jpg"
        );
        assert!(uploaded_by(&Principal::customer(Uuid::new_v4()))
            .matches_path("/receipts/ABC/photo.jpg"));
    }

    #[test]
    fn legacy_entries_count_as_technician_uploads() {
        let legacy: ReceiptAttachment =
            serde_json::from_value(serde_json::json!({ "path": "receipts/old.png" })).unwrap();
        assert_eq!(legacy.effective_uploader_role(), Role::Technician);
    }

    #[test]
    fn admin_cannot_remove_technician_uploads() {
        let tech = Principal::technician(Uuid::new_v4());
        let admin = Principal::admin(Uuid::new_v4());
        let err = ensure_can_remove(&admin, false, &uploaded_by(&tech)).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn admin_may_remove_customer_and_admin_uploads() {
        let admin = Principal::admin(Uuid::new_v4());
        let customer = Principal::customer(Uuid::new_v4());
        let other_admin = Principal::admin(Uuid::new_v4());
        assert!(ensure_can_remove(&admin, false, &uploaded_by(&customer)).is_ok());
        assert!(ensure_can_remove(&admin, false, &uploaded_by(&other_admin)).is_ok());
    }

    #[test]
    fn participants_only_remove_their_own_uploads() {
        let customer = Principal::customer(Uuid::new_v4());
        let tech = Principal::technician(Uuid::new_v4());

        assert!(ensure_can_remove(&customer, true, &uploaded_by(&customer)).is_ok());
        assert!(ensure_can_remove(&tech, true, &uploaded_by(&customer)).is_err());
        assert!(ensure_can_remove(&customer, true, &uploaded_by(&tech)).is_err());

        // Bound technician may clean up legacy entries without an uploader id
        let legacy = ReceiptAttachment {
            path: "receipts/legacy.pdf".into(),
            uploaded_by_type: None,
            uploaded_by_id: None,
            uploaded_at: None,
        };
        assert!(ensure_can_remove(&tech, true, &legacy).is_ok());
        assert!(ensure_can_remove(&customer, true, &legacy).is_err());
    }

    #[test]
    fn unbound_participants_are_rejected() {
        let customer = Principal::customer(Uuid::new_v4());
        let err = ensure_can_remove(&customer, false, &uploaded_by(&customer)).unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }
}
