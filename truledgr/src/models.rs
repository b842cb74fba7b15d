//! Server-side directory entities: users, groups, roles and permissions.
//!
//! Every entity carries audit timestamps and soft-delete markers. A soft-deleted row keeps its
//! id and history; it only disappears when deleted with [`DeleteMode::Permanent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Entity identifier. The API has used both integer and string ids, so both are accepted and
/// normalized to a string.
pub type EntityId = String;
pub type UserId = EntityId;
pub type GroupId = EntityId;
pub type RoleId = EntityId;
pub type PermissionId = EntityId;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for EntityId {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

pub(crate) fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<EntityId, D::Error> {
    RawId::deserialize(deserializer).map(Into::into)
}

pub(crate) fn deserialize_optional_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<EntityId>, D::Error> {
    Option::<RawId>::deserialize(deserializer).map(|id| id.map(Into::into))
}

/// `created_at` / `updated_at` audit columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTimestamps {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `is_deleted` / `deleted_at` soft-delete columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDelete {
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDelete {
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

/// How a DELETE request removes an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteMode {
    /// Mark as deleted; the row stays for audit history
    #[default]
    Soft,
    /// Remove the row
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub role_id: Option<RoleId>,
    #[serde(flatten)]
    pub timestamps: AuditTimestamps,
    #[serde(flatten)]
    pub deletion: SoftDelete,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCreate {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<RoleId>,
    /// Setting this to `false` restores a soft-deleted user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub timestamps: AuditTimestamps,
    #[serde(flatten)]
    pub deletion: SoftDelete,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: PermissionId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub timestamps: AuditTimestamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Present when the API embeds the role's permissions
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(flatten)]
    pub timestamps: AuditTimestamps,
    #[serde(flatten)]
    pub deletion: SoftDelete,
}

impl Role {
    pub fn has_permission(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_accepts_numeric_and_string_ids() {
        let numeric: User = serde_json::from_value(json!({
            "id": 42,
            "username": "ada",
            "email": "ada@example.com",
            "role_id": 3
        }))
        .unwrap();
        assert_eq!(numeric.id, "42");
        assert_eq!(numeric.role_id.as_deref(), Some("3"));
        assert!(numeric.deletion.is_active());

        let textual: User = serde_json::from_value(json!({
            "id": "01HZX3",
            "username": "ada",
            "email": "ada@example.com",
            "role_id": null
        }))
        .unwrap();
        assert_eq!(textual.id, "01HZX3");
        assert_eq!(textual.role_id, None);
    }

    #[test]
    fn test_soft_delete_mixin_flattened() {
        let group: Group = serde_json::from_value(json!({
            "id": 1,
            "name": "household",
            "created_at": "2025-01-02T03:04:05Z",
            "updated_at": "2025-01-03T03:04:05Z",
            "is_deleted": true,
            "deleted_at": "2025-02-01T00:00:00Z"
        }))
        .unwrap();

        assert!(!group.deletion.is_active());
        assert!(group.deletion.deleted_at.is_some());
        assert!(group.timestamps.created_at.unwrap() < group.timestamps.updated_at.unwrap());
    }

    #[test]
    fn test_role_permissions() {
        let role: Role = serde_json::from_value(json!({
            "id": 2,
            "name": "admin",
            "permissions": [
                {"id": 1, "name": "users:read"},
                {"id": 2, "name": "users:write"}
            ]
        }))
        .unwrap();

        assert!(role.has_permission("users:write"));
        assert!(!role.has_permission("groups:delete"));
    }

    #[test]
    fn test_update_skips_unset_fields() {
        let update = UserUpdate {
            email: Some("new@example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"email": "new@example.com"}));
    }
}
