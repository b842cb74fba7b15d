//! Typed access to the directory resources: users, groups, roles and permissions.
//!
//! Users, groups and roles share the same CRUD shape, described by [`Resource`]. Deletes are
//! soft unless [`DeleteMode::Permanent`] is passed.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::errors::Result;
use crate::http::{ApiClient, ApiRequest};
use crate::models::{
    DeleteMode, Group, GroupCreate, GroupId, GroupUpdate, Permission, PermissionId, Role, RoleCreate, RoleId, RoleUpdate, User, UserCreate,
    UserId, UserUpdate,
};

/// A collection exposed under `/{PATH}` with list, get, create, update and delete.
pub trait Resource: DeserializeOwned + Send {
    const PATH: &'static str;
    type Create: Serialize + Sync;
    type Update: Serialize + Sync;
}

impl Resource for User {
    const PATH: &'static str = "users";
    type Create = UserCreate;
    type Update = UserUpdate;
}

impl Resource for Group {
    const PATH: &'static str = "groups";
    type Create = GroupCreate;
    type Update = GroupUpdate;
}

impl Resource for Role {
    const PATH: &'static str = "roles";
    type Create = RoleCreate;
    type Update = RoleUpdate;
}

/// Pagination and soft-delete filter for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
    /// Include soft-deleted rows
    pub include_deleted: bool,
}

impl ListQuery {
    fn apply(&self, mut request: ApiRequest) -> ApiRequest {
        if let Some(skip) = self.skip {
            request = request.query("skip", skip);
        }
        if let Some(limit) = self.limit {
            request = request.query("limit", limit);
        }
        if self.include_deleted {
            request = request.query("include_deleted", true);
        }
        request
    }
}

pub struct Resources<'c> {
    client: &'c ApiClient,
}

impl<'c> Resources<'c> {
    pub fn new(client: &'c ApiClient) -> Self {
        Self { client }
    }

    #[instrument(skip(self), fields(resource = R::PATH))]
    pub async fn list<R: Resource>(&self, query: &ListQuery) -> Result<Vec<R>> {
        self.client.send_json(query.apply(ApiRequest::get(R::PATH))).await
    }

    #[instrument(skip(self), fields(resource = R::PATH))]
    pub async fn get<R: Resource>(&self, id: &str) -> Result<R> {
        self.client.get_json(&format!("{}/{id}", R::PATH)).await
    }

    #[instrument(skip_all, fields(resource = R::PATH))]
    pub async fn create<R: Resource>(&self, body: &R::Create) -> Result<R> {
        self.client.send_json(ApiRequest::post(R::PATH).json(body)?).await
    }

    #[instrument(skip(self, body), fields(resource = R::PATH))]
    pub async fn update<R: Resource>(&self, id: &str, body: &R::Update) -> Result<R> {
        self.client.send_json(ApiRequest::patch(format!("{}/{id}", R::PATH)).json(body)?).await
    }

    /// Delete an entity. A soft delete keeps the row and marks it `is_deleted`.
    #[instrument(skip(self), fields(resource = R::PATH))]
    pub async fn delete<R: Resource>(&self, id: &str, mode: DeleteMode) -> Result<()> {
        let mut request = ApiRequest::delete(format!("{}/{id}", R::PATH));
        if mode == DeleteMode::Permanent {
            request = request.query("permanent", true);
        }
        self.client.send_empty(request).await?;
        tracing::info!(id, ?mode, "Deleted {}", R::PATH);
        Ok(())
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.client.get_json("permissions").await
    }

    #[instrument(skip(self))]
    pub async fn add_member(&self, group: &GroupId, user: &UserId) -> Result<()> {
        self.client.send_empty(ApiRequest::post(format!("groups/{group}/members/{user}"))).await
    }

    #[instrument(skip(self))]
    pub async fn remove_member(&self, group: &GroupId, user: &UserId) -> Result<()> {
        self.client.send_empty(ApiRequest::delete(format!("groups/{group}/members/{user}"))).await
    }

    #[instrument(skip(self))]
    pub async fn grant_permission(&self, role: &RoleId, permission: &PermissionId) -> Result<()> {
        self.client.send_empty(ApiRequest::post(format!("roles/{role}/permissions/{permission}"))).await
    }

    #[instrument(skip(self))]
    pub async fn revoke_permission(&self, role: &RoleId, permission: &PermissionId) -> Result<()> {
        self.client
            .send_empty(ApiRequest::delete(format!("roles/{role}/permissions/{permission}")))
            .await
    }
}
