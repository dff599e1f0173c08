//! Session and access control
//!
//! Resolves the signed-in user through an allowlist store and gates the
//! privileged actions. Protection rules are enforced here, before the store
//! is contacted, so any store implementation gets the same behavior.

mod http_client;

pub use http_client::HttpAllowlistClient;

use crate::db::{Database, DbError, Role, User};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// The built-in administrator id
pub const ADMIN_ID: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("Not signed in")]
    NotLoggedIn,
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("User ID is required")]
    MissingId,
    #[error("Not permitted: {0}")]
    Forbidden(String),
    #[error("User cannot be removed: {0}")]
    ProtectedUser(String),
    #[error("User already exists: {0}")]
    DuplicateUser(String),
    #[error("Allowlist store error: {0}")]
    Store(String),
}

impl From<DbError> for AccessError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::UserNotFound(id) => AccessError::AccessDenied(format!("user {id} not found")),
            DbError::DuplicateUser(id) => AccessError::DuplicateUser(id),
            DbError::Sqlite(e) => AccessError::Store(e.to_string()),
        }
    }
}

/// Login request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// New allowlist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The allowlist collaborator
#[async_trait]
pub trait AllowlistStore: Send + Sync {
    /// Look up an allowlisted user, updating the stored name if a new one is given
    async fn login(&self, id: &str, name: Option<&str>) -> Result<User, AccessError>;

    async fn list_users(&self) -> Result<Vec<User>, AccessError>;

    async fn add_user(&self, user: &NewUser) -> Result<User, AccessError>;

    async fn remove_user(&self, id: &str) -> Result<(), AccessError>;
}

#[async_trait]
impl<T: AllowlistStore + ?Sized> AllowlistStore for Arc<T> {
    async fn login(&self, id: &str, name: Option<&str>) -> Result<User, AccessError> {
        (**self).login(id, name).await
    }

    async fn list_users(&self) -> Result<Vec<User>, AccessError> {
        (**self).list_users().await
    }

    async fn add_user(&self, user: &NewUser) -> Result<User, AccessError> {
        (**self).add_user(user).await
    }

    async fn remove_user(&self, id: &str) -> Result<(), AccessError> {
        (**self).remove_user(id).await
    }
}

/// Allowlist backed by the local database
#[derive(Clone)]
pub struct DatabaseAllowlist {
    db: Database,
}

impl DatabaseAllowlist {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AllowlistStore for DatabaseAllowlist {
    async fn login(&self, id: &str, name: Option<&str>) -> Result<User, AccessError> {
        Ok(self.db.login(id, name)?)
    }

    async fn list_users(&self) -> Result<Vec<User>, AccessError> {
        Ok(self.db.list_users()?)
    }

    async fn add_user(&self, user: &NewUser) -> Result<User, AccessError> {
        Ok(self.db.add_user(&user.id, user.name.as_deref(), user.role)?)
    }

    async fn remove_user(&self, id: &str) -> Result<(), AccessError> {
        self.db.remove_user(id)?;
        Ok(())
    }
}

/// Current user plus the privileged operations they may perform
pub struct AccessController<S> {
    store: S,
    current: Option<User>,
    /// Last fetched allowlist, used for removal checks
    users: Vec<User>,
}

impl<S: AllowlistStore> AccessController<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            current: None,
            users: Vec::new(),
        }
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current.as_ref()
    }

    pub async fn login(&mut self, id: &str, name: Option<&str>) -> Result<User, AccessError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AccessError::MissingId);
        }
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        let user = self.store.login(id, name).await?;
        tracing::info!(user_id = %user.id, name = %user.display_name(), role = %user.role, "User signed in");
        self.current = Some(user.clone());
        self.users.clear();
        Ok(user)
    }

    pub fn logout(&mut self) {
        if let Some(user) = self.current.take() {
            tracing::info!(user_id = %user.id, "User signed out");
        }
        self.users.clear();
    }

    pub fn can_upload(&self) -> bool {
        self.current.as_ref().is_some_and(|u| u.role.is_privileged())
    }

    pub fn can_manage_users(&self) -> bool {
        self.can_upload()
    }

    /// Roles the current user may grant
    pub fn grantable_roles(&self) -> Vec<Role> {
        match self.current.as_ref().map(|u| u.role) {
            Some(Role::Admin) => vec![Role::Admin, Role::SuperUser, Role::User],
            Some(Role::SuperUser) => vec![Role::SuperUser, Role::User],
            _ => vec![],
        }
    }

    fn require_manager(&self) -> Result<&User, AccessError> {
        let user = self.current.as_ref().ok_or(AccessError::NotLoggedIn)?;
        if !user.role.is_privileged() {
            return Err(AccessError::Forbidden(
                "only administrators and super users can manage users".into(),
            ));
        }
        Ok(user)
    }

    pub async fn list_users(&mut self) -> Result<Vec<User>, AccessError> {
        self.require_manager()?;
        let users = self.store.list_users().await?;
        self.users.clone_from(&users);
        Ok(users)
    }

    pub async fn add_user(&mut self, new_user: NewUser) -> Result<User, AccessError> {
        let actor = self.require_manager()?;
        let id = new_user.id.trim().to_string();
        if id.is_empty() {
            return Err(AccessError::MissingId);
        }
        if new_user.role == Role::Admin && actor.role != Role::Admin {
            return Err(AccessError::Forbidden(
                "only an administrator can grant the admin role".into(),
            ));
        }

        let new_user = NewUser {
            id,
            name: new_user.name.filter(|n| !n.trim().is_empty()),
            ..new_user
        };
        let user = self.store.add_user(&new_user).await?;
        tracing::info!(user_id = %user.id, role = %user.role, "User added");
        self.users.push(user.clone());
        Ok(user)
    }

    pub async fn remove_user(&mut self, id: &str) -> Result<(), AccessError> {
        let actor = self.require_manager()?;
        if id.eq_ignore_ascii_case(ADMIN_ID) {
            return Err(AccessError::ProtectedUser(
                "the built-in administrator cannot be removed".into(),
            ));
        }
        if id == actor.id {
            return Err(AccessError::ProtectedUser("you cannot remove yourself".into()));
        }
        let actor_is_admin = actor.role == Role::Admin;

        if !actor_is_admin {
            // Roles may have changed through another client since the last listing
            self.users = self.store.list_users().await?;
            let target_is_admin = self
                .users
                .iter()
                .any(|u| u.id == id && u.role == Role::Admin);
            if target_is_admin {
                return Err(AccessError::ProtectedUser(
                    "only an administrator can remove another administrator".into(),
                ));
            }
        }

        self.store.remove_user(id).await?;
        tracing::info!(user_id = %id, "User removed");
        self.users.retain(|u| u.id != id);
        Ok(())
    }
}
