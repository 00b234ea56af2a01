use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::Context;
use crate::error::AppError;
use crate::models::user::{Role, User};

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Clone)]
pub struct AccountService {
    ctx: Context,
}

impl AccountService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn register_user(&self, new_user: NewUser) -> Result<User, AppError> {
        if new_user.name.trim().is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }
        if !new_user.email.contains('@') {
            return Err(AppError::BadRequest("email is not valid".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name.trim().to_string(),
            email: new_user.email.trim().to_string(),
            role: new_user.role,
            created_at: Utc::now(),
        };

        let user = self.ctx.store.insert_user(user).await?;
        info!(user_id = %user.id, role = ?user.role, "user registered");

        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let mut users = self.ctx.store.list_users().await?;
        users.sort_by_key(|user| user.created_at);
        Ok(users)
    }
}
