use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoginAttempt {
    pub id: i64,
    pub username: String,
    pub ip_address: String,
    pub user_agent: String,
    pub success: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewLoginAttempt {
    pub username: String,
    pub ip_address: String,
    pub user_agent: String,
    pub success: bool,
    pub created_at: i64,
}
