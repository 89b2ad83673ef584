use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Caller identity as resolved by the outer shell. The daemon never
    /// authenticates; it only scopes and gates on what arrives here.
    #[serde(default)]
    pub actor: Option<Actor>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Actor {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: Role,
    #[serde(rename = "schoolId")]
    pub school_id: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Guardian,
    Student,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
