use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub fullname: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // None for google-only accounts
    pub profile_img: String,
    pub google_auth: bool,
    pub created_at: OffsetDateTime,
}

/// Fields supplied by a sign-up flow; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub fullname: String,
    pub password_hash: Option<String>,
    pub profile_img: String,
    pub google_auth: bool,
}

/// Which unique index rejected an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Username,
}
