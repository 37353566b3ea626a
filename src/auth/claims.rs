use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access token payload. No `exp`: a token stays valid
/// until the signing secret is rotated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: Uuid,   // user ID
    pub iat: usize, // issued at (unix timestamp)
}
