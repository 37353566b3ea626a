use serde::{Deserialize, Serialize};

/// Request body for local sign-up. Missing fields arrive as empty strings
/// and are reported by validation.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request body for local sign-in.
#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Request body for Google sign-in: the provider-issued ID token.
#[derive(Debug, Deserialize)]
pub struct GoogleAuthRequest {
    #[serde(default)]
    pub access_token: String,
}

/// Response returned after any successful sign-up or sign-in.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub profile_img: String,
    pub username: String,
    pub fullname: String,
}

/// Public part of the user returned by `/me`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicUser {
    pub profile_img: String,
    pub username: String,
    pub fullname: String,
}
