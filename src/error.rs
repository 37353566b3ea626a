use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Every outcome an auth endpoint can report to the client.
///
/// Messages are what the frontend shows verbatim. The sign-in messages tell
/// "unknown email" apart from "wrong password", which reveals whether an
/// address is registered.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("Email already exists")]
    EmailTaken,
    #[error("Email not found")]
    EmailNotFound,
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error("Error occured while loging in, please try again")]
    CredentialCheck,
    #[error("Account was created using google. Try logging in with google.")]
    UseGoogle,
    #[error("This email was signed up without google. Please log in with password to access the account")]
    UsePassword,
    #[error("Failed to authenticate you with google. Try with some other google account")]
    GoogleVerification,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("User not found")]
    UnknownUser,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::EmailNotFound
            | AuthError::IncorrectPassword
            | AuthError::CredentialCheck
            | AuthError::UseGoogle
            | AuthError::UsePassword => StatusCode::FORBIDDEN,
            AuthError::Unauthorized(_) | AuthError::UnknownUser => StatusCode::UNAUTHORIZED,
            AuthError::EmailTaken | AuthError::GoogleVerification | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_class() {
        assert_eq!(AuthError::Validation("Enter Email").status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::EmailNotFound.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::UsePassword.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::EmailTaken.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            AuthError::GoogleVerification.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AuthError::UnknownUser.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let res = AuthError::Internal(anyhow::anyhow!("pool timed out")).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("pool"));
    }
}
