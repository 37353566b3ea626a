use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, seq::SliceRandom, Rng};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::{
    auth::{
        dto::{AuthResponse, SigninRequest, SignupRequest},
        google::{normalize_picture, FederatedIdentity},
        password::{hash_password_blocking, verify_password_blocking},
        repo::{StoreError, UserStore},
        repo_types::{NewUser, UniqueField, User},
    },
    error::AuthError,
    state::AppState,
};

const USERNAME_SUFFIX_LEN: usize = 5;
const USERNAME_INSERT_ATTEMPTS: usize = 3;

const AVATAR_COLLECTIONS: &[&str] = &["notionists-neutral", "adventurer-neutral", "fun-emoji"];
const AVATAR_SEEDS: &[&str] = &[
    "Garfield", "Tinkerbell", "Annie", "Loki", "Cleo", "Angel", "Bob", "Mia", "Coco", "Gracie",
    "Bear", "Bella", "Abby", "Harley", "Cali", "Leo", "Luna", "Jack", "Felix", "Kiki",
];

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(
            r"^[A-Za-z0-9_]+([.-]?[A-Za-z0-9_]+)*@[A-Za-z0-9_]+([.-]?[A-Za-z0-9_]+)*(\.[A-Za-z0-9_]{2,3})+$"
        )
        .unwrap();
    }
    EMAIL_RE.is_match(email)
}

const LINE_TERMINATORS: [char; 4] = ['\n', '\r', '\u{2028}', '\u{2029}'];

/// Lengths are counted in UTF-16 code units, the way the browser form counts them.
fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// 6 to 20 characters on a single line, with a digit, a lowercase and an uppercase letter.
pub(crate) fn is_valid_password(password: &str) -> bool {
    (6..=20).contains(&utf16_len(password))
        && !password.contains(LINE_TERMINATORS)
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
}

/// Checks run in a fixed order; the first failure is the one reported.
pub(crate) fn validate_signup(req: &SignupRequest) -> Result<(), AuthError> {
    if utf16_len(&req.fullname) < 3 {
        return Err(AuthError::Validation("Full name must be at least 3 letters long"));
    }
    if req.email.is_empty() {
        return Err(AuthError::Validation("Enter Email"));
    }
    if !is_valid_email(&req.email) {
        return Err(AuthError::Validation("Email is invalid"));
    }
    if !is_valid_password(&req.password) {
        return Err(AuthError::Validation(
            "Password should be 6 to 20 characters long with a numeric, 1 lowercase and 1 uppercase letters",
        ));
    }
    Ok(())
}

fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(USERNAME_SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Derive a handle from the email's local part. A taken handle gets a random
/// suffix, which is not checked again.
pub async fn generate_username(store: &dyn UserStore, email: &str) -> anyhow::Result<String> {
    let base = email_local_part(email);
    if store.username_exists(base).await? {
        return Ok(format!("{base}{}", random_suffix()));
    }
    Ok(base.to_string())
}

pub fn default_profile_img() -> String {
    let mut rng = rand::thread_rng();
    let collection = AVATAR_COLLECTIONS.choose(&mut rng).unwrap_or(&"fun-emoji");
    let seed = AVATAR_SEEDS.choose(&mut rng).unwrap_or(&"Felix");
    format!("https://api.dicebear.com/6.x/{collection}/svg?seed={seed}")
}

/// Insert with a generated username. A lost race on the username index is
/// retried with a fresh suffix; a duplicate email is returned as is.
async fn insert_with_username(
    store: &dyn UserStore,
    mut user: NewUser,
) -> Result<User, StoreError> {
    let base = email_local_part(&user.email).to_string();
    user.username = generate_username(store, &user.email).await?;

    let mut attempt = 1;
    loop {
        match store.insert(user.clone()).await {
            Err(StoreError::Duplicate(UniqueField::Username)) if attempt < USERNAME_INSERT_ATTEMPTS => {
                warn!(username = %user.username, attempt, "username taken on insert, retrying");
                user.username = format!("{base}{}", random_suffix());
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn auth_response(state: &AppState, user: &User) -> Result<AuthResponse, AuthError> {
    let access_token = state.keys.sign(user.id).map_err(|e| {
        error!(error = %e, user_id = %user.id, "jwt sign failed");
        AuthError::Internal(e)
    })?;
    Ok(AuthResponse {
        access_token,
        profile_img: user.profile_img.clone(),
        username: user.username.clone(),
        fullname: user.fullname.clone(),
    })
}

pub async fn signup(state: &AppState, req: SignupRequest) -> Result<AuthResponse, AuthError> {
    if let Err(e) = validate_signup(&req) {
        warn!(email = %req.email, reason = %e, "signup rejected");
        return Err(e);
    }

    let SignupRequest {
        fullname,
        email,
        password,
    } = req;

    let password_hash = hash_password_blocking(password).await.map_err(|e| {
        error!(error = %e, "hash_password failed");
        AuthError::Internal(e)
    })?;

    let new_user = NewUser {
        email,
        username: String::new(),
        fullname,
        password_hash: Some(password_hash),
        profile_img: default_profile_img(),
        google_auth: false,
    };

    let user = match insert_with_username(state.users.as_ref(), new_user).await {
        Ok(u) => u,
        Err(StoreError::Duplicate(UniqueField::Email)) => {
            warn!("signup with registered email");
            return Err(AuthError::EmailTaken);
        }
        Err(StoreError::Duplicate(UniqueField::Username)) => {
            error!("username retries exhausted");
            return Err(AuthError::Internal(anyhow::anyhow!("username retries exhausted")));
        }
        Err(StoreError::Other(e)) => {
            error!(error = %e, "create user failed");
            return Err(AuthError::Internal(e));
        }
    };

    info!(user_id = %user.id, username = %user.username, "user signed up");
    auth_response(state, &user)
}

pub async fn signin(state: &AppState, req: SigninRequest) -> Result<AuthResponse, AuthError> {
    let user = match state.users.find_by_email(&req.email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %req.email, "signin unknown email");
            return Err(AuthError::EmailNotFound);
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err(AuthError::Internal(e));
        }
    };

    if user.google_auth {
        warn!(user_id = %user.id, "password signin on google account");
        return Err(AuthError::UseGoogle);
    }

    let Some(hash) = user.password_hash.clone() else {
        error!(user_id = %user.id, "local account without password hash");
        return Err(AuthError::CredentialCheck);
    };

    let ok = match verify_password_blocking(req.password, hash).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, user_id = %user.id, "verify_password failed");
            return Err(AuthError::CredentialCheck);
        }
    };

    if !ok {
        warn!(user_id = %user.id, "signin incorrect password");
        return Err(AuthError::IncorrectPassword);
    }

    info!(user_id = %user.id, "user signed in");
    auth_response(state, &user)
}

fn existing_google_account(user: User) -> Result<User, AuthError> {
    if user.google_auth {
        Ok(user)
    } else {
        warn!(user_id = %user.id, "google signin on password account");
        Err(AuthError::UsePassword)
    }
}

pub async fn google_auth(state: &AppState, provider_token: &str) -> Result<AuthResponse, AuthError> {
    let identity = match state.verifier.verify(provider_token).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "google token verification failed");
            return Err(AuthError::GoogleVerification);
        }
    };
    let FederatedIdentity {
        email,
        name,
        picture,
    } = identity;
    let picture = picture.as_deref().map(normalize_picture);

    let existing = state.users.find_by_email(&email).await.map_err(|e| {
        error!(error = %e, "find_by_email failed");
        AuthError::Internal(e)
    })?;

    let user = match existing {
        Some(user) => existing_google_account(user)?,
        None => {
            let new_user = NewUser {
                fullname: name.unwrap_or_else(|| email_local_part(&email).to_string()),
                email: email.clone(),
                username: String::new(),
                password_hash: None,
                profile_img: picture.unwrap_or_else(default_profile_img),
                google_auth: true,
            };
            match insert_with_username(state.users.as_ref(), new_user).await {
                Ok(u) => {
                    info!(user_id = %u.id, username = %u.username, "google account created");
                    u
                }
                Err(StoreError::Duplicate(UniqueField::Email)) => {
                    debug!("concurrent google signup, using the stored account");
                    let winner = state
                        .users
                        .find_by_email(&email)
                        .await
                        .map_err(AuthError::Internal)?
                        .ok_or_else(|| {
                            AuthError::Internal(anyhow::anyhow!("account vanished after conflict"))
                        })?;
                    existing_google_account(winner)?
                }
                Err(StoreError::Duplicate(UniqueField::Username)) => {
                    error!("username retries exhausted");
                    return Err(AuthError::Internal(anyhow::anyhow!(
                        "username retries exhausted"
                    )));
                }
                Err(StoreError::Other(e)) => {
                    error!(error = %e, "create google user failed");
                    return Err(AuthError::Internal(e));
                }
            }
        }
    };

    auth_response(state, &user)
}

pub async fn current_user(state: &AppState, user_id: uuid::Uuid) -> Result<User, AuthError> {
    match state.users.find_by_id(user_id).await {
        Ok(Some(u)) => Ok(u),
        Ok(None) => {
            warn!(user_id = %user_id, "token for unknown user");
            Err(AuthError::UnknownUser)
        }
        Err(e) => {
            error!(error = %e, user_id = %user_id, "find_by_id failed");
            Err(AuthError::Internal(e))
        }
    }
}
