use std::{net::SocketAddr, time::Duration};

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth;
use crate::config::AppConfig;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    Router::new()
        .merge(auth::router())
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        async_trait,
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{
        google::{FederatedIdentity, IdentityVerifier},
        repo::{MemoryUserStore, UserStore},
    };

    /// Accepts tokens of the form `good:<email>`; anything else fails verification.
    struct FakeVerifier;

    #[async_trait]
    impl IdentityVerifier for FakeVerifier {
        async fn verify(&self, token: &str) -> anyhow::Result<FederatedIdentity> {
            let email = token
                .strip_prefix("good:")
                .ok_or_else(|| anyhow::anyhow!("signature mismatch for kid abc123"))?;
            Ok(FederatedIdentity {
                email: email.to_string(),
                name: Some("Grace Hopper".into()),
                picture: Some("https://lh3.googleusercontent.com/a/x=s96-c".into()),
            })
        }
    }

    struct Harness {
        app: Router,
        store: Arc<MemoryUserStore>,
        state: AppState,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryUserStore::default());
        let verifier = Arc::new(FakeVerifier);
        let state = AppState::from_parts(
            Arc::new(AppConfig::for_tests()),
            store.clone() as Arc<dyn UserStore>,
            verifier as Arc<dyn IdentityVerifier>,
        );
        Harness {
            app: build_app(state.clone()),
            store,
            state,
        }
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, req).await
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn ada() -> Value {
        json!({ "fullname": "Ada Lovelace", "email": "ada@example.com", "password": "Secret1" })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let h = harness();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let res = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn signup_returns_token_and_profile() {
        let h = harness();
        let (status, body) = post_json(&h.app, "/signup", ada()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["access_token"].as_str().unwrap().is_empty());
        assert_eq!(body["username"], "ada");
        assert_eq!(body["fullname"], "Ada Lovelace");
        assert!(body["profile_img"].as_str().unwrap().starts_with("https://"));
        assert!(body.get("password_hash").is_none());

        let stored = h.store.find_by_email("ada@example.com").await.unwrap().unwrap();
        assert!(!stored.google_auth);
        assert!(stored.password_hash.unwrap().starts_with("$argon2"));
    }

    #[tokio::test]
    async fn second_signup_with_same_email_conflicts() {
        let h = harness();
        let (status, _) = post_json(&h.app, "/signup", ada()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post_json(&h.app, "/signup", ada()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Email already exists");
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn colliding_local_part_gets_suffixed_username() {
        let h = harness();
        post_json(&h.app, "/signup", ada()).await;
        let (status, body) = post_json(
            &h.app,
            "/signup",
            json!({ "fullname": "Ada Byron", "email": "ada@other.org", "password": "Secret1" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let username = body["username"].as_str().unwrap();
        assert!(username.starts_with("ada"));
        assert_ne!(username, "ada");
        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test]
    async fn malformed_signups_are_rejected_without_writes() {
        let h = harness();
        let cases = [
            json!({ "fullname": "Ada Lovelace", "email": "", "password": "Secret1" }),
            json!({ "fullname": "Ad", "email": "ada@example.com", "password": "Secret1" }),
            json!({ "fullname": "Ada Lovelace", "email": "ada@example.com", "password": "abc" }),
            json!({ "fullname": "Ada Lovelace", "email": "ada@example.com", "password": "secret1" }),
            json!({ "fullname": "Ada Lovelace", "email": "ada@example.com", "password": "secret" }),
            json!({ "fullname": "Ada Lovelace", "email": "not-an-email", "password": "Secret1" }),
            json!({}),
        ];
        for case in cases {
            let (status, body) = post_json(&h.app, "/signup", case.clone()).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "case {case}");
            assert!(body["error"].is_string());
        }
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn weak_password_reports_policy() {
        let h = harness();
        let (status, body) = post_json(
            &h.app,
            "/signup",
            json!({ "fullname": "Ada Lovelace", "email": "ada@example.com", "password": "secret" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].as_str().unwrap().starts_with("Password should be 6 to 20"));
        assert!(h.store.find_by_email("ada@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn signin_roundtrip() {
        let h = harness();
        let (_, signed_up) = post_json(&h.app, "/signup", ada()).await;

        let (status, body) = post_json(
            &h.app,
            "/signin",
            json!({ "email": "ada@example.com", "password": "Secret1" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["access_token"].as_str().unwrap().is_empty());
        assert_eq!(body["username"], signed_up["username"]);
        assert_eq!(body["profile_img"], signed_up["profile_img"]);
    }

    #[tokio::test]
    async fn signin_wrong_password() {
        let h = harness();
        post_json(&h.app, "/signup", ada()).await;
        let (status, body) = post_json(
            &h.app,
            "/signin",
            json!({ "email": "ada@example.com", "password": "Secret2" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Incorrect password");
    }

    #[tokio::test]
    async fn signin_unknown_email() {
        let h = harness();
        let (status, body) = post_json(
            &h.app,
            "/signin",
            json!({ "email": "nobody@example.com", "password": "Secret1" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Email not found");
    }

    #[tokio::test]
    async fn signin_with_password_on_google_account_is_rejected() {
        let h = harness();
        let (status, _) =
            post_json(&h.app, "/google-auth", json!({ "access_token": "good:grace@example.com" }))
                .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post_json(
            &h.app,
            "/signin",
            json!({ "email": "grace@example.com", "password": "Secret1" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            body["error"],
            "Account was created using google. Try logging in with google."
        );
    }

    #[tokio::test]
    async fn google_first_signin_creates_one_account() {
        let h = harness();
        let (status, body) =
            post_json(&h.app, "/google-auth", json!({ "access_token": "good:grace@example.com" }))
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fullname"], "Grace Hopper");
        assert_eq!(body["username"], "grace");
        assert_eq!(body["profile_img"], "https://lh3.googleusercontent.com/a/x=s384-c");

        let stored = h.store.find_by_email("grace@example.com").await.unwrap().unwrap();
        assert!(stored.google_auth);
        assert!(stored.password_hash.is_none());

        let (status, again) =
            post_json(&h.app, "/google-auth", json!({ "access_token": "good:grace@example.com" }))
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["username"], "grace");
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn google_signin_on_local_account_is_rejected() {
        let h = harness();
        post_json(&h.app, "/signup", ada()).await;
        let before = h.store.find_by_email("ada@example.com").await.unwrap().unwrap();

        let (status, body) =
            post_json(&h.app, "/google-auth", json!({ "access_token": "good:ada@example.com" }))
                .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            body["error"],
            "This email was signed up without google. Please log in with password to access the account"
        );

        let after = h.store.find_by_email("ada@example.com").await.unwrap().unwrap();
        assert!(!after.google_auth);
        assert_eq!(after.password_hash, before.password_hash);
        assert_eq!(after.profile_img, before.profile_img);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn google_verification_failure_is_generic() {
        let h = harness();
        let (status, body) =
            post_json(&h.app, "/google-auth", json!({ "access_token": "forged" })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let msg = body["error"].as_str().unwrap();
        assert_eq!(
            msg,
            "Failed to authenticate you with google. Try with some other google account"
        );
        assert!(!msg.contains("kid"));
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn issued_token_resolves_to_me() {
        let h = harness();
        let (_, body) = post_json(&h.app, "/signup", ada()).await;
        let token = body["access_token"].as_str().unwrap();

        let claims = h.state.keys.verify(token).expect("issued token verifies");
        let stored = h.store.find_by_email("ada@example.com").await.unwrap().unwrap();
        assert_eq!(claims.id, stored.id);

        let req = Request::builder()
            .uri("/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, me) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["username"], "ada");
        assert_eq!(me["fullname"], "Ada Lovelace");
    }

    #[tokio::test]
    async fn me_requires_valid_bearer() {
        let h = harness();
        let req = Request::builder().uri("/me").body(Body::empty()).unwrap();
        let (status, _) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/me")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let stranger = h.state.keys.sign(uuid::Uuid::new_v4()).unwrap();
        let req = Request::builder()
            .uri("/me")
            .header(header::AUTHORIZATION, format!("Bearer {stranger}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "User not found");
    }

    #[tokio::test]
    async fn concurrent_signups_leave_one_record() {
        let h = harness();
        let a = post_json(&h.app, "/signup", ada());
        let b = post_json(&h.app, "/signup", ada());
        let ((sa, _), (sb, _)) = tokio::join!(a, b);
        let oks = [sa, sb].iter().filter(|s| **s == StatusCode::OK).count();
        assert_eq!(oks, 1);
        assert_eq!(h.store.len(), 1);
    }
}
