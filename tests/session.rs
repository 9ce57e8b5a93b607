use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use mockito::{Matcher, Server, ServerGuard};
use pretty_assertions::assert_eq;
use serde_json::json;
use snipurl::{
    config::Config,
    error::ErrorKind,
    federated::Callback,
    form::{FormErrors, SubmitError},
    gate::{Decision, RouteTable},
    http::Client,
    navigation::{History, Navigator},
    protocol::auth::{Credentials, PasswordChange, PasswordReset, ProfileUpdate, Registration},
    retry::{retry, RetryPolicy},
    session::{AuthState, Session},
    tokens::{MemoryStore, StoredTokens, TokenPair, TokenStore},
};
use url::Url;

struct Console {
    session: Session,
    store: Arc<MemoryStore>,
    history: Arc<History>,
    server: ServerGuard,
}

async fn console(tokens: StoredTokens, path: &str) -> Console {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = Server::new_async().await;
    let config = Config::with_api_base(server.url().parse().unwrap());
    let store = Arc::new(MemoryStore::with_entries(tokens));
    let history = Arc::new(History::new(path));
    let client = Client::new(&config, store.clone(), history.clone()).unwrap();

    Console {
        session: Session::new(Arc::new(client)),
        store,
        history,
        server,
    }
}

/// Authenticated if and only if both tokens are stored and a user is known.
fn assert_consistent(console: &Console) {
    let state = console.session.state();
    let stored = console.store.load().unwrap();

    assert_eq!(
        state.is_authenticated(),
        stored.clone().into_pair().is_some() && state.user().is_some()
    );
    if let Some(tokens) = state.tokens() {
        assert_eq!(StoredTokens::from(tokens), stored);
    }
}

/// A console signed in as `u1` with tokens `a1` and `r1`.
async fn signed_in(path: &str) -> Console {
    let mut console = console(StoredTokens::default(), path).await;
    console
        .server
        .mock("POST", "/api/auth/login")
        .with_status(200)
        .with_body(
            r#"{"tokens": {"accessToken": "a1", "refreshToken": "r1"},
                "user": {"id": "u1", "name": "Ada", "email": "ada@example.com",
                         "contactNumber": "+44 20 7946 0000", "createdAt": "2024-03-01T12:00:00Z"}}"#,
        )
        .create_async()
        .await;

    console.session.bootstrap().await.unwrap();
    console
        .session
        .sign_in(&Credentials::new("ada@example.com", "secret"))
        .await
        .unwrap();
    console
}

const PROFILE: &str = r#"{"success": true, "data": {"user": {"id": "u1", "name": "Ada", "email": "ada@example.com"}}}"#;

#[tokio::test]
async fn bootstrap_without_token_is_anonymous() {
    let console = console(StoredTokens::default(), "/").await;
    assert!(console.session.is_loading());

    console.session.bootstrap().await.unwrap();

    assert_eq!(console.session.state(), AuthState::Anonymous);
    assert!(!console.session.is_loading());
    assert_consistent(&console);
}

#[tokio::test]
async fn bootstrap_with_stale_token_refreshes() {
    let mut console = console(
        StoredTokens {
            token: Some("stale".to_owned()),
            refresh_token: Some("r1".to_owned()),
        },
        "/dashboard",
    )
    .await;
    console
        .server
        .mock("GET", "/api/auth/profile")
        .match_header("authorization", "Bearer stale")
        .with_status(401)
        .create_async()
        .await;
    let profile = console
        .server
        .mock("GET", "/api/auth/profile")
        .match_header("authorization", "Bearer a2")
        .with_status(200)
        .with_body(PROFILE)
        .expect(1)
        .create_async()
        .await;
    let refresh = console
        .server
        .mock("POST", "/api/auth/refresh-token")
        .with_status(200)
        .with_body(r#"{"tokens": {"accessToken": "a2", "refreshToken": "r2", "expiresIn": 900}}"#)
        .expect(1)
        .create_async()
        .await;

    console.session.bootstrap().await.unwrap();

    let state = console.session.state();
    assert!(!state.is_loading());
    assert_eq!(state.user().map(|user| user.id.as_str()), Some("u1"));
    assert_eq!(state.tokens(), Some(&TokenPair::new("a2", "r2")));
    assert_consistent(&console);
    profile.assert_async().await;
    refresh.assert_async().await;

    // Later calls do nothing.
    console.session.bootstrap().await.unwrap();
    profile.assert_async().await;
}

#[tokio::test]
async fn bootstrap_signs_out_when_refresh_fails() {
    let mut console = console(
        StoredTokens {
            token: Some("stale".to_owned()),
            refresh_token: Some("revoked".to_owned()),
        },
        "/urls",
    )
    .await;
    console
        .server
        .mock("GET", "/api/auth/profile")
        .with_status(401)
        .create_async()
        .await;
    console
        .server
        .mock("POST", "/api/auth/refresh-token")
        .with_status(401)
        .with_body(r#"{"error": {"type": "AUTHENTICATION_ERROR", "message": "Refresh token revoked"}}"#)
        .create_async()
        .await;

    let error = console.session.bootstrap().await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::Authentication);
    assert_eq!(console.session.state(), AuthState::Anonymous);
    assert_eq!(console.store.load().unwrap(), StoredTokens::default());
    assert_eq!(console.history.current_path(), "/login");
}

#[tokio::test]
async fn incomplete_token_bundle_is_rejected() {
    let mut console = console(StoredTokens::default(), "/login").await;
    console
        .server
        .mock("POST", "/api/auth/login")
        .with_status(200)
        .with_body(r#"{"tokens": {"accessToken": "a1"}, "user": {"id": "u1"}}"#)
        .create_async()
        .await;

    // A token pair needs both tokens.
    let error = console
        .session
        .sign_in(&Credentials::new("ada@example.com", "secret"))
        .await
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Unknown);
    assert!(!console.session.is_authenticated());
    assert_consistent(&console);
}

#[tokio::test]
async fn sign_in_sign_out_sign_in() {
    let mut console = console(StoredTokens::default(), "/login").await;
    console
        .server
        .mock("POST", "/api/auth/login")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({ "email": "ada@example.com", "password": "secret" })))
        .with_status(200)
        .with_body(
            r#"{"tokens": {"accessToken": "a1", "refreshToken": "r1"},
                "user": {"id": "u1", "name": "Ada", "email": "ada@example.com"}}"#,
        )
        .expect(2)
        .create_async()
        .await;
    let logout = console
        .server
        .mock("POST", "/api/auth/logout")
        .match_header("authorization", "Bearer a1")
        .match_body(Matcher::Json(json!({ "refreshToken": "r1" })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    console.session.bootstrap().await.unwrap();
    let mut changes = console.session.subscribe();
    let credentials = Credentials::new("ada@example.com", "secret");

    let user = console.session.sign_in(&credentials).await.unwrap();
    assert_eq!(user.name, "Ada");
    assert!(changes.has_changed().unwrap());
    let first = changes.borrow_and_update().clone();
    assert!(first.is_authenticated());
    assert_consistent(&console);

    console.session.sign_out();
    assert_eq!(console.session.state(), AuthState::Anonymous);
    assert_eq!(console.store.read().unwrap(), None);
    assert_consistent(&console);

    // The service is notified in the background.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !logout.matched_async().await && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    logout.assert_async().await;

    console.session.sign_in(&credentials).await.unwrap();
    assert_eq!(console.session.state(), first);
    assert_consistent(&console);
}

#[tokio::test]
async fn sign_out_never_fails() {
    let console = console(
        StoredTokens {
            token: Some("a1".to_owned()),
            refresh_token: Some("r1".to_owned()),
        },
        "/dashboard",
    )
    .await;

    // No logout mock: the service answers 501, which is only logged.
    console.session.sign_out();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(console.session.state(), AuthState::Anonymous);
    assert_eq!(console.store.load().unwrap(), StoredTokens::default());
}

#[tokio::test]
async fn registration_conflict_is_shown_under_email() {
    let mut console = console(StoredTokens::default(), "/register").await;
    console
        .server
        .mock("POST", "/api/auth/register")
        .with_status(409)
        .with_body(
            r#"{"error": {
                "type": "CONFLICT_ERROR",
                "message": "An account with this email already exists",
                "details": {"field": "email"}
            }}"#,
        )
        .create_async()
        .await;

    let form = FormErrors::default();
    let registration = Registration {
        name: "Ada".to_owned(),
        email: "ada@example.com".to_owned(),
        contact_number: None,
        password: "secret".to_owned(),
    };

    let result = form
        .submit_and_apply(|| console.session.register(&registration))
        .await;

    let Err(SubmitError::Failed(error)) = result else {
        panic!("expected the registration to fail");
    };
    assert_eq!(error.kind, ErrorKind::Conflict);
    assert_eq!(
        form.field("email").as_deref(),
        Some("An account with this email already exists")
    );
    assert_eq!(form.general(), None);
    assert!(!form.can_retry(&error));
    assert!(!console.session.is_authenticated());
}

#[tokio::test]
async fn rate_limit_wait_is_honored() {
    let mut console = console(
        StoredTokens {
            token: Some("a1".to_owned()),
            refresh_token: Some("r1".to_owned()),
        },
        "/urls",
    )
    .await;
    let limited = console
        .server
        .mock("GET", "/api/auth/profile")
        .with_status(429)
        .with_body(
            r#"{"error": {"type": "RATE_LIMIT_ERROR", "message": "Slow down", "details": {"retryAfter": 1}}}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let refresh = console
        .server
        .mock("POST", "/api/auth/refresh-token")
        .expect(0)
        .create_async()
        .await;
    let available = console
        .server
        .mock("GET", "/api/auth/profile")
        .with_status(200)
        .with_body(PROFILE)
        .create_async()
        .await;

    let session = &console.session;
    let started = Instant::now();
    let user = retry(RetryPolicy::new(3, Duration::from_secs(30)), move || {
        session.profile()
    })
    .await
    .unwrap();

    let elapsed = started.elapsed();
    assert_eq!(user.id, "u1");
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
    limited.assert_async().await;
    available.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn federated_login_callback() {
    let console = console(StoredTokens::default(), "/auth/callback").await;
    let url = Url::parse(
        "http://localhost:3000/auth/callback?action=login&token=a1&refreshToken=r1\
         &expiresIn=900&refreshExpiresIn=604800&id=u1&name=Ada&email=ada%40example.com",
    )
    .unwrap();

    let callback = console.session.handle_federated_callback(&url).unwrap();

    assert!(matches!(callback, Callback::Login { .. }));
    let state = console.session.state();
    assert_eq!(state.user().map(|user| user.email.as_str()), Some("ada@example.com"));
    assert_eq!(console.store.read().unwrap(), Some(TokenPair::new("a1", "r1")));
    assert_eq!(console.history.current_path(), "/dashboard");
    assert_consistent(&console);
}

#[tokio::test]
async fn federated_signup_is_completed() {
    let mut console = console(StoredTokens::default(), "/auth/callback").await;
    let complete = console
        .server
        .mock("POST", "/api/auth/google-oauth-complete")
        .match_body(Matcher::PartialJson(json!({
            "email": "ada@example.com",
            "googleId": "g-42",
            "contactNumber": "+31 20 123 4567"
        })))
        .with_status(201)
        .with_body(
            r#"{"data": {"tokens": {"accessToken": "a1", "refreshToken": "r1"},
                "user": {"id": "u1", "email": "ada@example.com", "isGoogleUser": true}}}"#,
        )
        .create_async()
        .await;

    let url = Url::parse(
        "http://localhost:3000/auth/callback?action=signup&name=Ada&email=ada%40example.com&googleId=g-42",
    )
    .unwrap();
    let Callback::Signup(profile) = console.session.handle_federated_callback(&url).unwrap() else {
        panic!("expected a signup callback");
    };
    assert!(!console.session.is_authenticated());
    assert_eq!(console.history.entries().len(), 1);

    let registration = profile.into_registration(Some("+31 20 123 4567".to_owned()), None);
    let user = console
        .session
        .complete_federated_registration(&registration)
        .await
        .unwrap();

    assert!(user.is_federated);
    assert!(console.session.is_authenticated());
    assert_consistent(&console);
    complete.assert_async().await;
}

#[tokio::test]
async fn gates_follow_the_session() {
    let mut console = console(StoredTokens::default(), "/login").await;
    console
        .server
        .mock("POST", "/api/auth/login")
        .with_status(200)
        .with_body(r#"{"tokens": {"accessToken": "a1", "refreshToken": "r1"}, "user": {"id": "u1"}}"#)
        .create_async()
        .await;
    let table = RouteTable::new(console.session.client().routes().clone()).protected("/urls");

    assert_eq!(table.decide("/urls", &console.session.state()), Decision::Pending);

    console.session.bootstrap().await.unwrap();
    assert_eq!(
        table.decide("/urls", &console.session.state()),
        Decision::Redirect("/login".to_owned())
    );

    console
        .session
        .sign_in(&Credentials::new("ada@example.com", "secret"))
        .await
        .unwrap();
    assert_eq!(table.decide("/urls", &console.session.state()), Decision::Render);
    assert_eq!(
        table.decide("/login", &console.session.state()),
        Decision::Redirect("/dashboard".to_owned())
    );
}

#[tokio::test]
async fn lost_session_signs_out() {
    let mut console = signed_in("/urls").await;
    console
        .server
        .mock("GET", "/api/urls")
        .with_status(401)
        .create_async()
        .await;
    console
        .server
        .mock("POST", "/api/auth/refresh-token")
        .with_status(401)
        .with_body(r#"{"error": {"type": "AUTHENTICATION_ERROR", "message": "Refresh token expired"}}"#)
        .create_async()
        .await;

    let error = console
        .session
        .client()
        .get::<serde_json::Value>("/api/urls")
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::Authentication);
    assert_eq!(console.session.state(), AuthState::Anonymous);
    assert_eq!(console.store.load().unwrap(), StoredTokens::default());
    assert_eq!(console.history.current_path(), "/login");
    assert_consistent(&console);
}

#[tokio::test]
async fn refresh_now_replaces_tokens() {
    let mut console = signed_in("/dashboard").await;
    let refresh = console
        .server
        .mock("POST", "/api/auth/refresh-token")
        .match_body(Matcher::Json(json!({ "refreshToken": "r1" })))
        .with_status(200)
        .with_body(r#"{"tokens": {"accessToken": "a2", "refreshToken": "r2"}}"#)
        .expect(1)
        .create_async()
        .await;

    console.session.refresh_now().await.unwrap();

    assert_eq!(console.session.state().tokens(), Some(&TokenPair::new("a2", "r2")));
    assert_eq!(console.session.user().map(|user| user.id), Some("u1".to_owned()));
    assert_consistent(&console);
    refresh.assert_async().await;
}

#[tokio::test]
async fn refresh_now_failure_signs_out() {
    let mut console = signed_in("/dashboard").await;
    console
        .server
        .mock("POST", "/api/auth/refresh-token")
        .with_status(401)
        .create_async()
        .await;

    let error = console.session.refresh_now().await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::Authentication);
    assert_eq!(console.session.state(), AuthState::Anonymous);
    assert_eq!(console.history.current_path(), "/login");
    assert_consistent(&console);
}

#[tokio::test]
async fn refresh_now_requires_sign_in() {
    let leftover = StoredTokens {
        token: None,
        refresh_token: Some("r1".to_owned()),
    };
    let mut console = console(leftover.clone(), "/").await;
    let refresh = console
        .server
        .mock("POST", "/api/auth/refresh-token")
        .expect(0)
        .create_async()
        .await;

    console.session.bootstrap().await.unwrap();
    let error = console.session.refresh_now().await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::Authentication);
    assert_eq!(console.session.state(), AuthState::Anonymous);
    assert_eq!(console.store.load().unwrap(), leftover);
    assert_consistent(&console);
    refresh.assert_async().await;
}

#[tokio::test]
async fn profile_update_is_merged() {
    let mut console = signed_in("/profile").await;
    let update = console
        .server
        .mock("PUT", "/api/auth/profile")
        .match_header("authorization", "Bearer a1")
        .match_body(Matcher::Json(json!({ "name": "Ada Lovelace" })))
        .with_status(200)
        .with_body(r#"{"data": {"user": {"id": "u1", "name": "Ada Lovelace"}}}"#)
        .expect(1)
        .create_async()
        .await;

    let user = console
        .session
        .update_profile(&ProfileUpdate {
            name: Some("Ada Lovelace".to_owned()),
            ..ProfileUpdate::default()
        })
        .await
        .unwrap();

    assert_eq!(user.name, "Ada Lovelace");
    assert_eq!(user.email, "ada@example.com");
    assert_eq!(user.contact_number.as_deref(), Some("+44 20 7946 0000"));
    assert!(user.created_at.is_some());
    assert_eq!(console.session.user(), Some(user));
    assert_consistent(&console);
    update.assert_async().await;
}

#[tokio::test]
async fn password_operations_keep_the_session() {
    let mut console = signed_in("/profile").await;
    let change = console
        .server
        .mock("POST", "/api/auth/change-password")
        .match_header("authorization", "Bearer a1")
        .match_body(Matcher::Json(json!({ "currentPassword": "secret", "newPassword": "s3cret!" })))
        .with_status(200)
        .with_body(r#"{"message": "Password changed"}"#)
        .expect(1)
        .create_async()
        .await;
    let forgot = console
        .server
        .mock("POST", "/api/auth/forgot-password")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({ "email": "ada@example.com" })))
        .with_status(200)
        .with_body(r#"{"message": "Reset link sent"}"#)
        .expect(1)
        .create_async()
        .await;
    let reset = console
        .server
        .mock("POST", "/api/auth/reset-password")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::PartialJson(json!({ "resetToken": "t1" })))
        .with_status(200)
        .with_body(r#"{"message": "Password reset"}"#)
        .expect(1)
        .create_async()
        .await;
    let before = console.session.state();

    let changed = console
        .session
        .change_password(&PasswordChange {
            current_password: "secret".to_owned(),
            new_password: "s3cret!".to_owned(),
        })
        .await
        .unwrap();
    console.session.forgot_password("ada@example.com").await.unwrap();
    console
        .session
        .reset_password(&PasswordReset {
            reset_token: "t1".to_owned(),
            new_password: "s3cret!".to_owned(),
        })
        .await
        .unwrap();

    assert_eq!(changed.message.as_deref(), Some("Password changed"));
    assert_eq!(console.session.state(), before);
    assert_consistent(&console);
    change.assert_async().await;
    forgot.assert_async().await;
    reset.assert_async().await;
}
