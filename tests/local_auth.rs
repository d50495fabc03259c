mod common;

use std::sync::Arc;

use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::{test, web, App};
use common::{local_user, settings, InMemoryUsers};
use prompthouse_auth::db::User;
use prompthouse_auth::session::SESSION_COOKIE_NAME;
use prompthouse_auth::{configure_routes, AppState, RateLimiters, SessionConfig, Settings};
use serde_json::json;

fn local_settings() -> Settings {
    let mut config = settings(&[("JWT_SECRET", "test_secret")]);
    config.auth.password_cost = 4;
    config
}

fn account(email: &str, password: &str) -> User {
    User {
        password_hash: Some(bcrypt::hash(password, 4).unwrap()),
        ..local_user(email)
    }
}

fn google_account(email: &str) -> User {
    User {
        password_hash: None,
        google_id: Some("google-sub-9".into()),
        auth_provider: "google".into(),
        ..local_user(email)
    }
}

macro_rules! init_app {
    ($users:expr) => {{
        let config = local_settings();
        let session_config = SessionConfig::from_settings(&config).unwrap();
        let store = session_config.build_store().await.unwrap();
        let limiters = RateLimiters::from_settings(&config);
        let state = AppState::new(config, $users).unwrap();

        test::init_service(
            App::new()
                .wrap(session_config.middleware(store))
                .app_data(web::Data::new(state))
                .configure(|cfg| configure_routes(cfg, &limiters)),
        )
        .await
    }};
}

fn session_cookie<B>(resp: &ServiceResponse<B>) -> Option<Cookie<'static>> {
    resp.response()
        .cookies()
        .find(|c| c.name() == SESSION_COOKIE_NAME)
        .map(|c| c.into_owned())
}

fn login_body(email: &str, password: &str) -> serde_json::Value {
    json!({ "email": email, "password": password })
}

#[actix_web::test]
async fn test_register_signs_in() {
    let users = Arc::new(InMemoryUsers::default());
    let app = init_app!(users.clone());

    let resp = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "email": " ada@example.com ",
            "password": "analytical1",
            "first_name": "Ada",
            "last_name": "Lovelace"
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 201);
    let session = session_cookie(&resp).expect("registration should start a session");
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "User registered successfully");
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert!(body["token"].as_str().is_some());
    assert!(body["user"].get("password_hash").is_none());

    let stored = users.all();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].auth_provider, "local");
    assert_eq!(stored[0].subscription_tier, "free");
    let hash = stored[0].password_hash.as_deref().unwrap();
    assert!(bcrypt::verify("analytical1", hash).unwrap());

    let resp = test::TestRequest::get()
        .uri("/auth/me")
        .cookie(session)
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["first_name"], "Ada");
}

#[actix_web::test]
async fn test_register_duplicate_email() {
    let users = Arc::new(InMemoryUsers::with_user(account("grace@example.com", "cobol1959")));
    let app = init_app!(users.clone());

    let resp = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "email": "grace@example.com",
            "password": "another1pass",
            "first_name": "Grace",
            "last_name": "Hopper"
        }))
        .send_request(&app)
        .await;

    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["error"]["message"],
        "Authentication error: An account with this email already exists"
    );
    assert_eq!(users.all().len(), 1);
}

#[actix_web::test]
async fn test_register_validates_input() {
    let users = Arc::new(InMemoryUsers::default());
    let app = init_app!(users.clone());

    let resp = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "email": "ada@example.com",
            "password": "short1",
            "first_name": "Ada",
            "last_name": "Lovelace"
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);

    let resp = test::TestRequest::post()
        .uri("/api/auth/register")
        .set_json(json!({
            "email": "not-an-email",
            "password": "analytical1",
            "first_name": "Ada",
            "last_name": "Lovelace"
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);
    assert!(users.all().is_empty());
}

#[actix_web::test]
async fn test_login() {
    let app = init_app!(Arc::new(InMemoryUsers::with_user(account(
        "grace@example.com",
        "cobol1959"
    ))));

    let resp = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(login_body("grace@example.com", "cobol1959"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let session = session_cookie(&resp).expect("login should start a session");
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Login successful");
    assert_eq!(body["user"]["id"], "local-1");

    let resp = test::TestRequest::get()
        .uri("/api/session")
        .cookie(session)
        .send_request(&app)
        .await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["authenticated"], true);
}

#[actix_web::test]
async fn test_login_with_wrong_password() {
    let app = init_app!(Arc::new(InMemoryUsers::with_user(account(
        "grace@example.com",
        "cobol1959"
    ))));

    for (email, password) in [
        ("grace@example.com", "fortran1957"),
        ("nobody@example.com", "cobol1959"),
    ] {
        let resp = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(login_body(email, password))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), 401);
        assert!(session_cookie(&resp).is_none());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(
            body["error"]["message"],
            "Authentication error: Invalid email or password"
        );
    }
}

#[actix_web::test]
async fn test_google_account_without_password_cannot_log_in() {
    let app = init_app!(Arc::new(InMemoryUsers::with_user(google_account(
        "linus@example.com"
    ))));

    let resp = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(login_body("linus@example.com", "anything1"))
        .send_request(&app)
        .await;

    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["error"]["message"],
        "Authentication error: Invalid email or password"
    );
}

#[actix_web::test]
async fn test_change_password() {
    let users = Arc::new(InMemoryUsers::with_user(account("grace@example.com", "cobol1959")));
    let app = init_app!(users.clone());

    let resp = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(login_body("grace@example.com", "cobol1959"))
        .send_request(&app)
        .await;
    let session = session_cookie(&resp).unwrap();

    // Wrong current password leaves the hash alone
    let resp = test::TestRequest::post()
        .uri("/api/auth/change-password")
        .cookie(session.clone())
        .set_json(json!({ "current_password": "wrong1pass", "new_password": "nanosecond1" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 401);

    let resp = test::TestRequest::post()
        .uri("/api/auth/change-password")
        .cookie(session)
        .set_json(json!({ "current_password": "cobol1959", "new_password": "nanosecond1" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Password changed successfully");

    let resp = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(login_body("grace@example.com", "cobol1959"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 401);

    let resp = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(login_body("grace@example.com", "nanosecond1"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn test_change_password_requires_sign_in() {
    let app = init_app!(Arc::new(InMemoryUsers::default()));

    let resp = test::TestRequest::post()
        .uri("/api/auth/change-password")
        .set_json(json!({ "current_password": "cobol1959", "new_password": "nanosecond1" }))
        .send_request(&app)
        .await;

    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_change_password_for_google_account() {
    let app = init_app!(Arc::new(InMemoryUsers::with_user(google_account(
        "linus@example.com"
    ))));
    let state = AppState::new(local_settings(), Arc::new(InMemoryUsers::default())).unwrap();
    let token = state
        .auth_service
        .issue_token(&google_account("linus@example.com"))
        .unwrap();

    let resp = test::TestRequest::post()
        .uri("/api/auth/change-password")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({ "current_password": "anything1", "new_password": "nanosecond1" }))
        .send_request(&app)
        .await;

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["error"]["message"],
        "Authentication error: Password change is not available for accounts without a password"
    );
}

#[actix_web::test]
async fn test_password_routes_use_auth_budget() {
    let app = init_app!(Arc::new(InMemoryUsers::with_user(account(
        "grace@example.com",
        "cobol1959"
    ))));

    // Rejected attempts are given back
    let resp = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(login_body("grace@example.com", "wrong1pass"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 401);

    for remaining in (0..10).rev() {
        let resp = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(login_body("grace@example.com", "cobol1959"))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get("ratelimit-limit").unwrap(), "10");
        assert_eq!(
            resp.headers().get("ratelimit-remaining").unwrap(),
            remaining.to_string().as_str()
        );
    }

    let resp = test::TestRequest::post()
        .uri("/api/auth/login")
        .set_json(login_body("grace@example.com", "cobol1959"))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 429);
    assert_eq!(resp.headers().get("retry-after").unwrap(), "900");
}
