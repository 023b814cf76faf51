//! HTTP-level integration tests: cookie issuance, rotation, and clearing
//! across the auth endpoints.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use flashauth::cache::SessionCache;
use flashauth::db::Database;
use flashauth::jwt::JwtConfig;
use flashauth::{ServerConfig, create_app};
use tower::ServiceExt;

const ACCESS_SECRET: &[u8] = b"test-access-secret-long-enough-for-use";
const REFRESH_SECRET: &[u8] = b"test-refresh-secret-long-enough-for-use";

struct TestApp {
    app: Router,
    db: Database,
    jwt: JwtConfig,
}

async fn setup() -> TestApp {
    let db = Database::open(":memory:").await.expect("open db");
    let cache = SessionCache::open(":memory:").await.expect("open cache");

    let config = ServerConfig {
        db: db.clone(),
        cache,
        access_secret: ACCESS_SECRET.to_vec(),
        refresh_secret: REFRESH_SECRET.to_vec(),
        frontend_url: "http://localhost:3000".to_string(),
        secure_cookies: false,
        no_signup: false,
    };

    TestApp {
        app: create_app(&config),
        db,
        jwt: JwtConfig::new(ACCESS_SECRET, REFRESH_SECRET),
    }
}

fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Extract a `name=value` cookie pair from the response's Set-Cookie headers.
fn cookie_from_response(response: &axum::response::Response, name: &str) -> Option<String> {
    for value in response.headers().get_all(header::SET_COOKIE) {
        let value = value.to_str().ok()?;
        let pair = value.split(';').next()?.trim();
        if pair.starts_with(&format!("{}=", name)) {
            return Some(pair.to_string());
        }
    }
    None
}

/// Whether the response clears the named cookie (Max-Age=0).
fn clears_cookie(response: &axum::response::Response, name: &str) -> bool {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with(&format!("{}=", name)) && v.contains("Max-Age=0"))
}

async fn sign_up_alice(app: &Router) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "/api/v1/auth/signup",
            serde_json::json!({
                "email": "alice@x.com",
                "username": "alice",
                "password": "Secret!1",
                "isTermAndConditionAccepted": true,
            }),
        ))
        .await
        .unwrap()
}

/// Sign up alice and verify her email. The verification token is minted
/// directly with the server's codec configuration - the codec is a pure
/// function of secret and input, so this is the token the queued email
/// would carry.
async fn sign_up_and_verify_alice(env: &TestApp) {
    let response = sign_up_alice(&env.app).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let uuid = env
        .db
        .users()
        .get_by_email("alice@x.com")
        .await
        .unwrap()
        .expect("alice exists")
        .uuid;
    let token = env.jwt.generate_verify_token(&uuid).unwrap();

    let response = env
        .app
        .clone()
        .oneshot(json_request(
            "/api/v1/auth/verify-email",
            serde_json::json!({ "token": token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn sign_in_alice(app: &Router) -> axum::response::Response {
    app.clone()
        .oneshot(json_request(
            "/api/v1/auth/signin",
            serde_json::json!({ "email": "alice@x.com", "password": "Secret!1" }),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_signup_created() {
    let env = setup().await;

    let response = sign_up_alice(&env.app).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(
        cookie_from_response(&response, "access_token").is_none(),
        "signup must not issue credentials before verification"
    );
}

#[tokio::test]
async fn test_signup_duplicate_is_rejected() {
    let env = setup().await;

    assert_eq!(sign_up_alice(&env.app).await.status(), StatusCode::CREATED);
    assert_eq!(
        sign_up_alice(&env.app).await.status(),
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_signup_requires_terms() {
    let env = setup().await;

    let response = env
        .app
        .clone()
        .oneshot(json_request(
            "/api/v1/auth/signup",
            serde_json::json!({
                "email": "alice@x.com",
                "username": "alice",
                "password": "Secret!1",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signin_unverified_is_unprocessable() {
    let env = setup().await;
    sign_up_alice(&env.app).await;

    let response = sign_in_alice(&env.app).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(cookie_from_response(&response, "access_token").is_none());
}

#[tokio::test]
async fn test_signin_wrong_password_unauthorized() {
    let env = setup().await;
    sign_up_and_verify_alice(&env).await;

    let response = env
        .app
        .clone()
        .oneshot(json_request(
            "/api/v1/auth/signin",
            serde_json::json!({ "email": "alice@x.com", "password": "wrong-password" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signin_sets_credential_cookies() {
    let env = setup().await;
    sign_up_and_verify_alice(&env).await;

    let response = sign_in_alice(&env.app).await;
    assert_eq!(response.status(), StatusCode::OK);

    let access = cookie_from_response(&response, "access_token").expect("access cookie");
    let refresh = cookie_from_response(&response, "refresh_token").expect("refresh cookie");
    assert!(access.len() > "access_token=".len());
    assert!(refresh.len() > "refresh_token=".len());
}

#[tokio::test]
async fn test_me_requires_credentials() {
    let env = setup().await;

    let response = env
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/user/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_with_access_cookie() {
    let env = setup().await;
    sign_up_and_verify_alice(&env).await;

    let signin = sign_in_alice(&env.app).await;
    let access = cookie_from_response(&signin, "access_token").unwrap();

    let response = env
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/user/me")
                .header(header::COOKIE, access)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_me_with_only_refresh_cookie_gets_new_access_token() {
    let env = setup().await;
    sign_up_and_verify_alice(&env).await;

    let signin = sign_in_alice(&env.app).await;
    let refresh = cookie_from_response(&signin, "refresh_token").unwrap();

    let response = env
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/user/me")
                .header(header::COOKIE, refresh)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The middleware attached a replacement access token to the response
    let new_access = cookie_from_response(&response, "access_token").expect("minted access cookie");
    let token = new_access.strip_prefix("access_token=").unwrap();
    assert!(env.jwt.validate_access_token(token).is_ok());
}

#[tokio::test]
async fn test_refresh_rotates_and_replay_is_rejected() {
    let env = setup().await;
    sign_up_and_verify_alice(&env).await;

    let signin = sign_in_alice(&env.app).await;
    let old_refresh = cookie_from_response(&signin, "refresh_token").unwrap();

    let refresh_request = |cookie: String| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/auth/refresh")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    };

    let response = env
        .app
        .clone()
        .oneshot(refresh_request(old_refresh.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let new_refresh = cookie_from_response(&response, "refresh_token").expect("rotated cookie");
    assert_ne!(new_refresh, old_refresh);

    // Replaying the consumed token fails and clears credentials
    let response = env
        .app
        .clone()
        .oneshot(refresh_request(old_refresh))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(clears_cookie(&response, "refresh_token"));

    // The rotated token is still good
    let response = env
        .app
        .clone()
        .oneshot(refresh_request(new_refresh))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_signout_always_succeeds_and_clears_cookies() {
    let env = setup().await;

    // Without any credentials
    let response = env
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/signout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_cookie(&response, "access_token"));
    assert!(clears_cookie(&response, "refresh_token"));

    // With a garbage refresh token
    let response = env
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/signout")
                .header(header::COOKIE, "refresh_token=garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_cookie(&response, "refresh_token"));
}

#[tokio::test]
async fn test_signout_revokes_refresh_token() {
    let env = setup().await;
    sign_up_and_verify_alice(&env).await;

    let signin = sign_in_alice(&env.app).await;
    let refresh = cookie_from_response(&signin, "refresh_token").unwrap();

    let response = env
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/signout")
                .header(header::COOKIE, refresh.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The revoked token can no longer be rotated
    let response = env
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/refresh")
                .header(header::COOKIE, refresh)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
