//! End-to-end auth flows over the wire shape: request envelopes go through
//! the responder, replies come back as response envelopes on `.reply`
//! topics. The broker and the user service are replaced by in-crate fakes;
//! the token lifecycle runs for real against in-memory stores.

use descant::application_impl::{
    Argon2PasswordHasher, FakeUserDirectory, JwtConfig, JwtTokenService, RealAuthService,
};
use descant::application_port::{AuthService, CredentialHasher, TokenService};
use descant::broker::{
    Envelope, FakeBrokerConnection, MessageHandler, RequestResponder, ResponseEnvelope,
    ResponseStatus, RpcClient, SendOptions, patterns,
};
use descant::domain_model::{UserId, UserRole, UserStatus};
use descant::domain_port::UserRecord;
use descant::infra_memory::{MemoryRefreshTokenRepo, MemoryRevocationStore};
use descant::server::auth_handlers;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    conn: Arc<FakeBrokerConnection>,
    responder: RequestResponder,
    tokens: Arc<JwtTokenService>,
    directory: Arc<FakeUserDirectory>,
}

async fn harness() -> Harness {
    let conn = Arc::new(FakeBrokerConnection::new());
    let directory = Arc::new(FakeUserDirectory::new());

    let cfg = JwtConfig::try_new("descant.auth", b"test-signing-key".to_vec(), "15m", "7d")
        .expect("valid ttl strings");
    let tokens = Arc::new(JwtTokenService::new(
        cfg,
        Arc::new(MemoryRefreshTokenRepo::new()),
        Arc::new(MemoryRevocationStore::new()),
    ));

    let auth: Arc<dyn AuthService> = Arc::new(RealAuthService::new(
        directory.clone(),
        tokens.clone(),
        Arc::new(Argon2PasswordHasher),
    ));

    let events = Arc::new(RpcClient::new(
        conn.clone(),
        "auth-service",
        SendOptions::default(),
    ));

    let mut responder = RequestResponder::new(conn.clone(), "auth-service");
    auth_handlers::register_all(&mut responder, auth, tokens.clone(), events);

    Harness {
        conn,
        responder,
        tokens,
        directory,
    }
}

async fn seed_active_user(harness: &Harness) -> UserRecord {
    let hasher = Argon2PasswordHasher;
    let record = UserRecord {
        id: UserId(Uuid::new_v4()),
        username: "johndoe".to_string(),
        email: "johndoe@example.com".to_string(),
        password: Some(hasher.hash_password("p@ssw0rd123").await.unwrap()),
        first_name: None,
        last_name: None,
        is_verified: true,
        status: UserStatus::Active,
        roles: vec![UserRole::User],
    };
    harness.directory.seed(record.clone());
    record
}

/// Sends one request envelope through the responder and returns the reply
/// published on `<pattern>.reply`.
async fn call(harness: &Harness, pattern: &str, data: Value) -> ResponseEnvelope {
    let correlation_id = Uuid::new_v4().to_string();
    let request = Envelope::request(data, "api-gateway", &correlation_id);
    harness
        .responder
        .handle(pattern, &serde_json::to_vec(&request).unwrap())
        .await
        .expect("responder never fails at the transport level");

    let reply_topic = patterns::reply_topic(pattern);
    harness
        .conn
        .published()
        .iter()
        .rev()
        .find(|m| m.topic == reply_topic)
        .map(|m| serde_json::from_slice(&m.payload).unwrap())
        .expect("a reply was published")
}

fn expect_success(reply: &ResponseEnvelope) -> Value {
    assert_eq!(reply.status, ResponseStatus::Success, "reply: {reply:?}");
    reply.data.clone().unwrap()
}

fn expect_error(reply: &ResponseEnvelope, code: &str) {
    assert_eq!(reply.status, ResponseStatus::Error, "reply: {reply:?}");
    assert_eq!(reply.error.as_ref().unwrap().code, code);
}

#[tokio::test]
async fn login_rotate_and_replay_over_the_wire() {
    let harness = harness().await;
    seed_active_user(&harness).await;

    let login = call(
        &harness,
        patterns::AUTH_LOGIN,
        json!({
            "usernameOrEmail": "johndoe@example.com",
            "password": "p@ssw0rd123",
            "deviceId": "d1",
        }),
    )
    .await;
    let login = expect_success(&login);
    let refresh_token = login["refreshToken"].as_str().unwrap().to_string();
    assert_eq!(login["tokenType"], "Bearer");
    assert_eq!(login["user"]["username"], "johndoe");

    let rotated = call(
        &harness,
        patterns::AUTH_REFRESH_TOKEN,
        json!({"refreshToken": refresh_token, "deviceId": "d1"}),
    )
    .await;
    let rotated = expect_success(&rotated);
    assert_ne!(rotated["refreshToken"], login["refreshToken"]);

    // replaying the consumed refresh token is rejected
    let replay = call(
        &harness,
        patterns::AUTH_REFRESH_TOKEN,
        json!({"refreshToken": refresh_token, "deviceId": "d1"}),
    )
    .await;
    expect_error(&replay, "UNAUTHORIZED");
}

#[tokio::test]
async fn device_mismatch_is_rejected_over_the_wire() {
    let harness = harness().await;
    seed_active_user(&harness).await;

    let login = call(
        &harness,
        patterns::AUTH_LOGIN,
        json!({
            "usernameOrEmail": "johndoe@example.com",
            "password": "p@ssw0rd123",
            "deviceId": "d1",
        }),
    )
    .await;
    let refresh_token = expect_success(&login)["refreshToken"]
        .as_str()
        .unwrap()
        .to_string();

    let mismatch = call(
        &harness,
        patterns::AUTH_REFRESH_TOKEN,
        json!({"refreshToken": refresh_token, "deviceId": "d2"}),
    )
    .await;
    expect_error(&mismatch, "UNAUTHORIZED");

    // the record is still active, so the original device may rotate
    let rotate = call(
        &harness,
        patterns::AUTH_REFRESH_TOKEN,
        json!({"refreshToken": refresh_token, "deviceId": "d1"}),
    )
    .await;
    expect_success(&rotate);
}

#[tokio::test]
async fn register_issues_a_pair_and_conflicts_on_replay() {
    let harness = harness().await;

    let register = call(
        &harness,
        patterns::AUTH_REGISTER,
        json!({
            "username": "newuser",
            "email": "newuser@example.com",
            "password": "p@ssw0rd123",
        }),
    )
    .await;
    let registered = expect_success(&register);
    assert!(registered["accessToken"].as_str().is_some());
    assert_eq!(registered["user"]["email"], "newuser@example.com");

    let duplicate = call(
        &harness,
        patterns::AUTH_REGISTER,
        json!({
            "username": "newuser",
            "email": "newuser@example.com",
            "password": "p@ssw0rd123",
        }),
    )
    .await;
    expect_error(&duplicate, "CONFLICT");
}

#[tokio::test]
async fn logout_blacklists_and_validate_rejects() {
    let harness = harness().await;
    seed_active_user(&harness).await;

    let login = call(
        &harness,
        patterns::AUTH_LOGIN,
        json!({
            "usernameOrEmail": "johndoe@example.com",
            "password": "p@ssw0rd123",
        }),
    )
    .await;
    let login = expect_success(&login);
    let access_token = login["accessToken"].as_str().unwrap().to_string();
    let refresh_token = login["refreshToken"].as_str().unwrap().to_string();

    let valid = call(
        &harness,
        patterns::AUTH_VALIDATE_TOKEN,
        json!({"token": access_token}),
    )
    .await;
    assert_eq!(expect_success(&valid)["valid"], true);

    let logout = call(
        &harness,
        patterns::AUTH_LOGOUT,
        json!({"refreshToken": refresh_token}),
    )
    .await;
    assert_eq!(expect_success(&logout)["success"], true);

    // the refresh token's jti is on the blacklist now
    let claims = harness.tokens.decode_unverified(&refresh_token).unwrap();
    let check = call(
        &harness,
        patterns::AUTH_BLACKLIST_CHECK,
        json!({"jti": claims.jti}),
    )
    .await;
    assert_eq!(expect_success(&check)["blacklisted"], true);

    let rotate = call(
        &harness,
        patterns::AUTH_REFRESH_TOKEN,
        json!({"refreshToken": refresh_token}),
    )
    .await;
    expect_error(&rotate, "UNAUTHORIZED");
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let harness = harness().await;
    let user = seed_active_user(&harness).await;

    let mut refresh_tokens = Vec::new();
    for device in ["d1", "d2"] {
        let login = call(
            &harness,
            patterns::AUTH_LOGIN,
            json!({
                "usernameOrEmail": "johndoe@example.com",
                "password": "p@ssw0rd123",
                "deviceId": device,
            }),
        )
        .await;
        refresh_tokens.push(
            expect_success(&login)["refreshToken"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }

    let logout_all = call(
        &harness,
        patterns::AUTH_LOGOUT_ALL,
        json!({"userId": user.id}),
    )
    .await;
    assert_eq!(expect_success(&logout_all)["success"], true);

    for (token, device) in refresh_tokens.iter().zip(["d1", "d2"]) {
        let rotate = call(
            &harness,
            patterns::AUTH_REFRESH_TOKEN,
            json!({"refreshToken": token, "deviceId": device}),
        )
        .await;
        expect_error(&rotate, "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn wire_level_validation_failures_are_stable_codes() {
    let harness = harness().await;

    // malformed payload for the pattern
    let malformed = call(&harness, patterns::AUTH_REFRESH_TOKEN, json!({"nope": 1})).await;
    expect_error(&malformed, "VALIDATION");

    // legacy double-wrapped payloads are rejected, not guessed at
    let inner = Envelope::request(json!({"refreshToken": "x"}), "api-gateway", "corr-1");
    let double_wrapped = call(
        &harness,
        patterns::AUTH_REFRESH_TOKEN,
        serde_json::to_value(&inner).unwrap(),
    )
    .await;
    expect_error(&double_wrapped, "VALIDATION");

    // register rejects before touching the directory
    let invalid = call(
        &harness,
        patterns::AUTH_REGISTER,
        json!({"username": "x", "email": "nope", "password": "short"}),
    )
    .await;
    expect_error(&invalid, "VALIDATION");
    assert_eq!(harness.directory.lookup_count(), 0);
}

#[tokio::test]
async fn successful_logins_emit_a_lifecycle_event() {
    let harness = harness().await;
    seed_active_user(&harness).await;

    let login = call(
        &harness,
        patterns::AUTH_LOGIN,
        json!({
            "usernameOrEmail": "johndoe@example.com",
            "password": "p@ssw0rd123",
        }),
    )
    .await;
    expect_success(&login);

    let events: Vec<_> = harness
        .conn
        .published()
        .into_iter()
        .filter(|m| m.topic == patterns::TOPIC_USER_LOGGED_IN)
        .collect();
    assert_eq!(events.len(), 1);

    let envelope = descant::broker::decode(&events[0].payload);
    assert_eq!(envelope.metadata.kind, "event");
    assert_eq!(envelope.metadata.source, "auth-service");
}
