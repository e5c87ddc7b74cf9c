use reqwest::Url;
use secrecy::Secret;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use list_subscriptions::error::StoreError;
use list_subscriptions::users::{AccountUpdate, PasswordReset};

use crate::helpers::TestApp;

fn secret(value: &str) -> Secret<String> {
    Secret::new(String::from(value))
}

async fn create_admin(test_app: &TestApp) -> i32 {
    test_app
        .app
        .users
        .create("admin", "admin@test.com", &secret("s3cret-passw0rd"))
        .await
        .unwrap()
}

/// Reset token carried by the link of the only mail received by the mock server.
async fn reset_token_from_email(test_app: &TestApp) -> String {
    let email_request = &test_app.email_server.received_requests().await.unwrap()[0];
    let body: serde_json::Value = serde_json::from_slice(&email_request.body).unwrap();
    let text = body["content"][0]["value"].as_str().unwrap();

    let links: Vec<_> = linkify::LinkFinder::new()
        .links(text)
        .filter(|link| *link.kind() == linkify::LinkKind::Url)
        .collect();
    assert_eq!(links.len(), 1);
    assert!(links[0]
        .as_str()
        .starts_with(&test_app.config.get_service_url()));

    let link = Url::parse(links[0].as_str()).unwrap();
    assert_eq!(link.path(), "/users/reset");
    assert!(link
        .query_pairs()
        .any(|(key, value)| key == "username" && value == "admin"));

    link.query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, token)| token.into_owned())
        .unwrap()
}

async fn mock_mail_server(test_app: &TestApp, status: u16) {
    Mock::given(path("/mail/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(status))
        .expect(1)
        .mount(&test_app.email_server)
        .await;
}

#[tokio::test]
async fn authenticate_by_username_or_email() {
    let test_app = TestApp::spawn_app().await;
    let id = create_admin(&test_app).await;
    let users = &test_app.app.users;

    let by_username = users
        .authenticate("admin", &secret("s3cret-passw0rd"))
        .await
        .unwrap()
        .unwrap();
    let by_email = users
        .authenticate(" admin@test.com ", &secret("s3cret-passw0rd"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(by_username.id, id);
    assert_eq!(by_username.username, "admin");
    assert_eq!(by_email, by_username);
}

#[tokio::test]
async fn wrong_password_or_unknown_user_is_not_authenticated() {
    let test_app = TestApp::spawn_app().await;
    create_admin(&test_app).await;
    let users = &test_app.app.users;

    let wrong_password = users
        .authenticate("admin", &secret("guess"))
        .await
        .unwrap();
    let unknown = users
        .authenticate("root", &secret("s3cret-passw0rd"))
        .await
        .unwrap();

    assert!(wrong_password.is_none());
    assert!(unknown.is_none());
}

#[tokio::test]
async fn email_can_be_changed_without_a_password() {
    let test_app = TestApp::spawn_app().await;
    let id = create_admin(&test_app).await;
    let users = &test_app.app.users;

    let updated = users
        .update_account(
            id,
            AccountUpdate {
                email: String::from("frank@test.com"),
                current_password: None,
                password: None,
                password2: None,
            },
        )
        .await
        .unwrap();

    let user = users.get(id).await.unwrap().unwrap();
    assert_eq!(updated, 1);
    assert_eq!(user.email, "frank@test.com");
}

#[tokio::test]
async fn email_of_another_account_is_rejected() {
    let test_app = TestApp::spawn_app().await;
    let id = create_admin(&test_app).await;
    let users = &test_app.app.users;
    users
        .create("editor", "editor@test.com", &secret("an0ther-passw0rd"))
        .await
        .unwrap();

    let result = users
        .update_account(
            id,
            AccountUpdate {
                email: String::from("editor@test.com"),
                current_password: None,
                password: None,
                password2: None,
            },
        )
        .await;

    assert!(matches!(result, Err(StoreError::DuplicateEmail)));
}

#[tokio::test]
async fn password_change_requires_the_current_password() {
    let test_app = TestApp::spawn_app().await;
    let id = create_admin(&test_app).await;

    let result = test_app
        .app
        .users
        .update_account(
            id,
            AccountUpdate {
                email: String::from("admin@test.com"),
                current_password: Some(secret("guess")),
                password: Some(secret("n3w-passw0rd")),
                password2: Some(secret("n3w-passw0rd")),
            },
        )
        .await;

    assert!(matches!(result, Err(StoreError::IncorrectPassword)));
}

#[tokio::test]
async fn new_passwords_must_match() {
    let test_app = TestApp::spawn_app().await;
    let id = create_admin(&test_app).await;

    let result = test_app
        .app
        .users
        .update_account(
            id,
            AccountUpdate {
                email: String::from("admin@test.com"),
                current_password: Some(secret("s3cret-passw0rd")),
                password: Some(secret("n3w-passw0rd")),
                password2: Some(secret("n3w-passw0rd!")),
            },
        )
        .await;

    assert!(result.unwrap_err().is_validation());
}

#[tokio::test]
async fn password_can_be_changed() {
    let test_app = TestApp::spawn_app().await;
    let id = create_admin(&test_app).await;
    let users = &test_app.app.users;

    users
        .update_account(
            id,
            AccountUpdate {
                email: String::from("admin@test.com"),
                current_password: Some(secret("s3cret-passw0rd")),
                password: Some(secret("n3w-passw0rd")),
                password2: Some(secret("n3w-passw0rd")),
            },
        )
        .await
        .unwrap();

    assert!(users
        .authenticate("admin", &secret("s3cret-passw0rd"))
        .await
        .unwrap()
        .is_none());
    assert!(users
        .authenticate("admin", &secret("n3w-passw0rd"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn send_reset_mails_a_link_with_a_valid_token() {
    let test_app = TestApp::spawn_app().await;
    create_admin(&test_app).await;
    mock_mail_server(&test_app, 200).await;
    let users = &test_app.app.users;

    let sent = users.send_reset("admin@test.com").await.unwrap();
    let token = reset_token_from_email(&test_app).await;

    assert!(sent);
    assert_eq!(token.len(), 22);
    assert!(users.check_reset_token("admin", &token).await.unwrap());
    assert!(!users.check_reset_token("admin", "not-the-token").await.unwrap());
}

#[tokio::test]
async fn reset_token_can_only_be_used_once() {
    let test_app = TestApp::spawn_app().await;
    create_admin(&test_app).await;
    mock_mail_server(&test_app, 200).await;
    let users = &test_app.app.users;

    users.send_reset("admin").await.unwrap();
    let token = reset_token_from_email(&test_app).await;
    let reset = PasswordReset {
        username: String::from("admin"),
        reset_token: token.clone(),
        password: secret("r3set-passw0rd"),
        password2: secret("r3set-passw0rd"),
    };

    assert!(users.reset_password(reset.clone()).await.unwrap());
    assert!(!users.reset_password(reset).await.unwrap());
    assert!(!users.check_reset_token("admin", &token).await.unwrap());
    assert!(users
        .authenticate("admin", &secret("r3set-passw0rd"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn expired_reset_token_is_rejected() {
    let test_app = TestApp::spawn_app().await;
    create_admin(&test_app).await;
    mock_mail_server(&test_app, 200).await;
    let users = &test_app.app.users;

    users.send_reset("admin").await.unwrap();
    let token = reset_token_from_email(&test_app).await;
    sqlx::query("UPDATE users SET reset_expire = NOW() - INTERVAL '1 minute'")
        .execute(&test_app.db_pool)
        .await
        .unwrap();

    let reset = PasswordReset {
        username: String::from("admin"),
        reset_token: token.clone(),
        password: secret("r3set-passw0rd"),
        password2: secret("r3set-passw0rd"),
    };

    assert!(!users.check_reset_token("admin", &token).await.unwrap());
    assert!(!users.reset_password(reset).await.unwrap());
}

#[tokio::test]
async fn reset_with_mismatching_passwords_is_rejected() {
    let test_app = TestApp::spawn_app().await;
    create_admin(&test_app).await;

    let result = test_app
        .app
        .users
        .reset_password(PasswordReset {
            username: String::from("admin"),
            reset_token: String::from("token"),
            password: secret("r3set-passw0rd"),
            password2: secret("something-else"),
        })
        .await;

    assert!(result.unwrap_err().is_validation());
}

#[tokio::test]
async fn send_reset_for_an_unknown_account_sends_nothing() {
    let test_app = TestApp::spawn_app().await;
    create_admin(&test_app).await;
    Mock::given(path("/mail/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&test_app.email_server)
        .await;

    let sent = test_app.app.users.send_reset("nobody").await.unwrap();

    assert!(!sent);
}

#[tokio::test]
async fn mail_failure_does_not_fail_the_reset() {
    let test_app = TestApp::spawn_app().await;
    create_admin(&test_app).await;
    mock_mail_server(&test_app, 500).await;

    let sent = test_app.app.users.send_reset("admin").await.unwrap();

    assert!(sent);
}
