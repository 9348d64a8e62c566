use googletest::prelude::*;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use serial_test::serial;
use std::{
    process::{Child, Command, Stdio},
    time::Duration,
};
use test_support::{fake_smtp::FakeSmtpServer, setup_logging};
use tokio::time::{sleep, timeout};

const SERVER_PORT: u16 = 5055;

#[googletest::test]
#[tokio::test]
#[serial]
async fn relays_valid_submission_to_recipient() {
    let fake_smtp = init().await;
    let received_before = fake_smtp.received_count();
    let _server = RunningServer::start().await;

    let response = post_contact(json!({
        "firstName": "Ann",
        "lastName": "Lee",
        "email": "ann@x.com",
        "message": "Hi there"
    }))
    .await;

    expect_that!(response.status(), eq(StatusCode::OK));
    expect_that!(
        response.json::<Value>().await.unwrap(),
        eq(json!({ "code": 200, "status": "Message Sent Successfully" }))
    );
    expect_that!(
        timeout(Duration::from_secs(5), fake_smtp.last_mail_content()).await,
        ok(ok(contains_substring("Ann Lee")
            .and(contains_substring("Hi there"))
            .and(contains_substring("N/A"))
            .and(contains_substring("inbox@example.org"))))
    );
    expect_that!(fake_smtp.received_count(), eq(received_before + 1));
}

#[googletest::test]
#[tokio::test]
#[serial]
async fn rejects_invalid_submission_without_sending() {
    let fake_smtp = init().await;
    let received_before = fake_smtp.received_count();
    let _server = RunningServer::start().await;

    let response = post_contact(json!({
        "firstName": "",
        "lastName": "Lee",
        "email": "bad-email",
        "message": ""
    }))
    .await;

    expect_that!(response.status(), eq(StatusCode::BAD_REQUEST));
    expect_that!(
        response.json::<Value>().await.unwrap(),
        eq(json!({
            "errors": [
                { "field": "firstName", "message": "First name is required" },
                { "field": "email", "message": "A valid email is required" },
                { "field": "message", "message": "Message is required" },
            ]
        }))
    );
    expect_that!(fake_smtp.received_count(), eq(received_before));
}

async fn init() -> &'static FakeSmtpServer {
    setup_logging();
    let fake_smtp = FakeSmtpServer::shared();
    fake_smtp.start();
    fake_smtp.flush().await;
    fake_smtp
}

async fn post_contact(body: Value) -> Response {
    Client::new()
        .post(contact_url())
        .header("Origin", "https://portfolio.example")
        .json(&body)
        .send()
        .await
        .unwrap()
}

fn contact_url() -> String {
    format!("http://127.0.0.1:{SERVER_PORT}/contact")
}

/// The compiled server binary, stopped when dropped.
struct RunningServer(Child);

impl RunningServer {
    async fn start() -> Self {
        let child = Command::new(env!("CARGO_BIN_EXE_portfolio-contact"))
            .env("USER_MAIL", "portfolio@example.com")
            .env("CONTACT_RECIPIENT", "inbox@example.org")
            .env("SMTP_URL", FakeSmtpServer::url())
            .env("BIND_ADDRESS", "127.0.0.1")
            .env("PORT", SERVER_PORT.to_string())
            .env("SEND_TIMEOUT_SECS", "5")
            .env("REQUIRE_MAIL_READY", "true")
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .unwrap();
        let server = Self(child);
        server.wait_until_ready().await;
        server
    }

    async fn wait_until_ready(&self) {
        let client = Client::new();
        for _ in 0..100 {
            // Any HTTP answer at all means the listener is up.
            if client.get(contact_url()).send().await.is_ok() {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!("Server did not start listening on port {SERVER_PORT}");
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}
