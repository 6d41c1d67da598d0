use std::time::Duration;

use frisquet_connect::{Backoff, Error, FrisquetClient, RequestOptions, DEFAULT_USER_AGENT};
use reqwest::Method;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn login_body(token: &str) -> serde_json::Value {
    json!({
        "token": token,
        "utilisateur": {"sites": [{"identifiant_chaudiere": "X"}]}
    })
}

fn login_mock(token: &str) -> Mock {
    Mock::given(method("POST"))
        .and(path("/authentifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(token)))
}

fn site_mock(token: &str, status: u16) -> Mock {
    Mock::given(method("GET"))
        .and(path("/sites/X"))
        .and(query_param("token", token))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"zones": []})))
}

fn client(server: &MockServer) -> FrisquetClient {
    FrisquetClient::builder("me@example.com", "secret")
        .hostname(server.uri())
        .backoff(Backoff::none())
        .build()
        .expect("client should build")
}

fn has_token(req: &wiremock::Request) -> bool {
    req.url.query_pairs().any(|(k, _)| k == "token")
}

#[tokio::test]
async fn login_posts_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authentifications"))
        .and(query_param("appId", frisquet_connect::DEFAULT_APP_ID))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .and(body_json(json!({
            "locale": "fr",
            "email": "me@example.com",
            "password": "secret",
            "type_client": "IOS"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("abc")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let login = client.login().await.expect("login should succeed");
    assert_eq!(login.token, "abc");
    assert_eq!(login.user.primary_site_id(), Some("X"));

    let session = client.session().await.expect("session should be stored");
    assert_eq!(session.token, "abc");
    assert_eq!(session.generation, 1);
}

#[tokio::test]
async fn login_without_token_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authentifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"utilisateur": {}})))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.login().await.unwrap_err();
    assert!(matches!(err, Error::MissingToken), "expected MissingToken, got {err:?}");
    assert!(client.session().await.is_none());
}

#[tokio::test]
async fn login_rejected_returns_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authentifications"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client(&server);
    let err = client.login().await.unwrap_err();
    assert!(
        matches!(err, Error::Status { status: 401, .. }),
        "expected Status 401, got {err:?}"
    );
}

#[tokio::test]
async fn relogin_clears_previous_token() {
    let server = MockServer::start().await;
    login_mock("old").up_to_n_times(1).mount(&server).await;
    login_mock("new").mount(&server).await;

    let client = client(&server);
    client.login().await.unwrap();
    client.login().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| !has_token(r)), "login must not send a token");
    assert_eq!(client.session().await.unwrap().token, "new");
    assert_eq!(client.session().await.unwrap().generation, 2);
}

#[tokio::test]
async fn request_attaches_token_and_options() {
    let server = MockServer::start().await;
    login_mock("abc").mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/sites/X/commands"))
        .and(query_param("token", "abc"))
        .and(query_param("mode", "auto"))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .and(body_json(json!({"boost": true})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.login().await.unwrap();
    let options = RequestOptions::new()
        .query("mode", "auto")
        .json(json!({"boost": true}));
    let resp = client
        .request(Method::POST, "sites/X/commands", options)
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
}

#[tokio::test]
async fn unauthorized_triggers_one_relogin_then_retry() {
    let server = MockServer::start().await;
    login_mock("old").up_to_n_times(1).expect(1).mount(&server).await;
    login_mock("new").expect(1).mount(&server).await;
    site_mock("old", 401).expect(1).mount(&server).await;
    site_mock("new", 200).expect(1).mount(&server).await;

    let client = client(&server);
    client.login().await.unwrap();
    let resp = client.get("sites/X").await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let requests = server.received_requests().await.unwrap();
    let trail: Vec<String> = requests
        .iter()
        .map(|r| format!("{} {}", r.method, r.url.path()))
        .collect();
    assert_eq!(
        trail,
        vec![
            "POST /authentifications",
            "GET /sites/X",
            "POST /authentifications",
            "GET /sites/X",
        ]
    );
    assert_eq!(client.retry_attempts(), 0, "successful retry resets the counter");
}

#[tokio::test]
async fn forbidden_also_relogs() {
    let server = MockServer::start().await;
    login_mock("old").up_to_n_times(1).mount(&server).await;
    login_mock("new").expect(1).mount(&server).await;
    site_mock("old", 403).expect(1).mount(&server).await;
    site_mock("new", 200).expect(1).mount(&server).await;

    let client = client(&server);
    client.login().await.unwrap();
    let resp = client.get("sites/X").await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn failed_relogin_returns_original_response() {
    let server = MockServer::start().await;
    login_mock("old").up_to_n_times(1).mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/authentifications"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sites/X"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.login().await.unwrap();
    let resp = client.get("sites/X").await.expect("error is swallowed");
    assert_eq!(resp.status().as_u16(), 401);
    assert_eq!(resp.text().await.unwrap(), "expired");
    assert_eq!(client.retry_attempts(), 1);
}

#[tokio::test]
async fn retried_unauthorized_is_not_retried_again() {
    let server = MockServer::start().await;
    login_mock("old").up_to_n_times(1).mount(&server).await;
    login_mock("new").expect(1).mount(&server).await;
    site_mock("old", 401).expect(1).mount(&server).await;
    site_mock("new", 401).expect(1).mount(&server).await;

    let client = client(&server);
    client.login().await.unwrap();
    let resp = client.get("sites/X").await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    assert_eq!(client.retry_attempts(), 1);
}

#[tokio::test]
async fn server_error_is_not_retried() {
    let server = MockServer::start().await;
    login_mock("abc").expect(1).mount(&server).await;
    site_mock("abc", 500).expect(1).mount(&server).await;

    let client = client(&server);
    client.login().await.unwrap();
    let resp = client.get("sites/X").await.unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    assert_eq!(client.retry_attempts(), 0);
}

#[tokio::test]
async fn get_json_fails_on_error_status() {
    let server = MockServer::start().await;
    login_mock("abc").mount(&server).await;
    site_mock("abc", 404).mount(&server).await;

    let client = client(&server);
    client.login().await.unwrap();
    let err = client
        .get_json::<serde_json::Value>("sites/X")
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Status { status: 404, ref path } if path == "sites/X"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn concurrent_unauthorized_share_one_relogin() {
    let server = MockServer::start().await;
    login_mock("old").up_to_n_times(1).mount(&server).await;
    login_mock("new").expect(1).mount(&server).await;
    site_mock("new", 200).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/sites/X"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = client(&server);
    client.login().await.unwrap();
    let (a, b) = tokio::join!(client.get("sites/X"), client.get("sites/X"));
    assert_eq!(a.unwrap().status().as_u16(), 200);
    assert_eq!(b.unwrap().status().as_u16(), 200);
    assert_eq!(client.session().await.unwrap().generation, 2);
}

#[tokio::test]
async fn transport_error_surfaces() {
    let client = FrisquetClient::builder("me", "pw")
        .hostname("http://127.0.0.1:9")
        .backoff(Backoff::none())
        .build()
        .unwrap();
    let err = client.get("sites/X").await.unwrap_err();
    assert!(matches!(err, Error::Http(_)), "expected Http, got {err:?}");
}

fn slow_client(server: &MockServer, backoff: Backoff) -> FrisquetClient {
    FrisquetClient::builder("me@example.com", "secret")
        .hostname(server.uri())
        .backoff(backoff)
        .build()
        .expect("client should build")
}

fn test_backoff() -> Backoff {
    Backoff {
        base: Duration::from_secs(2),
        max: Duration::from_secs(60),
        settle: Duration::from_millis(500),
    }
}

#[tokio::test(start_paused = true)]
async fn relogin_waits_backoff_and_settle() {
    let server = MockServer::start().await;
    login_mock("old").up_to_n_times(1).mount(&server).await;
    login_mock("new").expect(1).mount(&server).await;
    site_mock("old", 401).expect(1).mount(&server).await;
    site_mock("new", 200).expect(1).mount(&server).await;

    let client = slow_client(&server, test_backoff());
    client.login().await.unwrap();

    let started = Instant::now();
    let resp = client.get("sites/X").await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert!(
        started.elapsed() >= Duration::from_millis(2500),
        "expected backoff + settle, waited {:?}",
        started.elapsed()
    );
}

#[tokio::test(start_paused = true)]
async fn consecutive_failed_recoveries_grow_backoff() {
    let server = MockServer::start().await;
    login_mock("abc").mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/sites/X"))
        .respond_with(ResponseTemplate::new(401))
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sites/Y"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sites/Y"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = slow_client(&server, test_backoff());
    client.login().await.unwrap();

    // Each call fails once, re-logs in, and its retry fails again.
    let started = Instant::now();
    client.get("sites/X").await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(2500));
    assert_eq!(client.retry_attempts(), 1);

    let started = Instant::now();
    client.get("sites/X").await.unwrap();
    assert!(
        started.elapsed() >= Duration::from_millis(4500),
        "second recovery should double the delay, waited {:?}",
        started.elapsed()
    );
    assert_eq!(client.retry_attempts(), 2);

    let started = Instant::now();
    let resp = client.get("sites/Y").await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert!(started.elapsed() >= Duration::from_millis(8500));
    assert_eq!(client.retry_attempts(), 0, "successful retry resets the counter");
}

/// Reads one HTTP request (head and body) and returns its head.
async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let body_len = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < end + 4 + body_len {
                let n = stream.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return Some(head);
        }
    }
}

fn http_reply(status: &str, body: &str) -> String {
    format!(
        concat!(
            "HTTP/1.1 {}\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: {}\r\n",
            "Connection: close\r\n\r\n{}"
        ),
        status,
        body.len(),
        body
    )
}

#[tokio::test]
async fn retry_transport_error_surfaces() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut gets = 0;
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let Some(head) = read_request(&mut stream).await else {
                continue;
            };
            let reply = if head.starts_with("POST") {
                http_reply("200 OK", r#"{"token":"new","utilisateur":{"sites":[]}}"#)
            } else {
                gets += 1;
                if gets > 1 {
                    // Drop the retried call without answering.
                    continue;
                }
                http_reply("401 Unauthorized", "")
            };
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    let client = FrisquetClient::builder("me", "pw")
        .hostname(format!("http://{addr}"))
        .backoff(Backoff::none())
        .build()
        .unwrap();
    let err = client.get("sites/X").await.unwrap_err();
    assert!(matches!(err, Error::Http(_)), "expected Http, got {err:?}");
    assert_eq!(client.session().await.unwrap().token, "new");
}
