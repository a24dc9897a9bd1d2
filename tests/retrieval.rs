//! Network retrieval backends against the mock repository.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;
use url::Url;

use butler::config::schema::{BlobMethodConfig, EtcdMethodConfig, HttpMethodConfig, S3MethodConfig};
use butler::config::TransportConfig;
use butler::retrieval::blob::shared_key_string_to_sign;
use butler::retrieval::sigv4::{sign_get, SigningParams};
use butler::retrieval::{BlobMethod, EtcdMethod, HttpMethod, RetrievalError, S3Method};

mod common;

use common::{fragment, MockServer};

fn transport() -> TransportConfig {
    TransportConfig {
        timeout_secs: 2,
        retries: 1,
        retry_wait_min_ms: 10,
        retry_wait_max_ms: 20,
    }
}

fn http_url(mock: &MockServer, path: &str) -> Url {
    Url::parse(&format!("http://{}{path}", mock.authority())).unwrap()
}

/// `key="value"` pairs of an Authorization header, quotes stripped.
fn auth_params(header: &str) -> std::collections::HashMap<String, String> {
    header
        .trim_start_matches("Digest ")
        .split(", ")
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.to_string(), v.trim_matches('"').to_string()))
        .collect()
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

#[tokio::test]
async fn test_http_basic_auth_on_the_wire() {
    let mock = MockServer::start().await;
    mock.set("/configs/a.yml", 200, &fragment("a: 1"));

    let method = HttpMethod::new(&HttpMethodConfig {
        auth_type: "basic".to_string(),
        auth_user: "butler".to_string(),
        auth_password: "hunter2".to_string(),
        transport: transport(),
        ..Default::default()
    })
    .unwrap();

    let response = method.get(&http_url(&mock, "/configs/a.yml")).await.unwrap();
    assert_eq!(response.body, fragment("a: 1").into_bytes());

    let request = mock.last_request("/configs/a.yml").unwrap();
    let expected = format!("Basic {}", STANDARD.encode("butler:hunter2"));
    assert_eq!(request.header("authorization"), Some(expected.as_str()));
}

#[tokio::test]
async fn test_http_bearer_token_on_the_wire() {
    let mock = MockServer::start().await;
    mock.set("/configs/a.yml", 200, &fragment("a: 1"));

    let method = HttpMethod::new(&HttpMethodConfig {
        auth_type: "token".to_string(),
        auth_token: "s3cr3t-token".to_string(),
        transport: transport(),
        ..Default::default()
    })
    .unwrap();

    method.get(&http_url(&mock, "/configs/a.yml")).await.unwrap();
    let request = mock.last_request("/configs/a.yml").unwrap();
    assert_eq!(request.header("authorization"), Some("Bearer s3cr3t-token"));
}

#[tokio::test]
async fn test_http_digest_challenge_round_trip() {
    let mock = MockServer::start().await;
    let path = "/configs/a.yml";
    mock.set(path, 200, &fragment("a: 1"));
    mock.require_auth(
        path,
        "Digest ",
        r#"Digest realm="butler@mock", qop="auth", nonce="6f0c1a2b3c4d", opaque="0pq""#,
    );

    let method = HttpMethod::new(&HttpMethodConfig {
        auth_type: "digest".to_string(),
        auth_user: "butler".to_string(),
        auth_password: "hunter2".to_string(),
        transport: transport(),
        ..Default::default()
    })
    .unwrap();

    let response = method.get(&http_url(&mock, path)).await.unwrap();
    assert_eq!(response.body, fragment("a: 1").into_bytes());

    let requests = mock.requests(path);
    assert_eq!(requests.len(), 2);
    assert!(requests[0].header("authorization").is_none());

    let params = auth_params(requests[1].header("authorization").unwrap());
    assert_eq!(params["username"], "butler");
    assert_eq!(params["realm"], "butler@mock");
    assert_eq!(params["nonce"], "6f0c1a2b3c4d");
    assert_eq!(params["uri"], path);
    assert_eq!(params["qop"], "auth");
    assert_eq!(params["opaque"], "0pq");

    let ha1 = md5_hex("butler:butler@mock:hunter2");
    let ha2 = md5_hex(&format!("GET:{path}"));
    let expected = md5_hex(&format!(
        "{ha1}:6f0c1a2b3c4d:{}:{}:auth:{ha2}",
        params["nc"], params["cnonce"]
    ));
    assert_eq!(params["response"], expected);
}

#[tokio::test]
async fn test_http_digest_without_challenge_fails() {
    let mock = MockServer::start().await;
    mock.set("/configs/a.yml", 200, &fragment("a: 1"));
    mock.require_auth("/configs/a.yml", "Digest ", r#"Basic realm="butler@mock""#);

    let method = HttpMethod::new(&HttpMethodConfig {
        auth_type: "digest".to_string(),
        auth_user: "butler".to_string(),
        auth_password: "hunter2".to_string(),
        transport: transport(),
        ..Default::default()
    })
    .unwrap();

    let err = method.get(&http_url(&mock, "/configs/a.yml")).await.unwrap_err();
    assert!(matches!(err, RetrievalError::Status { code: 401, .. }));
}

fn etcd_range(value: &str) -> String {
    format!(
        r#"{{"header":{{"revision":"7"}},"kvs":[{{"key":"{}","value":"{}"}}],"count":"1"}}"#,
        STANDARD.encode("/butler/a.yml"),
        STANDARD.encode(value)
    )
}

/// An address nothing listens on.
async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn test_etcd_tries_endpoints_in_order() {
    let mock = MockServer::start().await;
    mock.set("/v3/kv/range", 200, &etcd_range(&fragment("a: 1")));

    let method = EtcdMethod::new(&EtcdMethodConfig {
        endpoints: vec![dead_endpoint().await, format!("http://{}/", mock.authority())],
        transport: transport(),
    })
    .unwrap();

    let url = Url::parse("etcd://etcd.example.com/butler/a.yml").unwrap();
    let response = method.get(&url).await.unwrap();
    assert_eq!(response.body, fragment("a: 1").into_bytes());

    let request = mock.last_request("/v3/kv/range").unwrap();
    assert_eq!(request.method, "POST");
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["key"], STANDARD.encode("/butler/a.yml"));
}

#[tokio::test]
async fn test_etcd_missing_key_is_not_found() {
    let mock = MockServer::start().await;
    mock.set("/v3/kv/range", 200, r#"{"header":{"revision":"7"}}"#);

    let method = EtcdMethod::new(&EtcdMethodConfig {
        endpoints: vec![format!("http://{}", mock.authority())],
        transport: transport(),
    })
    .unwrap();

    let url = Url::parse("etcd://etcd.example.com/butler/missing.yml").unwrap();
    let err = method.get(&url).await.unwrap_err();
    assert!(matches!(err, RetrievalError::Status { code: 404, .. }));
    assert_eq!(mock.hits("/v3/kv/range"), 1);
}

#[tokio::test]
async fn test_etcd_every_endpoint_down() {
    let method = EtcdMethod::new(&EtcdMethodConfig {
        endpoints: vec![dead_endpoint().await, dead_endpoint().await],
        transport: transport(),
    })
    .unwrap();

    let url = Url::parse("etcd://etcd.example.com/butler/a.yml").unwrap();
    let err = method.get(&url).await.unwrap_err();
    assert!(matches!(err, RetrievalError::Transport { .. }));
}

#[tokio::test]
async fn test_s3_signed_request_reaches_server() {
    let mock = MockServer::start().await;
    let path = "/configs-bucket/prometheus/a.yml";
    mock.set(path, 200, &fragment("a: 1"));

    let method = S3Method::new(&S3MethodConfig {
        region: "eu-west-1".to_string(),
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
        endpoint: Some(format!("http://{}", mock.authority())),
        transport: transport(),
        ..Default::default()
    })
    .unwrap();

    let url = Url::parse("s3://configs-bucket/prometheus/a.yml").unwrap();
    let response = method.get(&url).await.unwrap();
    assert_eq!(response.body, fragment("a: 1").into_bytes());

    let request = mock.last_request(path).unwrap();
    assert_eq!(request.header("host"), Some(mock.authority().as_str()));
    assert_eq!(
        request.header("x-amz-content-sha256"),
        Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
    );

    let amz_date = request.header("x-amz-date").unwrap();
    let signed_at = Utc.from_utc_datetime(&NaiveDateTime::parse_from_str(amz_date, "%Y%m%dT%H%M%SZ").unwrap());
    let params = SigningParams {
        access_key_id: "AKIDEXAMPLE",
        secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
        session_token: None,
        region: "eu-west-1",
        service: "s3",
    };
    let expected = sign_get(&mock.authority(), path, &params, signed_at);
    let authorization = &expected.iter().find(|(k, _)| k == "authorization").unwrap().1;
    assert_eq!(request.header("authorization"), Some(authorization.as_str()));
}

#[tokio::test]
async fn test_s3_anonymous_request_is_unsigned() {
    let mock = MockServer::start().await;
    mock.set("/public/a.yml", 200, &fragment("a: 1"));

    let method = S3Method::new(&S3MethodConfig {
        endpoint: Some(format!("http://{}", mock.authority())),
        transport: transport(),
        ..Default::default()
    })
    .unwrap();

    let url = Url::parse("s3://public/a.yml").unwrap();
    method.get(&url).await.unwrap();
    let request = mock.last_request("/public/a.yml").unwrap();
    assert!(request.header("authorization").is_none());
}

#[tokio::test]
async fn test_blob_shared_key_request_reaches_server() {
    let mock = MockServer::start().await;
    let path = "/configs/prometheus/a.yml";
    mock.set(path, 200, &fragment("a: 1"));

    let method = BlobMethod::new(&BlobMethodConfig {
        account_key: STANDARD.encode("butler-account-key"),
        endpoint: Some(format!("http://{}", mock.authority())),
        transport: transport(),
        ..Default::default()
    })
    .unwrap();

    let url = Url::parse("blob://acct/configs/prometheus/a.yml").unwrap();
    let response = method.get(&url).await.unwrap();
    assert_eq!(response.body, fragment("a: 1").into_bytes());

    let request = mock.last_request(path).unwrap();
    let date = request.header("x-ms-date").unwrap();
    assert!(request.header("x-ms-version").is_some());

    let mut mac = Hmac::<Sha256>::new_from_slice(b"butler-account-key").unwrap();
    mac.update(shared_key_string_to_sign(date, &format!("/acct{path}")).as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());
    let expected = format!("SharedKey acct:{signature}");
    assert_eq!(request.header("authorization"), Some(expected.as_str()));
}

#[tokio::test]
async fn test_blob_sas_request_carries_token() {
    let mock = MockServer::start().await;
    let target = "/configs/a.yml?sv=2021-08-06&sig=abc";
    mock.set(target, 200, &fragment("a: 1"));

    let method = BlobMethod::new(&BlobMethodConfig {
        account_key: STANDARD.encode("ignored-with-sas"),
        sas_token: "?sv=2021-08-06&sig=abc".to_string(),
        endpoint: Some(format!("http://{}", mock.authority())),
        transport: transport(),
    })
    .unwrap();

    let url = Url::parse("blob://acct/configs/a.yml").unwrap();
    method.get(&url).await.unwrap();
    let request = mock.last_request(target).unwrap();
    assert!(request.header("authorization").is_none());
}
