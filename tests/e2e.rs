//! End-to-end scenarios exercising the HTTP route, the meta resolver and
//! the forwarding engine together.
//!
//! UDP resend onto a still-open socket when a second address is tried is
//! covered in `forward.rs`'s own test suite instead of here: it needs a
//! server name that resolves to two distinct addresses, which real DNS
//! resolution (used end to end here) can't be made to do deterministically.

use std::sync::Arc;

use http_body_util::BodyExt;
use kdcproxy::api::{self, AppState};
use kdcproxy::config::KdcProxyConfig;
use kdcproxy::resolver::dns::DnsResolver;
use kdcproxy::resolver::MetaResolver;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

const AS_REQ_DER: &[u8] = &[
    0x6a, 0x81, 0xb5, 0x30, 0x81, 0xb2, 0xa1, 0x03, 0x02, 0x01, 0x05, 0xa2, 0x03, 0x02, 0x01, 0x0a, 0xa3, 0x1a, 0x30,
    0x18, 0x30, 0x0a, 0xa1, 0x04, 0x02, 0x02, 0x00, 0x96, 0xa2, 0x02, 0x04, 0x00, 0x30, 0x0a, 0xa1, 0x04, 0x02, 0x02,
    0x00, 0x95, 0xa2, 0x02, 0x04, 0x00, 0xa4, 0x81, 0x89, 0x30, 0x81, 0x86, 0xa0, 0x07, 0x03, 0x05, 0x00, 0x00, 0x00,
    0x00, 0x10, 0xa1, 0x13, 0x30, 0x11, 0xa0, 0x03, 0x02, 0x01, 0x01, 0xa1, 0x0a, 0x30, 0x08, 0x1b, 0x06, 0x6d, 0x79,
    0x75, 0x73, 0x65, 0x72, 0xa2, 0x0d, 0x1b, 0x0b, 0x45, 0x58, 0x41, 0x4d, 0x50, 0x4c, 0x45, 0x2e, 0x43, 0x4f, 0x4d,
    0xa3, 0x20, 0x30, 0x1e, 0xa0, 0x03, 0x02, 0x01, 0x02, 0xa1, 0x17, 0x30, 0x15, 0x1b, 0x06, 0x6b, 0x72, 0x62, 0x74,
    0x67, 0x74, 0x1b, 0x0b, 0x45, 0x58, 0x41, 0x4d, 0x50, 0x4c, 0x45, 0x2e, 0x43, 0x4f, 0x4d, 0xa5, 0x11, 0x18, 0x0f,
    0x32, 0x30, 0x32, 0x31, 0x31, 0x32, 0x31, 0x36, 0x31, 0x38, 0x35, 0x35, 0x31, 0x30, 0x5a, 0xa7, 0x06, 0x02, 0x04,
    0x22, 0x33, 0xc9, 0xe9, 0xa8, 0x1a, 0x30, 0x18, 0x02, 0x01, 0x12, 0x02, 0x01, 0x11, 0x02, 0x01, 0x14, 0x02, 0x01,
    0x13, 0x02, 0x01, 0x10, 0x02, 0x01, 0x17, 0x02, 0x01, 0x19, 0x02, 0x01, 0x1a,
];

/// DER-wraps `content` under an explicit, constructed APPLICATION `tag`,
/// using short-form DER length encoding (content must stay under 128 bytes).
fn app_tag(tag: u8, content: &[u8]) -> Vec<u8> {
    assert!(content.len() < 128, "fixture helper only supports short-form length");
    let mut out = vec![0x60 | tag];
    out.push(content.len() as u8);
    out.extend_from_slice(content);
    out
}

/// A structurally valid (not semantically meaningful) RFC 3244 KPASSWD-REQ:
/// total length, version, AP-REQ length, an AP-REQ and a KRB-PRIV, each
/// wrapped in their own APPLICATION tag. The classifier only checks tags and
/// framing, never the Kerberos message contents.
fn kpasswd_inner() -> Vec<u8> {
    let ap_req = app_tag(14, b"ap-req-placeholder");
    let krb_priv = app_tag(21, b"krb-priv-placeholder");

    let ap_len = ap_req.len() as u16;
    let total_len = (2 + 2 + 2 + ap_req.len() + krb_priv.len()) as u16;

    let mut inner = Vec::new();
    inner.extend_from_slice(&total_len.to_be_bytes());
    inner.extend_from_slice(&0x0001u16.to_be_bytes());
    inner.extend_from_slice(&ap_len.to_be_bytes());
    inner.extend_from_slice(&ap_req);
    inner.extend_from_slice(&krb_priv);
    inner
}

fn wrap_request(realm: &str, inner: &[u8]) -> Vec<u8> {
    use picky_asn1::restricted_string::IA5String;
    use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, GeneralStringAsn1, OctetStringAsn1, Optional};
    use picky_krb::messages::KdcProxyMessage;

    let mut framed = (inner.len() as u32).to_be_bytes().to_vec();
    framed.extend_from_slice(inner);

    let msg = KdcProxyMessage {
        kerb_message: ExplicitContextTag0::from(OctetStringAsn1(framed)),
        target_domain: Optional::from(Some(ExplicitContextTag1::from(GeneralStringAsn1::from(
            IA5String::from_string(realm.to_owned()).unwrap(),
        )))),
        dclocator_hint: Optional::from(None),
    };
    msg.to_vec().unwrap()
}

async fn post(router: axum::Router, body: Vec<u8>) -> (axum::http::StatusCode, Vec<u8>) {
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/")
        .header("content-length", body.len())
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, bytes)
}

fn build_router(ini: &str) -> axum::Router {
    let config = KdcProxyConfig::from_ini(&ini::Ini::load_from_str(ini).unwrap());
    let resolver = MetaResolver::new(config, DnsResolver::from_system_conf());
    let state = Arc::new(AppState { resolver });
    api::router(state)
}

#[tokio::test]
async fn as_req_happy_path_returns_kdc_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut len_buf = [0u8; 4];
        sock.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        sock.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, AS_REQ_DER);

        sock.write_all(b"\x00\x00\x00\x08RESPONSE").await.unwrap();
    });

    let ini = format!("[FREEIPA.LOCAL]\nkerberos = kerberos+tcp://{}:{}\n", addr.ip(), addr.port());
    let router = build_router(&ini);

    let (status, body) = post(router, wrap_request("FREEIPA.LOCAL", AS_REQ_DER)).await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let decoded = kdcproxy::codec::envelope::decode(&body).unwrap();
    assert_eq!(decoded.kerb_message, b"\x00\x00\x00\x08RESPONSE");

    server.await.unwrap();
}

#[tokio::test]
async fn unconfigured_realm_returns_service_unavailable() {
    let router = build_router("[global]\ndns_realm_discovery = false\n");

    let (status, body) = post(router, wrap_request("NOWHERE.EXAMPLE.COM", AS_REQ_DER)).await;
    assert_eq!(status, axum::http::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(String::from_utf8(body).unwrap(), "Can't find remote (AS-REQ).");
}

#[tokio::test]
async fn non_post_method_is_rejected() {
    let router = build_router("");

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get("allow").unwrap(), "POST");
}

#[tokio::test]
async fn missing_content_length_is_rejected() {
    let router = build_router("");

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/")
        .body(axum::body::Body::from(wrap_request("EXAMPLE.COM", AS_REQ_DER)))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::LENGTH_REQUIRED);
}

#[tokio::test]
async fn oversized_content_length_is_rejected() {
    let router = build_router("");

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/")
        .header("content-length", 129 * 1024)
        .body(axum::body::Body::from(b"short".to_vec()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn malformed_envelope_returns_a_real_reason() {
    let router = build_router("");

    let (status, body) = post(router, b"not a kdc proxy message".to_vec()).await;
    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);

    let text = String::from_utf8(body).unwrap();
    assert_ne!(text, "400");
    assert!(!text.is_empty());
}

#[tokio::test]
async fn kpasswd_request_is_routed_to_the_kpasswd_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut len_buf = [0u8; 4];
        sock.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        sock.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, kpasswd_inner());

        sock.write_all(b"\x00\x00\x00\x08CHANGED!").await.unwrap();
    });

    // Only a `kpasswd` entry is configured; a reply proves the resolver was
    // consulted with `kpasswd = true`, not the (absent) `kerberos` list.
    let ini = format!("[FREEIPA.LOCAL]\nkpasswd = kpasswd+tcp://{}:{}\n", addr.ip(), addr.port());
    let router = build_router(&ini);

    let (status, body) = post(router, wrap_request("FREEIPA.LOCAL", &kpasswd_inner())).await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let decoded = kdcproxy::codec::envelope::decode(&body).unwrap();
    assert_eq!(decoded.kerb_message, b"\x00\x00\x00\x08CHANGED!");

    server.await.unwrap();
}

#[tokio::test]
async fn tcp_reply_split_across_reads_is_reassembled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut len_buf = [0u8; 4];
        sock.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        sock.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, AS_REQ_DER);

        // 16-byte reply declared, delivered as two separate 8-byte writes.
        sock.write_all(b"\x00\x00\x00\x10").await.unwrap();
        sock.write_all(b"FIRSTHAL").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        sock.write_all(b"FSECOND!").await.unwrap();
    });

    let ini = format!("[FREEIPA.LOCAL]\nkerberos = kerberos+tcp://{}:{}\n", addr.ip(), addr.port());
    let router = build_router(&ini);

    let (status, body) = post(router, wrap_request("FREEIPA.LOCAL", AS_REQ_DER)).await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let decoded = kdcproxy::codec::envelope::decode(&body).unwrap();
    assert_eq!(decoded.kerb_message, b"\x00\x00\x00\x10FIRSTHALFSECOND!");

    server.await.unwrap();
}

#[tokio::test]
async fn udp_forwarding_round_trips_through_the_full_stack() {
    let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let replying = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], AS_REQ_DER);
        server.send_to(b"REPLY", from).await.unwrap();
    });

    let ini = format!("[FREEIPA.LOCAL]\nkerberos = kerberos+udp://{}:{}\n", addr.ip(), addr.port());
    let router = build_router(&ini);

    let (status, body) = post(router, wrap_request("FREEIPA.LOCAL", AS_REQ_DER)).await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let decoded = kdcproxy::codec::envelope::decode(&body).unwrap();
    assert_eq!(decoded.kerb_message, b"\x00\x00\x00\x05REPLY");

    replying.await.unwrap();
}
