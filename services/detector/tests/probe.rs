//! Probe tests against an in-process genuine TLS 1.3 server.


use std::time::Duration;

use camoscan_detector::probe_tickets;
use camoscan_wire::parse_client_hello;
use harness::{build_client_hello, TicketServer};
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn probe_reports_one_length_per_ticket() {
    let server = TicketServer::spawn("localhost", 2, None).await.unwrap();

    let hello = build_client_hello(Some("localhost"), &[]);
    let summary = parse_client_hello(&hello).unwrap();

    let tickets_lens = timeout(
        TEST_TIMEOUT,
        probe_tickets(&server.addr.to_string(), &summary),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(tickets_lens.len(), 2);
    // Both tickets come from the same issuing policy, so their records have
    // identical sizes.
    assert_eq!(tickets_lens[0], tickets_lens[1]);
    assert!(tickets_lens[0] > 20);
}

#[tokio::test]
async fn probe_returns_empty_when_server_issues_no_tickets() {
    let server = TicketServer::spawn("localhost", 0, None).await.unwrap();

    let hello = build_client_hello(Some("localhost"), &[]);
    let summary = parse_client_hello(&hello).unwrap();

    let tickets_lens = timeout(
        TEST_TIMEOUT,
        probe_tickets(&server.addr.to_string(), &summary),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(tickets_lens.is_empty());
}

#[tokio::test]
async fn probe_forwards_victim_alpn_offers() {
    let server = TicketServer::spawn("localhost", 1, Some(vec![b"http/1.1".to_vec()]))
        .await
        .unwrap();

    let hello = build_client_hello(Some("localhost"), &[b"h2", b"http/1.1"]);
    let summary = parse_client_hello(&hello).unwrap();

    let tickets_lens = timeout(
        TEST_TIMEOUT,
        probe_tickets(&server.addr.to_string(), &summary),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(tickets_lens.len(), 1);
}

#[tokio::test]
async fn probe_speaks_h2_preface_when_negotiated() {
    let server = TicketServer::spawn("localhost", 1, Some(vec![b"h2".to_vec()]))
        .await
        .unwrap();

    let hello = build_client_hello(Some("localhost"), &[b"h2"]);
    let summary = parse_client_hello(&hello).unwrap();

    // The server here is not a real HTTP/2 endpoint; it answers any bytes.
    // What matters is that the h2 branch still elicits the tickets.
    let tickets_lens = timeout(
        TEST_TIMEOUT,
        probe_tickets(&server.addr.to_string(), &summary),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(tickets_lens.len(), 1);
}

#[tokio::test]
async fn probe_fails_cleanly_on_refused_connection() {
    let hello = build_client_hello(Some("localhost"), &[]);
    let summary = parse_client_hello(&hello).unwrap();

    let result = timeout(TEST_TIMEOUT, probe_tickets("127.0.0.1:1", &summary)).await;
    assert!(matches!(result, Ok(Err(_))));
}
