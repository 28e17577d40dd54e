use crate::*;

use tokio::net::UdpSocket;

/// Worst case before a silent client is swept: the idle timeout plus one
/// full sweep interval, with slack for scheduling.
fn reap_window() -> Duration {
    IDLE_TIMEOUT + SWEEP_INTERVAL * 2 + Duration::from_secs(1)
}

#[tokio::test]
async fn idle_tcp_client_is_closed_and_session_dropped() {
    let handle = start().await;
    let gateway = handle.gateway().clone();

    let mut client = Client::connect(&handle).await.unwrap();
    let id = client.identify("alice").await.unwrap();

    client.expect_closed(reap_window()).await.unwrap();
    assert!(eventually(READ_WAIT, || gateway.session_get(&id).is_none()).await);
    assert_eq!(gateway.tcp().client_count(), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn activity_keeps_tcp_client_alive() {
    let handle = start().await;
    let mut client = Client::connect(&handle).await.unwrap();
    let id = client.identify("alice").await.unwrap();

    for _ in 0..6 {
        tokio::time::sleep(IDLE_TIMEOUT / 3).await;
        client.sync().await.unwrap();
    }
    assert!(handle.gateway().session_get(&id).is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn idle_udp_endpoint_is_forgotten() {
    let handle = start().await;
    let gateway = handle.gateway().clone();

    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    peer.send_to(b"\x06", handle.udp_addr()).await.unwrap();
    assert!(eventually(READ_WAIT, || gateway.udp().client_count() == 1).await);

    assert!(eventually(reap_window(), || gateway.udp().client_count() == 0).await);

    handle.shutdown().await;
}
