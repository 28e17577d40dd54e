use crate::*;

use tokio::net::UdpSocket;
use velium_core::wire;

async fn udp_peer(handle: &GatewayHandle) -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(handle.udp_addr()).await.unwrap();
    socket
}

#[tokio::test]
async fn bind_to_tcp_session_is_silent() {
    let handle = start().await;
    let gateway = handle.gateway().clone();

    let mut client = Client::connect(&handle).await.unwrap();
    let id = client.identify("xackery").await.unwrap();

    let peer = udp_peer(&handle).await;
    peer.send(&wire::session_frame(&id)).await.unwrap();

    let local = peer.local_addr().unwrap();
    assert!(eventually(READ_WAIT, || gateway.udp().bound_session(&local) == Some(id)).await);

    let mut buf = [0u8; 64];
    let reply = tokio::time::timeout(Duration::from_millis(200), peer.recv(&mut buf)).await;
    assert!(reply.is_err(), "successful bind must not be answered");

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_session_is_told_to_quit() {
    let handle = start().await;
    let peer = udp_peer(&handle).await;

    peer.send(&wire::session_frame(&SessionId::random()))
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(READ_WAIT, peer.recv(&mut buf))
        .await
        .expect("QUIT should arrive")
        .unwrap();
    assert_eq!(&buf[..n], &[0x03]);

    let local = peer.local_addr().unwrap();
    assert_eq!(handle.gateway().udp().bound_session(&local), None);

    handle.shutdown().await;
}

#[tokio::test]
async fn session_gone_after_tcp_disconnect() {
    let handle = start().await;
    let gateway = handle.gateway().clone();

    let mut client = Client::connect(&handle).await.unwrap();
    let id = client.identify("alice").await.unwrap();
    drop(client);
    assert!(eventually(READ_WAIT, || gateway.session_get(&id).is_none()).await);

    let peer = udp_peer(&handle).await;
    peer.send(&wire::session_frame(&id)).await.unwrap();

    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(READ_WAIT, peer.recv(&mut buf))
        .await
        .expect("QUIT should arrive")
        .unwrap();
    assert_eq!(&buf[..n], &[0x03]);

    handle.shutdown().await;
}

#[tokio::test]
async fn any_datagram_registers_the_endpoint() {
    let handle = start().await;
    let gateway = handle.gateway().clone();
    let peer = udp_peer(&handle).await;

    peer.send(b"\x06").await.unwrap();
    peer.send(b"\x7f").await.unwrap();

    assert!(eventually(READ_WAIT, || gateway.udp().client_count() == 1).await);

    handle.shutdown().await;
}
