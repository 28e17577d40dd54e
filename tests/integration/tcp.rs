use crate::*;

#[tokio::test]
async fn identify_mints_a_session() {
    let handle = start().await;
    let gateway = handle.gateway().clone();
    let before = gateway.session_count();

    let mut client = Client::connect(&handle).await.unwrap();
    let id = client.identify("xackery").await.unwrap();

    assert_eq!(gateway.session_count(), before + 1);
    let session = gateway.session_get(&id).expect("session should exist");
    assert_eq!(session.display_name, "xackery");

    handle.shutdown().await;
}

#[tokio::test]
async fn silent_client_is_dropped_after_grace() {
    let handle = start().await;
    let mut client = Client::connect(&handle).await.unwrap();

    client
        .expect_closed(IDENTIFY_GRACE + Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(handle.gateway().session_count(), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn ping_before_identify_does_not_extend_grace() {
    let handle = start().await;
    let mut client = Client::connect(&handle).await.unwrap();

    client.sync().await.unwrap();
    client
        .expect_closed(IDENTIFY_GRACE + Duration::from_secs(1))
        .await
        .unwrap();

    handle.shutdown().await;
}

#[tokio::test]
async fn identified_client_outlives_grace() {
    let handle = start().await;
    let mut client = Client::connect(&handle).await.unwrap();
    client.identify("alice").await.unwrap();

    tokio::time::sleep(IDENTIFY_GRACE + Duration::from_millis(100)).await;
    client.sync().await.unwrap();

    handle.shutdown().await;
}

#[tokio::test]
async fn command_is_answered_with_its_arguments() {
    let handle = start().await;
    let mut client = Client::connect(&handle).await.unwrap();
    client.identify("xackery").await.unwrap();

    client.send(b"\x04peq.ecommons.bob /echo hi").await.unwrap();
    assert_eq!(client.read_line().await.unwrap(), b"\x05/echo hi");

    handle.shutdown().await;
}

#[tokio::test]
async fn echo_routes_to_named_recipient() {
    let handle = start().await;
    let mut alice = Client::connect(&handle).await.unwrap();
    let mut bob = Client::connect(&handle).await.unwrap();
    alice.identify("alice").await.unwrap();
    bob.identify("bob").await.unwrap();

    alice.send(b"\x08 bob hello there").await.unwrap();
    assert_eq!(bob.read_line().await.unwrap(), b"MSG alice hello there");

    handle.shutdown().await;
}

#[tokio::test]
async fn echo_to_unknown_recipient_keeps_connection_open() {
    let handle = start().await;
    let mut alice = Client::connect(&handle).await.unwrap();
    alice.identify("alice").await.unwrap();

    alice.send(b"\x08 nobody hi").await.unwrap();
    alice.sync().await.unwrap();

    handle.shutdown().await;
}

#[tokio::test]
async fn bad_frames_are_logged_not_fatal() {
    let handle = start().await;
    let mut client = Client::connect(&handle).await.unwrap();
    client.identify("alice").await.unwrap();

    client.send(b"\x7fgarbage").await.unwrap();
    client.send(b"\x04lonely").await.unwrap();
    client.send(b"\x03").await.unwrap();
    client.sync().await.unwrap();

    handle.shutdown().await;
}

#[tokio::test]
async fn rename_changes_routing_name_only() {
    let handle = start().await;
    let gateway = handle.gateway().clone();

    let mut client = Client::connect(&handle).await.unwrap();
    let id = client.identify("alice").await.unwrap();
    client.send(b"\x01carol").await.unwrap();
    client.sync().await.unwrap();

    let remote = client.local_addr().unwrap();
    assert_eq!(gateway.tcp().display_name(&remote).as_deref(), Some("carol"));
    assert_eq!(gateway.session_get(&id).unwrap().display_name, "alice");
    assert_eq!(gateway.session_count(), 1);

    let mut bob = Client::connect(&handle).await.unwrap();
    bob.identify("bob").await.unwrap();
    bob.send(b"\x08 carol hi").await.unwrap();
    assert_eq!(client.read_line().await.unwrap(), b"MSG bob hi");

    handle.shutdown().await;
}

#[tokio::test]
async fn disconnect_removes_session() {
    let handle = start().await;
    let gateway = handle.gateway().clone();

    let mut client = Client::connect(&handle).await.unwrap();
    let id = client.identify("alice").await.unwrap();
    drop(client);

    assert!(eventually(Duration::from_secs(2), || gateway.session_get(&id).is_none()).await);
    assert!(eventually(Duration::from_secs(2), || gateway.tcp().client_count() == 0).await);

    handle.shutdown().await;
}

#[tokio::test]
async fn oversized_line_closes_connection() {
    let handle = start().await;
    let mut client = Client::connect(&handle).await.unwrap();
    client.identify("alice").await.unwrap();

    let mut frame = vec![0x06];
    frame.extend(std::iter::repeat(b'a').take(8192));
    client.send(&frame).await.unwrap();

    let closed = tokio::time::timeout(READ_WAIT, client.drain()).await;
    assert!(closed.is_ok(), "connection should close on an oversized line");

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let handle = start().await;
    let mut client = Client::connect(&handle).await.unwrap();
    client.identify("alice").await.unwrap();

    handle.shutdown().await;
    let closed = tokio::time::timeout(READ_WAIT, client.drain()).await;
    assert!(closed.is_ok(), "shutdown should close client connections");
}
