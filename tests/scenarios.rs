//! End-to-end scenarios against the core types directly, driving the
//! dispatcher with fake in-memory connection handles rather than real
//! sockets.

mod fixture;

use serde_json::json;

use fixture::{
    connect_transport_msg, consume_msg, core, create_transport_msg, ctx_for, join_msg,
    produce_msg, resume_msg, response_data, response_error, token_payload, FakeConn,
};
use sfu_signal::dispatcher::dispatch;
use sfu_signal::ids::{ProducerId, RoomId, SessionId};
use sfu_signal::media::sim::SimLevelObserver;
use sfu_signal::media::LevelObserverEvent;

#[tokio::test]
async fn happy_join() {
    let core = core();
    let payload = token_payload("r1", "p1", "j1", 1000, 1060);
    let ctx = ctx_for(&payload);
    let mut conn = FakeConn::new();

    let response = dispatch(&core, &ctx, &conn.handle, join_msg(1, "r1", "s1")).await.into_value();
    let data = response_data(&response);
    assert_eq!(data["roomId"], "r1");
    assert_eq!(data["sessionId"], "s1");
    assert_eq!(data["peerId"], "p1");
    assert_eq!(data["existingPeers"], json!([]));
    assert_eq!(data["existingProducers"], json!([]));

    let sent = conn.drain();
    assert!(sent.iter().any(|m| m["type"] == "welcome"));
}

#[tokio::test]
async fn second_peer_sees_first() {
    let core = core();

    let p1 = token_payload("r1", "p1", "j1", 1000, 1060);
    let ctx1 = ctx_for(&p1);
    let mut conn1 = FakeConn::new();
    dispatch(&core, &ctx1, &conn1.handle, join_msg(1, "r1", "s1")).await;
    conn1.drain();

    let p2 = token_payload("r1", "p2", "j2", 1000, 1060);
    let ctx2 = ctx_for(&p2);
    let mut conn2 = FakeConn::new();
    let response = dispatch(&core, &ctx2, &conn2.handle, join_msg(2, "r1", "s2"))
        .await
        .into_value();
    let data = response_data(&response);
    assert_eq!(data["existingPeers"], json!([{ "peerId": "p1" }]));

    let notified = conn1
        .next()
        .await
        .expect("first connection should see peerJoined");
    assert_eq!(notified["type"], "peerJoined");
    assert_eq!(notified["peerId"], "p2");
}

#[tokio::test]
async fn produce_then_consume() {
    let core = core();

    let p1 = token_payload("r1", "p1", "j1", 1000, 1060);
    let ctx1 = ctx_for(&p1);
    let mut conn1 = FakeConn::new();
    dispatch(&core, &ctx1, &conn1.handle, join_msg(1, "r1", "s1")).await;
    conn1.drain();

    let p2 = token_payload("r1", "p2", "j2", 1000, 1060);
    let ctx2 = ctx_for(&p2);
    let mut conn2 = FakeConn::new();
    dispatch(&core, &ctx2, &conn2.handle, join_msg(2, "r1", "s2")).await;
    conn1.drain();
    conn2.drain();

    dispatch(
        &core,
        &ctx1,
        &conn1.handle,
        create_transport_msg(3, "s1", "send"),
    )
    .await;
    conn1.drain();
    dispatch(
        &core,
        &ctx2,
        &conn2.handle,
        create_transport_msg(4, "s2", "recv"),
    )
    .await;
    conn2.drain();

    let produced = dispatch(&core, &ctx1, &conn1.handle, produce_msg(5, "s1", "audio"))
        .await
        .into_value();
    let producer_id = response_data(&produced)["producerId"].clone();

    let new_producer = conn2
        .next()
        .await
        .expect("p2 should observe newProducer");
    assert_eq!(new_producer["type"], "newProducer");
    assert_eq!(new_producer["producerId"], producer_id);
    assert_eq!(new_producer["peerId"], "p1");
    assert_eq!(new_producer["kind"], "audio");

    let consumed = dispatch(
        &core,
        &ctx2,
        &conn2.handle,
        consume_msg(6, "s2", producer_id.clone()),
    )
    .await
    .into_value();
    let data = response_data(&consumed);
    assert_eq!(data["producerId"], producer_id);
    assert_eq!(data["kind"], "audio");
    assert_ne!(data["id"], producer_id);
}

#[tokio::test]
async fn connect_transport_requires_existing_transport() {
    let core = core();
    let payload = token_payload("r1", "p1", "j1", 1000, 1060);
    let ctx = ctx_for(&payload);
    let mut conn = FakeConn::new();
    dispatch(&core, &ctx, &conn.handle, join_msg(1, "r1", "s1")).await;
    conn.drain();

    let before = dispatch(
        &core,
        &ctx,
        &conn.handle,
        connect_transport_msg(2, "s1", "send"),
    )
    .await
    .into_value();
    assert_eq!(response_error(&before), "transport not found");

    dispatch(&core, &ctx, &conn.handle, create_transport_msg(3, "s1", "send")).await;
    conn.drain();
    let after = dispatch(
        &core,
        &ctx,
        &conn.handle,
        connect_transport_msg(4, "s1", "send"),
    )
    .await
    .into_value();
    assert_eq!(response_data(&after)["connected"], true);
}

#[tokio::test]
async fn cannot_consume_self() {
    let core = core();
    let payload = token_payload("r1", "p1", "j1", 1000, 1060);
    let ctx = ctx_for(&payload);
    let mut conn = FakeConn::new();
    dispatch(&core, &ctx, &conn.handle, join_msg(1, "r1", "s1")).await;
    conn.drain();
    dispatch(&core, &ctx, &conn.handle, create_transport_msg(2, "s1", "send")).await;
    conn.drain();
    dispatch(&core, &ctx, &conn.handle, create_transport_msg(3, "s1", "recv")).await;
    conn.drain();

    let produced = dispatch(&core, &ctx, &conn.handle, produce_msg(4, "s1", "audio"))
        .await
        .into_value();
    let producer_id = response_data(&produced)["producerId"].clone();

    let consumed = dispatch(&core, &ctx, &conn.handle, consume_msg(5, "s1", producer_id))
        .await
        .into_value();
    assert_eq!(response_error(&consumed), "cannot consume self");
}

#[tokio::test]
async fn grace_survives_reconnect_and_resets_media_silently() {
    let core = core();

    let p1 = token_payload("r1", "p1", "j1", 1000, 1060);
    let ctx1 = ctx_for(&p1);
    let mut conn1 = FakeConn::new();
    dispatch(&core, &ctx1, &conn1.handle, join_msg(1, "r1", "s1")).await;
    conn1.drain();

    let p2 = token_payload("r1", "p2", "j2", 1000, 1060);
    let ctx2 = ctx_for(&p2);
    let mut conn2 = FakeConn::new();
    dispatch(&core, &ctx2, &conn2.handle, join_msg(2, "r1", "s2")).await;
    conn1.drain();
    conn2.drain();

    dispatch(&core, &ctx1, &conn1.handle, create_transport_msg(3, "s1", "send")).await;
    conn1.drain();
    dispatch(&core, &ctx1, &conn1.handle, produce_msg(4, "s1", "audio")).await;
    conn1.drain();
    conn2.drain(); // newProducer, irrelevant here

    // Simulate a drop: arm grace directly rather than going through the
    // socket-close path exercised by the server loop.
    let peer = core.sessions.lookup(&SessionId("s1".to_string())).unwrap();
    core.reset_peer_media(&core.rooms.get(&p1.room_id).unwrap(), &peer);

    // Reconnect within the grace window via resumeSession on a fresh handle.
    let mut conn1b = FakeConn::new();
    let response = dispatch(&core, &ctx1, &conn1b.handle, resume_msg(5, "r1", "s1"))
        .await
        .into_value();
    let data = response_data(&response);
    assert_eq!(data["peerId"], "p1");
    assert_eq!(data["existingProducers"], json!([]));

    // p2 must not have observed a producerClosed during the reset.
    let events = conn2.drain();
    assert!(!events.iter().any(|m| m["type"] == "producerClosed"));
}

#[tokio::test]
async fn replay_rejected() {
    let core = core();
    let now = 1005;
    let payload = token_payload("r1", "p1", "j1", 1000, 1060);
    let token = core.tokens.sign(&payload);

    assert!(core
        .tokens
        .verify(&token, now, &Default::default(), true)
        .is_ok());
    let err = core
        .tokens
        .verify(&token, now + 1, &Default::default(), true)
        .unwrap_err();
    assert_eq!(err.to_string(), "replayed");
}

#[tokio::test]
async fn speaking_state_tracks_volumes_and_silence() {
    let core = core();

    let p1 = token_payload("r1", "p1", "j1", 1000, 1060);
    let ctx1 = ctx_for(&p1);
    let mut conn1 = FakeConn::new();
    dispatch(&core, &ctx1, &conn1.handle, join_msg(1, "r1", "s1")).await;
    conn1.drain();

    let p2 = token_payload("r1", "p2", "j2", 1000, 1060);
    let ctx2 = ctx_for(&p2);
    let mut conn2 = FakeConn::new();
    dispatch(&core, &ctx2, &conn2.handle, join_msg(2, "r1", "s2")).await;
    conn1.drain();
    conn2.drain();

    dispatch(&core, &ctx1, &conn1.handle, create_transport_msg(3, "s1", "send")).await;
    conn1.drain();
    let produced = dispatch(&core, &ctx1, &conn1.handle, produce_msg(4, "s1", "audio"))
        .await
        .into_value();
    let producer_id: ProducerId =
        serde_json::from_value(response_data(&produced)["producerId"].clone()).unwrap();
    conn1.drain();
    conn2.drain(); // newProducer

    let room = core.rooms.get(&RoomId("r1".to_string())).unwrap();
    let observer = room
        .level_observer()
        .as_any()
        .downcast_ref::<SimLevelObserver>()
        .expect("default binary and tests both run on the sim engine");

    observer.push(LevelObserverEvent::Volumes(vec![(producer_id, -30.0)]));
    for conn in [&mut conn1, &mut conn2] {
        let event = conn.next().await.expect("producerSpeaking(true)");
        assert_eq!(event["type"], "producerSpeaking");
        assert_eq!(event["producerId"], json!(producer_id));
        assert_eq!(event["speaking"], true);
    }

    // No active producers this tick: the one active producer falls silent
    // and must be removed from the speaking set, not just marked false.
    observer.push(LevelObserverEvent::Volumes(vec![]));
    for conn in [&mut conn1, &mut conn2] {
        let event = conn.next().await.expect("producerSpeaking(false)");
        assert_eq!(event["speaking"], false);
    }

    // A second consecutive empty tick must be a no-op: the producer was
    // already removed from the speaking set, so it cannot go silent again.
    observer.push(LevelObserverEvent::Volumes(vec![]));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(conn1.drain().is_empty());
    assert!(conn2.drain().is_empty());

    // Re-activate, then drive a silence event: the speaking set clears and
    // a final false is broadcast.
    observer.push(LevelObserverEvent::Volumes(vec![(producer_id, -10.0)]));
    conn1.next().await;
    conn2.next().await;

    observer.push(LevelObserverEvent::Silence);
    for conn in [&mut conn1, &mut conn2] {
        let event = conn.next().await.expect("producerSpeaking(false) on silence");
        assert_eq!(event["speaking"], false);
    }
}

#[tokio::test]
async fn unknown_type_does_not_close_connection() {
    let core = core();
    let payload = token_payload("r1", "p1", "j1", 1000, 1060);
    let ctx = ctx_for(&payload);
    let conn = FakeConn::new();
    let msg = sfu_signal::protocol::IncomingMessage {
        msg_type: "bogus".to_string(),
        request_id: json!(1),
        payload: json!({}),
    };
    let response = dispatch(&core, &ctx, &conn.handle, msg).await.into_value();
    assert_eq!(response_error(&response), "unknown type");
}
