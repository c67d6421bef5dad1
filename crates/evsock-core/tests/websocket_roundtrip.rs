//! End-to-end tests over a real WebSocket listener.

use evsock_core::{Connection, Server};
use evsock_protocol::{codec, ControlEvent, Envelope, Frame, Payload};
use evsock_transport::WebSocketTransport;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> String {
    let transport = WebSocketTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();

    let server = Server::builder()
        .on_connection(|conn: &Connection| {
            conn.on("echo", |conn, payload| {
                conn.send_payload("echo", payload).unwrap();
            });
            conn.on("frame", |conn, payload| {
                conn.send_payload("frame", payload).unwrap();
            });
        })
        .build(transport);
    tokio::spawn(server.run());

    format!("ws://{addr}")
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data.to_vec()),
    }
}

async fn send(client: &mut Client, frame: Frame) {
    client.send(to_message(frame)).await.unwrap();
}

async fn recv(client: &mut Client) -> Option<Envelope> {
    loop {
        let message = timeout(Duration::from_millis(500), client.next())
            .await
            .ok()??
            .unwrap();
        let frame = match message {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
            _ => continue,
        };
        return Some(codec::decode(&frame).unwrap());
    }
}

/// Connect and complete the `sync` handshake.
async fn connect(url: &str) -> Client {
    let (mut client, _) = connect_async(url).await.unwrap();

    let sync = recv(&mut client).await.unwrap();
    assert_eq!(sync.control(), Some(ControlEvent::Sync));
    assert_eq!(sync.data.as_json().unwrap()["hasAuth"], json!(false));

    let echo = codec::encode_text(ControlEvent::Sync.wire_name(), sync.data.as_json().unwrap());
    send(&mut client, echo.unwrap()).await;
    client
}

#[tokio::test]
async fn test_text_event_roundtrip() {
    let url = start_server().await;
    let mut client = connect(&url).await;

    send(&mut client, codec::encode_text("echo", &json!({"hello": "world"})).unwrap()).await;

    assert_eq!(
        recv(&mut client).await,
        Some(Envelope::new("echo", json!({"hello": "world"})))
    );
}

#[tokio::test]
async fn test_binary_event_roundtrip() {
    let url = start_server().await;
    let mut client = connect(&url).await;

    send(&mut client, codec::encode_binary("frame", &[1, 2, 3]).unwrap()).await;

    let reply = recv(&mut client).await.unwrap();
    assert_eq!(reply.event, "frame");
    assert_eq!(reply.data, Payload::from(vec![1u8, 2, 3]));
}

#[tokio::test]
async fn test_channel_broadcast() {
    let url = start_server().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;

    for client in [&mut a, &mut b] {
        send(client, codec::encode_text(ControlEvent::JoinChannel.wire_name(), "room1").unwrap())
            .await;
        let ack = recv(client).await.unwrap();
        assert_eq!(ack.control(), Some(ControlEvent::ChannelJoin));
        assert_eq!(ack.data, Payload::from(json!("room1")));
    }

    let request = json!({"evName": "msg", "data": {"x": 1}});
    send(
        &mut a,
        codec::encode_text(ControlEvent::Broadcast.wire_name(), &request).unwrap(),
    )
    .await;

    let expected = Envelope::new("msg", json!({"x": 1}));
    assert_eq!(recv(&mut a).await, Some(expected.clone()));
    assert_eq!(recv(&mut b).await, Some(expected));
    assert_eq!(recv(&mut c).await, None);
}
