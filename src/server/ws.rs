//! Websocket transport adapter
//!
//! Maps axum websocket messages onto connection frames so the realtime layer
//! never sees the HTTP stack.

use axum::extract::ws::{Message, WebSocket};
use futures::{future, SinkExt, StreamExt};
use tracing::warn;

use crate::realtime::{Connection, Frame};

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
            Message::Ping(bytes) => Frame::Ping(bytes.to_vec()),
            Message::Pong(bytes) => Frame::Pong(bytes.to_vec()),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
            Frame::Ping(bytes) => Message::Ping(bytes.into()),
            Frame::Pong(bytes) => Message::Pong(bytes.into()),
            Frame::Close => Message::Close(None),
        }
    }
}

/// Run `connection` over an upgraded websocket
pub async fn serve_socket(socket: WebSocket, connection: Connection) {
    let peer_id = connection.identity().id.clone();
    let (sink, stream) = socket.split();
    let stream = stream.map(|message| message.map(Frame::from));
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));

    if let Err(e) = connection.serve(stream, sink).await {
        warn!("Connection {} failed: {}", peer_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_conversions() {
        let frame = Frame::from(Message::Text("hi".into()));
        assert_eq!(frame, Frame::Text("hi".to_string()));
        assert_eq!(Frame::from(Message::Close(None)), Frame::Close);

        match Message::from(Frame::Ping(vec![1])) {
            Message::Ping(bytes) => assert_eq!(bytes.as_ref(), &[1]),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
