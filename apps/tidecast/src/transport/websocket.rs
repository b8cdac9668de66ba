//! Browser-terminal bridge: one WebSocket connection per session. Outbound
//! text frames carry rendered views; inbound text frames carry JSON control
//! messages (`{"key": ...}` / `{"resize": {"cols", "rows"}}`).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use ringcast::CancelToken;
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::client::ChatClient;
use crate::program::client::{self, ClientMsg, Key};
use crate::program::engine::EngineHandle;
use crate::session::ClientInfo;

use super::Identity;

#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    resize: Option<ResizeFrame>,
}

#[derive(Debug, Deserialize)]
struct ResizeFrame {
    cols: u16,
    rows: u16,
}

/// Accept connections until `token` cancels; each one becomes an
/// independent client session.
pub async fn serve(
    listener: TcpListener,
    engine: EngineHandle,
    identity: Arc<dyn Identity>,
    token: CancelToken,
) -> Result<()> {
    info!(
        target = "transport::ws",
        addr = %listener.local_addr()?,
        "listening for browser terminals"
    );
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(target = "transport::ws", error = %err, "accept failed");
                        continue;
                    }
                };
                let engine = engine.clone();
                let identity = identity.clone();
                let session_token = token.child();
                tokio::spawn(async move {
                    if let Err(err) = handle_conn(stream, peer, engine, identity, session_token).await {
                        debug!(target = "transport::ws", peer = %peer, error = %err, "connection ended");
                    }
                });
            }
        }
    }
}

async fn handle_conn(
    stream: TcpStream,
    peer: SocketAddr,
    engine: EngineHandle,
    identity: Arc<dyn Identity>,
    token: CancelToken,
) -> Result<()> {
    let mut query: Option<String> = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        query = req.uri().query().map(str::to_string);
        Ok(resp)
    })
    .await?;

    let login = identity.resolve(peer, query.as_deref());
    let info = ClientInfo::webtty(&login, &peer.to_string());
    info!(target = "transport::ws", id = %info.id(), "session open");

    let (frames_tx, mut frames_rx) = watch::channel(String::new());
    let mut handle = client::spawn(engine, ChatClient::new(info), token.clone(), frames_tx).await?;

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,

            changed = frames_rx.changed() => {
                if changed.is_err() {
                    // Session loop ended and dropped its frame sender.
                    break;
                }
                let frame = frames_rx.borrow_and_update().clone();
                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(msg) = decode_control(&text) {
                        if !handle.send(msg).await {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(target = "transport::ws", peer = %peer, error = %err, "read failed");
                    break;
                }
            }
        }
    }

    handle.quit();
    let err = handle.wait().await;
    info!(target = "transport::ws", peer = %peer, error = ?err, "session closed");
    Ok(())
}

fn decode_control(text: &str) -> Option<ClientMsg> {
    let frame: ControlFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(target = "transport::ws", error = %err, "bad control frame");
            return None;
        }
    };
    if let Some(resize) = frame.resize {
        return Some(ClientMsg::Resize {
            cols: resize.cols,
            rows: resize.rows,
        });
    }
    frame.key.as_deref().and_then(parse_key).map(ClientMsg::Key)
}

fn parse_key(s: &str) -> Option<Key> {
    match s {
        "enter" => Some(Key::Enter),
        "backspace" => Some(Key::Backspace),
        "esc" | "escape" => Some(Key::Esc),
        "ctrl+c" => Some(Key::CtrlC),
        "space" => Some(Key::Char(' ')),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(Key::Char(c)),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_key_frames() {
        match decode_control(r#"{"key":"a"}"#) {
            Some(ClientMsg::Key(Key::Char('a'))) => {}
            other => panic!("unexpected: {other:?}"),
        }
        match decode_control(r#"{"key":"enter"}"#) {
            Some(ClientMsg::Key(Key::Enter)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_resize_frames() {
        match decode_control(r#"{"resize":{"cols":120,"rows":32}}"#) {
            Some(ClientMsg::Resize { cols: 120, rows: 32 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_control("not json").is_none());
        assert!(decode_control(r#"{"key":"weird-key"}"#).is_none());
        assert!(decode_control(r#"{}"#).is_none());
    }
}
