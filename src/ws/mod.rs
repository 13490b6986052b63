//! WebSocket bridge.
//!
//! # Responsibilities
//! - Upgrade client connections whose proxy URL carries the websocket flag
//! - Dial the destination socket with the un-proxied `Origin` and the
//!   session's cookies
//! - Splice frames bidirectionally until either side closes
//! - Propagate close codes verbatim; never leave the client hanging

use axum::extract::ws::{CloseFrame, Message as ClientMessage, WebSocket};
use axum::extract::WebSocketUpgrade;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use http::HeaderMap;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;

use crate::http::server::AppState;
use crate::observability::metrics;
use crate::pipeline::RequestPipelineContext;

/// Accept the client upgrade and run the bridge for its lifetime.
pub fn bridge(
    ws: WebSocketUpgrade,
    state: AppState,
    ctx: RequestPipelineContext,
    client_headers: HeaderMap,
) -> Response {
    ws.on_upgrade(move |socket| run_bridge(socket, state, ctx, client_headers))
}

async fn run_bridge(
    mut client: WebSocket,
    _state: AppState,
    ctx: RequestPipelineContext,
    client_headers: HeaderMap,
) {
    metrics::record_ws_bridge();

    let dest_url = websocket_dest_url(&ctx);
    let request = match upstream_request(&ctx, &dest_url, &client_headers) {
        Some(request) => request,
        None => {
            tracing::warn!(url = %dest_url, "Invalid destination for websocket bridge");
            let _ = client.close().await;
            return;
        }
    };

    let upstream = match connect_async(request).await {
        Ok((upstream, _response)) => upstream,
        Err(e) => {
            tracing::warn!(url = %dest_url, error = %e, "Destination websocket connect failed");
            let _ = client.close().await;
            return;
        }
    };

    tracing::debug!(url = %dest_url, session_id = %ctx.session.id, "WebSocket bridge established");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    loop {
        tokio::select! {
            from_client = client_rx.next() => {
                match from_client {
                    Some(Ok(message)) => {
                        let closing = matches!(message, ClientMessage::Close(_));
                        if upstream_tx.send(to_upstream(message)).await.is_err() || closing {
                            break;
                        }
                    }
                    _ => {
                        let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
                        break;
                    }
                }
            }
            from_upstream = upstream_rx.next() => {
                match from_upstream {
                    Some(Ok(message)) => {
                        let Some(translated) = to_client(message) else { continue };
                        let closing = matches!(translated, ClientMessage::Close(_));
                        if client_tx.send(translated).await.is_err() || closing {
                            break;
                        }
                    }
                    _ => {
                        let _ = client_tx.send(ClientMessage::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(url = %dest_url, "WebSocket bridge closed");
}

/// The destination socket URL. The grammar carries `ws`/`wss` destinations
/// directly; `http`/`https` map to their socket schemes.
fn websocket_dest_url(ctx: &RequestPipelineContext) -> String {
    let mut dest = ctx.dest.clone();
    dest.scheme = match dest.scheme.as_str() {
        "http" => "ws".to_string(),
        "https" => "wss".to_string(),
        other => other.to_string(),
    };
    dest.format()
}

fn upstream_request(
    ctx: &RequestPipelineContext,
    dest_url: &str,
    client_headers: &HeaderMap,
) -> Option<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = dest_url.into_client_request().ok()?;

    // The destination must see the page's origin, not the proxy's.
    let origin = ctx
        .req_origin()
        .map(str::to_string)
        .unwrap_or_else(|| ctx.dest.origin());
    request
        .headers_mut()
        .insert("origin", origin.parse().ok()?);

    if let Some(cookie_header) = ctx.session.cookies.cookie_header(&ctx.dest) {
        if let Ok(value) = cookie_header.parse() {
            request.headers_mut().insert("cookie", value);
        }
    }

    for name in ["sec-websocket-protocol", "sec-websocket-extensions"] {
        if let Some(value) = client_headers.get(name) {
            request.headers_mut().insert(name, value.clone());
        }
    }

    Some(request)
}

fn to_upstream(message: ClientMessage) -> UpstreamMessage {
    match message {
        ClientMessage::Text(text) => UpstreamMessage::Text(text.as_str().into()),
        ClientMessage::Binary(data) => UpstreamMessage::Binary(data),
        ClientMessage::Ping(data) => UpstreamMessage::Ping(data),
        ClientMessage::Pong(data) => UpstreamMessage::Pong(data),
        ClientMessage::Close(frame) => {
            UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.as_str().into(),
            }))
        }
    }
}

fn to_client(message: UpstreamMessage) -> Option<ClientMessage> {
    match message {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.as_str().into())),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Ping(data) => Some(ClientMessage::Ping(data)),
        UpstreamMessage::Pong(data) => Some(ClientMessage::Pong(data)),
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().into(),
        }))),
        // Raw frames never surface from a configured client.
        UpstreamMessage::Frame(_) => None,
    }
}
