//! Proxy service endpoints, served on both listeners alongside proxied
//! traffic: the messaging channel, the session bootstrap script and the
//! client runtime.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, REFERER};
use http::{HeaderMap, StatusCode};
use serde_json::Value;

use crate::http::server::AppState;
use crate::session::SESSION_NOT_OPENED;
use crate::urlcodec::parse_proxy_url;

const JS_CONTENT_TYPE: &str = "application/x-javascript";
const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Served when the task script is requested without a resolvable session.
const EMPTY_TASK_SCRIPT: &str = "/* task script is not available */\n";

/// Placeholder client runtime. The real instrumentation bundle is produced
/// by the client-side tooling and mounted over this route in production.
const CLIENT_RUNTIME_STUB: &str = "/* proxy client runtime */\n";

/// `POST /messaging`: JSON `{cmd, sessionId, ...}` dispatched to the
/// session's command handler table.
pub async fn messaging(State(state): State<AppState>, Json(message): Json<Value>) -> Response {
    // Owned copies; the whole message is handed to the command handler.
    let cmd = message.get("cmd").and_then(Value::as_str).map(str::to_owned);
    let session_id = message
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let (Some(cmd), Some(session_id)) = (cmd, session_id) else {
        return (
            StatusCode::BAD_REQUEST,
            "Message must carry \"cmd\" and \"sessionId\"",
        )
            .into_response();
    };

    let Some(session) = state.registry.lookup(&session_id) else {
        return (StatusCode::INTERNAL_SERVER_ERROR, SESSION_NOT_OPENED).into_response();
    };

    tracing::debug!(session_id = %session_id, cmd = %cmd, "Service message");
    match session.handle_service_message(&cmd, message) {
        Ok(result) => Json(result).into_response(),
        Err(message) => (StatusCode::INTERNAL_SERVER_ERROR, message).into_response(),
    }
}

/// `GET /task.js`: session bootstrap script. The session is identified by
/// the proxy URL embedded in the `Referer` of the including page.
pub async fn task_script(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let referer_session = headers
        .get(REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_proxy_url);

    let script = match referer_session {
        Some(parsed) => match state.registry.lookup(&parsed.session_id) {
            Some(session) => session.task_script(&parsed.dest_url),
            None => EMPTY_TASK_SCRIPT.to_string(),
        },
        None => EMPTY_TASK_SCRIPT.to_string(),
    };

    script_response(script)
}

/// `GET /proxy-client.js`: the injected client runtime.
pub async fn client_script() -> Response {
    script_response(CLIENT_RUNTIME_STUB.to_string())
}

fn script_response(body: String) -> Response {
    (
        [
            (CONTENT_TYPE, JS_CONTENT_TYPE),
            (CACHE_CONTROL, NO_CACHE),
        ],
        body,
    )
        .into_response()
}
