//! WebSocket upgrade + message loop. Each connection gets its own session on connect (or attaches
//! to an existing one). Each client message is parsed as JSON and forwarded to core logic; we
//! reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};

use crate::error::ExamError;
use crate::logic::*;
use crate::protocol::{ClientWsMessage, ServerWsMessage, SessionView};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "ielts_mock", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn to_json(msg: &ServerWsMessage) -> String {
  serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  })
}

/// Which session a socket speaks for. The one created on connect lives only as long as the
/// socket uses it: it is dropped on attach to another session, or on close.
struct Binding {
  own_id: String,
  current: String,
}

impl Binding {
  fn new(own_id: String) -> Self {
    Self { current: own_id.clone(), own_id }
  }

  async fn attach(&mut self, state: &AppState, target: String) -> ServerWsMessage {
    match view(state, &target).await {
      Ok(v) => {
        info!(target: "ielts_mock", from = %self.current, to = %target, "WebSocket attached to session");
        if self.current == self.own_id && target != self.own_id {
          state.remove_session(&self.own_id).await;
        }
        self.current = target;
        ServerWsMessage::Session { session: v }
      }
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    }
  }

  async fn release(&self, state: &AppState) {
    if self.current == self.own_id {
      state.remove_session(&self.own_id).await;
    }
  }
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  let own = create_session(&state).await;
  let mut binding = Binding::new(own.session_id.clone());
  info!(target: "ielts_mock", session = %binding.own_id, "WebSocket connected");

  if socket.send(Message::Text(to_json(&ServerWsMessage::Session { session: own }))).await.is_err() {
    binding.release(&state).await;
    return;
  }

  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(ClientWsMessage::Attach { session_id: target }) => binding.attach(&state, target).await,
          Ok(incoming) => {
            debug!(target: "ielts_mock", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &binding.current).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        if let Err(e) = socket.send(Message::Text(to_json(&reply_msg))).await {
          error!(target: "ielts_mock", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }

  binding.release(&state).await;
  info!(target: "ielts_mock", session = %binding.current, "WebSocket disconnected");
}

fn session_reply(result: Result<SessionView, ExamError>) -> ServerWsMessage {
  match result {
    Ok(session) => ServerWsMessage::Session { session },
    Err(e) => ServerWsMessage::Error { message: e.to_string() },
  }
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState, id: &str) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::GetSession => session_reply(view(state, id).await),

    // Handled by the socket loop; kept here so the match stays exhaustive.
    ClientWsMessage::Attach { .. } => session_reply(view(state, id).await),

    ClientWsMessage::Submit { request } => session_reply(submit_exam(state, id, request).await),

    ClientWsMessage::Answer { section, index, text } => {
      session_reply(answer_question(state, id, section, index, &text).await)
    }

    ClientWsMessage::Writing { task, text } => session_reply(write_task(state, id, task, &text).await),

    ClientWsMessage::RecordStart => session_reply(start_recording(state, id).await),

    ClientWsMessage::Transcript { snapshot } => match push_transcript(state, id, &snapshot).await {
      Ok(buffer) => ServerWsMessage::Buffer { buffer },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },

    ClientWsMessage::RecordStop => session_reply(stop_recording(state, id).await),

    ClientWsMessage::EditBuffer { text } => session_reply(edit_buffer(state, id, &text).await),

    ClientWsMessage::NextQuestion => session_reply(next_question(state, id).await),

    ClientWsMessage::NextSection => session_reply(next_section(state, id).await),

    ClientWsMessage::Evaluate => session_reply(resubmit_evaluation(state, id).await),

    ClientWsMessage::Restart => session_reply(restart(state, id).await),

    ClientWsMessage::GetReport => match report(state, id).await {
      Ok(report) => ServerWsMessage::Report { report },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::StubGateway;

  fn state() -> AppState {
    AppState::with_gateway(Arc::new(StubGateway::new()))
  }

  #[tokio::test]
  async fn attaching_elsewhere_drops_the_connect_session() {
    let state = state();
    let (own, _) = state.create_session().await;
    let (shared, _) = state.create_session().await;
    let mut binding = Binding::new(own.clone());

    let reply = binding.attach(&state, shared.clone()).await;
    assert!(matches!(reply, ServerWsMessage::Session { session } if session.session_id == shared));
    assert!(state.session(&own).await.is_err());
    assert_eq!(binding.current, shared);

    // The attached session belongs to someone else and outlives the socket.
    binding.release(&state).await;
    assert!(state.session(&shared).await.is_ok());
    assert_eq!(state.session_count().await, 1);
  }

  #[tokio::test]
  async fn failed_attach_keeps_the_connect_session_until_close() {
    let state = state();
    let (own, _) = state.create_session().await;
    let mut binding = Binding::new(own.clone());

    let reply = binding.attach(&state, "missing".into()).await;
    assert!(matches!(reply, ServerWsMessage::Error { .. }));
    assert!(state.session(&own).await.is_ok());

    binding.release(&state).await;
    assert_eq!(state.session_count().await, 0);
  }
}
