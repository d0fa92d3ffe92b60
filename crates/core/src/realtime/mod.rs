use axum::{
  Json, Router,
  extract::State,
  response::sse::{Event as SseEvent, Sse},
  routing::{get, post},
};
use futures_util::Stream;
use pin_project_lite::pin_project;
use serde::Deserialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pub(crate) mod broker;

pub use broker::RealtimeBroker;
pub(crate) use broker::RecordAction;

use crate::AppState;
use crate::auth::RequestAuth;
use crate::constants::REALTIME_API_PATH;
use crate::records::RecordError;
use broker::Subscription;

pub(crate) fn router() -> Router<AppState> {
  return Router::new()
    .route(
      &format!("/{REALTIME_API_PATH}"),
      get(realtime_stream_handler),
    )
    .route(
      &format!("/{REALTIME_API_PATH}"),
      post(update_subscriptions_handler),
    );
}

/// RAII cleanup: dropping the stream (client disconnect, server shutdown)
/// deregisters the client.
struct ClientGuard {
  broker: Arc<RealtimeBroker>,
  client_id: String,
}

impl Drop for ClientGuard {
  fn drop(&mut self) {
    self.broker.remove(&self.client_id);
  }
}

pin_project! {
  /// Per-connection event stream: the connect frame first, then whatever the
  /// broker queues for this client.
  #[must_use = "streams do nothing unless polled"]
  struct ClientStream {
    connect: Option<SseEvent>,
    #[pin]
    receiver: async_channel::Receiver<SseEvent>,
    guard: ClientGuard,
  }
}

impl Stream for ClientStream {
  type Item = Result<SseEvent, Infallible>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let mut this = self.project();

    if let Some(event) = this.connect.take() {
      return Poll::Ready(Some(Ok(event)));
    }

    let event = futures_util::ready!(this.receiver.as_mut().poll_next(cx));
    return Poll::Ready(event.map(Ok));
  }
}

/// Open the SSE stream. The server allocates a client id and announces it in
/// a `connect` event; the id is the handle for subscription updates.
async fn realtime_stream_handler(
  State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
  let broker = state.realtime().clone();
  let (client_id, receiver) = broker.connect();

  let connect = SseEvent::default()
    .event("connect")
    .data(serde_json::json!({"clientId": client_id}).to_string());

  return Sse::new(ClientStream {
    connect: Some(connect),
    receiver,
    guard: ClientGuard { broker, client_id },
  });
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateSubscriptionsRequest {
  client_id: String,
  #[serde(default)]
  subscriptions: Vec<String>,
}

/// Replace a client's subscription set. An authenticated call binds the
/// caller's identity to the client for permission-filtered broadcast.
async fn update_subscriptions_handler(
  State(state): State<AppState>,
  auth: RequestAuth,
  Json(request): Json<UpdateSubscriptionsRequest>,
) -> Result<Json<serde_json::Value>, RecordError> {
  let subscriptions = request
    .subscriptions
    .iter()
    .map(|topic| Subscription::parse(topic))
    .collect::<Option<Vec<_>>>()
    .ok_or(RecordError::BadRequest("invalid subscription topic"))?;

  let known = state
    .realtime()
    .set_subscriptions(&request.client_id, subscriptions, &auth);
  if !known {
    return Err(RecordError::NotFound);
  }

  state.realtime().touch(&request.client_id);
  return Ok(Json(serde_json::json!({})));
}
