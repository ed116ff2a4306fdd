//! `GET /shared_edits/p/{post_id}/stream`: the document channel as
//! Server-Sent Events.
//!
//! Each [`ChannelMessage`] becomes one event named after its `type`. A
//! subscriber that falls too far behind is sent a `resync` in place of the
//! messages it missed.

use std::convert::Infallible;

use axum::{
  extract::{Path, State},
  response::sse::{Event, KeepAlive, Sse},
};
use tandem_core::store::PostStore;
use tandem_sync::{ChannelMessage, SharedEdits, kv::KeyValue};
use tokio_stream::{
  Stream, StreamExt as _,
  wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};

use crate::editor::Editor;

pub async fn handler<S, K>(
  State(edits): State<SharedEdits<S, K>>,
  _editor: Editor,
  Path(post_id): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
  S: PostStore + 'static,
  K: KeyValue + 'static,
{
  let rx = edits.hub().subscribe(post_id);
  let events = BroadcastStream::new(rx).map(move |item| {
    let message = match item {
      Ok(message) => message,
      Err(BroadcastStreamRecvError::Lagged(skipped)) => {
        tracing::warn!(post_id, skipped, "subscriber lagged, forcing resync");
        ChannelMessage::Resync { version: None }
      }
    };
    Ok(event(&message))
  });
  Sse::new(events).keep_alive(KeepAlive::default())
}

fn event(message: &ChannelMessage) -> Event {
  let name = match message {
    ChannelMessage::Edit { .. } => "edit",
    ChannelMessage::Resync { .. } => "resync",
  };
  Event::default()
    .event(name)
    .json_data(message)
    .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

