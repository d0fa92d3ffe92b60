use axum::response::sse::Event as SseEvent;
use log::*;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::auth::{RequestAuth, User};
use crate::rand::generate_random_string;
use crate::rules::{RuleInput, check_access};
use crate::schema::Collection;

/// Number of events a slow client may fall behind before it is treated as
/// disconnected.
const CLIENT_QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
  Create,
  Update,
  Delete,
}

/// One `{collection, recordId}` topic; `record_id` of None is the wildcard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Subscription {
  pub collection: String,
  pub record_id: Option<String>,
}

impl Subscription {
  /// Accepted shapes: `posts`, `posts/*`, `posts/<recordId>`.
  pub(crate) fn parse(topic: &str) -> Option<Self> {
    let (collection, record_id) = match topic.split_once('/') {
      None => (topic, None),
      Some((collection, "*")) => (collection, None),
      Some((collection, record_id)) if !record_id.is_empty() => {
        (collection, Some(record_id.to_string()))
      }
      Some(_) => return None,
    };

    if collection.is_empty() {
      return None;
    }
    return Some(Subscription {
      collection: collection.to_string(),
      record_id,
    });
  }

  fn matches(&self, collection: &str, record_id: &str) -> bool {
    return self.collection == collection
      && self
        .record_id
        .as_deref()
        .is_none_or(|subscribed| subscribed == record_id);
  }
}

struct Client {
  sender: async_channel::Sender<SseEvent>,
  subscriptions: Vec<Subscription>,
  user: Option<User>,
  is_admin: bool,
  last_activity: Instant,
}

/// Registry of live SSE clients and their subscription sets.
///
/// Delivery is best-effort: any failed write counts as a disconnect and
/// drops the client. A periodic sweep evicts clients without recent
/// activity; heartbeat pings refresh activity for connected clients.
#[derive(Default)]
pub struct RealtimeBroker {
  clients: RwLock<HashMap<String, Client>>,
}

impl RealtimeBroker {
  /// Register a new client and hand back its id plus the event receiver
  /// backing the SSE stream.
  pub(crate) fn connect(&self) -> (String, async_channel::Receiver<SseEvent>) {
    let (sender, receiver) = async_channel::bounded(CLIENT_QUEUE_CAPACITY);
    let client_id = generate_random_string(24);

    self.clients.write().insert(
      client_id.clone(),
      Client {
        sender,
        subscriptions: vec![],
        user: None,
        is_admin: false,
        last_activity: Instant::now(),
      },
    );

    debug!("SSE client connected: {client_id}");
    return (client_id, receiver);
  }

  /// Drop a client, e.g. on transport abort.
  pub(crate) fn remove(&self, client_id: &str) {
    if self.clients.write().remove(client_id).is_some() {
      debug!("SSE client removed: {client_id}");
    }
  }

  /// Replace a client's subscription set (idempotent) and attach the
  /// caller's identity for permission-filtered broadcast.
  pub(crate) fn set_subscriptions(
    &self,
    client_id: &str,
    subscriptions: Vec<Subscription>,
    auth: &RequestAuth,
  ) -> bool {
    let mut clients = self.clients.write();
    let Some(client) = clients.get_mut(client_id) else {
      return false;
    };

    client.subscriptions = subscriptions;
    client.user = auth.user().cloned();
    client.is_admin = auth.is_admin();
    client.last_activity = Instant::now();
    return true;
  }

  /// Fan one record change out to all matching clients, filtered by the
  /// collection's view rule against each client's identity.
  pub(crate) fn broadcast(
    &self,
    collection: &Collection,
    record_id: &str,
    action: RecordAction,
    record: &serde_json::Value,
  ) {
    let payload = serde_json::json!({"action": action, "record": record}).to_string();

    let mut dropped: Vec<String> = vec![];
    {
      let clients = self.clients.read();
      for (client_id, client) in clients.iter() {
        if !client
          .subscriptions
          .iter()
          .any(|s| s.matches(&collection.name, record_id))
        {
          continue;
        }

        let input = RuleInput {
          is_admin: client.is_admin,
          auth: client.user.as_ref(),
          record: record.as_object(),
          body: None,
        };
        if !check_access(collection.rules.view_rule.as_deref(), &input) {
          continue;
        }

        let event = SseEvent::default()
          .event(collection.name.clone())
          .data(payload.clone());
        if client.sender.try_send(event).is_err() {
          dropped.push(client_id.clone());
        }
      }
    }

    if !dropped.is_empty() {
      let mut clients = self.clients.write();
      for client_id in dropped {
        debug!("Dropping unreachable SSE client: {client_id}");
        clients.remove(&client_id);
      }
    }
  }

  /// Send a heartbeat comment to every client; a successful write refreshes
  /// the client's activity, a failed one drops it.
  pub(crate) fn ping_all(&self) {
    let mut clients = self.clients.write();
    let now = Instant::now();

    clients.retain(|client_id, client| {
      let event = SseEvent::default().comment("ping");
      match client.sender.try_send(event) {
        Ok(()) => {
          client.last_activity = now;
          true
        }
        Err(_) => {
          debug!("Dropping unreachable SSE client: {client_id}");
          false
        }
      }
    });
  }

  /// Evict clients whose last activity is older than `timeout`.
  pub(crate) fn sweep(&self, timeout: Duration) {
    let mut clients = self.clients.write();
    clients.retain(|client_id, client| {
      let alive = client.last_activity.elapsed() < timeout;
      if !alive {
        debug!("Evicting inactive SSE client: {client_id}");
      }
      return alive;
    });
  }

  pub(crate) fn touch(&self, client_id: &str) {
    if let Some(client) = self.clients.write().get_mut(client_id) {
      client.last_activity = Instant::now();
    }
  }

  pub fn client_count(&self) -> usize {
    return self.clients.read().len();
  }

  #[cfg(test)]
  pub(crate) fn last_activity(&self, client_id: &str) -> Option<Instant> {
    return self.clients.read().get(client_id).map(|c| c.last_activity);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::{CollectionOptions, CollectionType, RuleSet};

  fn public_collection(name: &str) -> Collection {
    return Collection {
      id: format!("c_{name}"),
      name: name.to_string(),
      kind: CollectionType::Base,
      options: CollectionOptions::default(),
      rules: RuleSet {
        view_rule: Some(String::new()),
        ..Default::default()
      },
      created_at: String::new(),
      updated_at: String::new(),
      fields: vec![],
    };
  }

  #[test]
  fn test_subscription_parsing() {
    assert_eq!(
      Subscription::parse("posts"),
      Some(Subscription {
        collection: "posts".to_string(),
        record_id: None,
      })
    );
    assert_eq!(
      Subscription::parse("posts/*"),
      Some(Subscription {
        collection: "posts".to_string(),
        record_id: None,
      })
    );
    assert_eq!(
      Subscription::parse("posts/r1"),
      Some(Subscription {
        collection: "posts".to_string(),
        record_id: Some("r1".to_string()),
      })
    );
    assert_eq!(Subscription::parse(""), None);
    assert_eq!(Subscription::parse("posts/"), None);
  }

  #[tokio::test]
  async fn test_broadcast_matches_wildcard_and_record_topics() {
    let broker = RealtimeBroker::default();
    let collection = public_collection("posts");

    let (wildcard_id, wildcard_rx) = broker.connect();
    let (record_id_client, record_rx) = broker.connect();
    let (other_id, other_rx) = broker.connect();

    assert!(broker.set_subscriptions(
      &wildcard_id,
      vec![Subscription::parse("posts/*").unwrap()],
      &RequestAuth::Anonymous,
    ));
    assert!(broker.set_subscriptions(
      &record_id_client,
      vec![Subscription::parse("posts/r1").unwrap()],
      &RequestAuth::Anonymous,
    ));
    assert!(broker.set_subscriptions(
      &other_id,
      vec![Subscription::parse("comments/*").unwrap()],
      &RequestAuth::Anonymous,
    ));

    broker.broadcast(
      &collection,
      "r1",
      RecordAction::Create,
      &serde_json::json!({"id": "r1"}),
    );

    assert!(wildcard_rx.try_recv().is_ok());
    assert!(record_rx.try_recv().is_ok());
    assert!(other_rx.try_recv().is_err());

    broker.broadcast(
      &collection,
      "r2",
      RecordAction::Update,
      &serde_json::json!({"id": "r2"}),
    );
    assert!(wildcard_rx.try_recv().is_ok());
    assert!(record_rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_view_rule_filters_broadcast() {
    let broker = RealtimeBroker::default();
    let mut collection = public_collection("posts");
    collection.rules.view_rule = Some(r#"@request.auth.id != """#.to_string());

    let (anon_id, anon_rx) = broker.connect();
    broker.set_subscriptions(
      &anon_id,
      vec![Subscription::parse("posts/*").unwrap()],
      &RequestAuth::Anonymous,
    );

    let user = User {
      id: "u1".to_string(),
      email: "u@test.org".to_string(),
      verified: true,
      collection_id: "c1".to_string(),
      collection_name: "users".to_string(),
    };
    let (user_id, user_rx) = broker.connect();
    broker.set_subscriptions(
      &user_id,
      vec![Subscription::parse("posts/*").unwrap()],
      &RequestAuth::User(user),
    );

    broker.broadcast(
      &collection,
      "r1",
      RecordAction::Create,
      &serde_json::json!({"id": "r1"}),
    );

    assert!(anon_rx.try_recv().is_err());
    assert!(user_rx.try_recv().is_ok());
  }

  #[tokio::test]
  async fn test_disconnected_clients_are_dropped_on_broadcast() {
    let broker = RealtimeBroker::default();
    let collection = public_collection("posts");

    let (client_id, receiver) = broker.connect();
    broker.set_subscriptions(
      &client_id,
      vec![Subscription::parse("posts/*").unwrap()],
      &RequestAuth::Anonymous,
    );
    assert_eq!(broker.client_count(), 1);

    drop(receiver);
    broker.broadcast(
      &collection,
      "r1",
      RecordAction::Delete,
      &serde_json::json!({"id": "r1"}),
    );
    assert_eq!(broker.client_count(), 0);
  }

  #[tokio::test]
  async fn test_ping_refreshes_activity_and_sweep_evicts() {
    let broker = RealtimeBroker::default();

    let (client_id, _receiver) = broker.connect();
    let before = broker.last_activity(&client_id).unwrap();

    broker.ping_all();
    assert!(broker.last_activity(&client_id).unwrap() >= before);
    assert_eq!(broker.client_count(), 1);

    // Nothing is younger than a zero timeout.
    broker.sweep(Duration::from_secs(0));
    assert_eq!(broker.client_count(), 0);
  }
}
