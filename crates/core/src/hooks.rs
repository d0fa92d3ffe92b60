use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
  /// A handler rejected the operation; for before-events this aborts the
  /// mutation and the message is surfaced to the client.
  #[error("{0}")]
  Rejected(String),
  #[error("Internal: {0}")]
  Internal(Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookEvent {
  BeforeCreate,
  AfterCreate,
  BeforeUpdate,
  AfterUpdate,
  BeforeDelete,
  AfterDelete,
}

/// Request descriptor handed to handlers. The engine never exposes the raw
/// transport object.
#[derive(Clone, Debug, Default)]
pub struct RequestInfo {
  pub method: String,
  pub path: String,
  pub headers: Vec<(String, String)>,
}

/// Per-event context, threaded through the chain by value. Which members are
/// populated depends on the event: `data` for before-create/update (mutable
/// to influence the pending write), `existing` for before-update/delete,
/// `record` for after-create/update and `id` for everything addressing one
/// record.
#[derive(Debug, Default)]
pub struct HookContext {
  pub collection: String,
  pub id: Option<String>,
  pub data: Option<serde_json::Map<String, serde_json::Value>>,
  pub record: Option<serde_json::Value>,
  pub existing: Option<serde_json::Value>,
  pub request: Option<RequestInfo>,
}

pub type HookResult = Result<HookContext, HookError>;

/// A middleware-style handler: run code, then either await `next.run(ctx)`
/// to continue the chain (and run more code after it), return the context
/// without doing so to end the chain quietly, or return an error to abort.
pub trait HookHandler: Send + Sync {
  fn call(&self, ctx: HookContext, next: Next) -> BoxFuture<'static, HookResult>;
}

impl<F> HookHandler for F
where
  F: Fn(HookContext, Next) -> BoxFuture<'static, HookResult> + Send + Sync,
{
  fn call(&self, ctx: HookContext, next: Next) -> BoxFuture<'static, HookResult> {
    return self(ctx, next);
  }
}

/// The remainder of a hook chain.
pub struct Next {
  remaining: VecDeque<Arc<dyn HookHandler>>,
}

impl Next {
  pub fn run(mut self, ctx: HookContext) -> BoxFuture<'static, HookResult> {
    return Box::pin(async move {
      let Some(head) = self.remaining.pop_front() else {
        return Ok(ctx);
      };
      return head.call(ctx, self).await;
    });
  }
}

struct Registration {
  /// None for global handlers, otherwise the collection the handler is bound
  /// to.
  collection: Option<String>,
  handler: Arc<dyn HookHandler>,
}

/// Ordered, scoped hook chains keyed by event.
///
/// `on` and `trigger` may interleave freely; `trigger` observes the handler
/// list as of invocation.
#[derive(Default)]
pub struct HookRegistry {
  registrations: RwLock<HashMap<HookEvent, Vec<Registration>>>,
}

impl HookRegistry {
  pub fn on(
    &self,
    event: HookEvent,
    collection: Option<&str>,
    handler: impl HookHandler + 'static,
  ) {
    self
      .registrations
      .write()
      .entry(event)
      .or_default()
      .push(Registration {
        collection: collection.map(str::to_string),
        handler: Arc::new(handler),
      });
  }

  /// Run all global handlers plus those bound to `ctx.collection`, in
  /// registration order. Returns the (possibly mutated) context.
  pub async fn trigger(&self, event: HookEvent, ctx: HookContext) -> HookResult {
    let chain: VecDeque<Arc<dyn HookHandler>> = {
      let registrations = self.registrations.read();
      let Some(handlers) = registrations.get(&event) else {
        return Ok(ctx);
      };
      handlers
        .iter()
        .filter(|r| {
          r.collection
            .as_ref()
            .is_none_or(|name| *name == ctx.collection)
        })
        .map(|r| r.handler.clone())
        .collect()
    };

    return Next { remaining: chain }.run(ctx).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn ctx_for(collection: &str) -> HookContext {
    return HookContext {
      collection: collection.to_string(),
      ..Default::default()
    };
  }

  #[tokio::test]
  async fn test_handlers_run_in_registration_order_and_wrap_next() {
    let registry = HookRegistry::default();
    let order = Arc::new(RwLock::new(Vec::<&'static str>::new()));

    {
      let order = order.clone();
      registry.on(HookEvent::BeforeCreate, None, move |ctx, next: Next| {
        let order = order.clone();
        Box::pin(async move {
          order.write().push("outer-pre");
          let ctx = next.run(ctx).await?;
          order.write().push("outer-post");
          Ok(ctx)
        }) as BoxFuture<'static, HookResult>
      });
    }
    {
      let order = order.clone();
      registry.on(
        HookEvent::BeforeCreate,
        Some("posts"),
        move |ctx, _next: Next| {
          let order = order.clone();
          Box::pin(async move {
            order.write().push("inner");
            // Soft-cancel: the remainder is never invoked.
            Ok(ctx)
          }) as BoxFuture<'static, HookResult>
        },
      );
    }

    registry
      .trigger(HookEvent::BeforeCreate, ctx_for("posts"))
      .await
      .unwrap();

    assert_eq!(*order.read(), vec!["outer-pre", "inner", "outer-post"]);
  }

  #[tokio::test]
  async fn test_collection_scoping() {
    let registry = HookRegistry::default();
    let calls = Arc::new(AtomicUsize::new(0));

    {
      let calls = calls.clone();
      registry.on(
        HookEvent::AfterCreate,
        Some("posts"),
        move |ctx, next: Next| {
          calls.fetch_add(1, Ordering::SeqCst);
          next.run(ctx)
        },
      );
    }

    registry
      .trigger(HookEvent::AfterCreate, ctx_for("comments"))
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    registry
      .trigger(HookEvent::AfterCreate, ctx_for("posts"))
      .await
      .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_error_aborts_chain() {
    let registry = HookRegistry::default();
    let reached = Arc::new(AtomicUsize::new(0));

    registry.on(HookEvent::BeforeDelete, None, move |_ctx, _next: Next| {
      Box::pin(async move { Err(HookError::Rejected("Blocked".to_string())) }) as BoxFuture<'static, HookResult>
    });
    {
      let reached = reached.clone();
      registry.on(HookEvent::BeforeDelete, None, move |ctx, next: Next| {
        reached.fetch_add(1, Ordering::SeqCst);
        next.run(ctx)
      });
    }

    let result = registry
      .trigger(HookEvent::BeforeDelete, ctx_for("posts"))
      .await;
    assert!(matches!(result, Err(HookError::Rejected(msg)) if msg == "Blocked"));
    assert_eq!(reached.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_data_mutation_is_visible_downstream() {
    let registry = HookRegistry::default();

    registry.on(HookEvent::BeforeCreate, None, |mut ctx: HookContext, next: Next| {
      if let Some(ref mut data) = ctx.data {
        data.insert("stamped".to_string(), serde_json::Value::Bool(true));
      }
      next.run(ctx)
    });

    let ctx = HookContext {
      collection: "posts".to_string(),
      data: Some(serde_json::Map::new()),
      ..Default::default()
    };
    let ctx = registry
      .trigger(HookEvent::BeforeCreate, ctx)
      .await
      .unwrap();

    assert_eq!(
      ctx.data.unwrap().get("stamped"),
      Some(&serde_json::Value::Bool(true))
    );
  }
}
