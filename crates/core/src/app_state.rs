use futures_util::future::BoxFuture;
use log::*;
use std::sync::Arc;

use crate::auth::JwtHelper;
use crate::data_dir::DataDir;
use crate::email::Mailer;
use crate::files::{FileStore, delete_file_metadata};
use crate::hooks::{HookEvent, HookRegistry, HookResult, Next};
use crate::realtime::{RealtimeBroker, RecordAction};
use crate::schema::SchemaCache;
use bunbase_sqlite::Connection;

/// The app's internal state. AppState needs to be clonable which puts
/// unnecessary constraints on the internals. Thus rather arc once than many
/// times.
struct InternalState {
  data_dir: DataDir,
  conn: Connection,
  jwt: JwtHelper,
  schema: Arc<SchemaCache>,
  hooks: Arc<HookRegistry>,
  realtime: Arc<RealtimeBroker>,
  files: FileStore,
  mailer: Mailer,

  #[cfg(test)]
  #[allow(unused)]
  test_cleanup: parking_lot::Mutex<Vec<Box<dyn std::any::Any + Send>>>,
}

pub(crate) struct AppStateArgs {
  pub data_dir: DataDir,
  pub conn: Connection,
  pub jwt: JwtHelper,
  pub schema: Arc<SchemaCache>,
  pub files: FileStore,
  pub mailer: Mailer,
}

#[derive(Clone)]
pub struct AppState {
  state: Arc<InternalState>,
}

impl AppState {
  pub(crate) fn new(args: AppStateArgs) -> Self {
    let hooks = Arc::new(HookRegistry::default());
    let realtime = Arc::new(RealtimeBroker::default());

    install_builtin_hooks(
      &hooks,
      realtime.clone(),
      args.schema.clone(),
      args.files.clone(),
      args.conn.clone(),
    );

    return AppState {
      state: Arc::new(InternalState {
        data_dir: args.data_dir,
        conn: args.conn,
        jwt: args.jwt,
        schema: args.schema,
        hooks,
        realtime,
        files: args.files,
        mailer: args.mailer,

        #[cfg(test)]
        test_cleanup: parking_lot::Mutex::new(vec![]),
      }),
    };
  }

  pub fn conn(&self) -> &Connection {
    return &self.state.conn;
  }

  pub fn jwt(&self) -> &JwtHelper {
    return &self.state.jwt;
  }

  pub fn schema(&self) -> &SchemaCache {
    return &self.state.schema;
  }

  pub fn hooks(&self) -> &HookRegistry {
    return &self.state.hooks;
  }

  pub fn realtime(&self) -> &Arc<RealtimeBroker> {
    return &self.state.realtime;
  }

  pub fn files(&self) -> &FileStore {
    return &self.state.files;
  }

  pub fn mailer(&self) -> &Mailer {
    return &self.state.mailer;
  }

  pub fn data_dir(&self) -> &DataDir {
    return &self.state.data_dir;
  }

  #[cfg(test)]
  pub(crate) fn stash_test_cleanup(&self, any: Box<dyn std::any::Any + Send>) {
    self.state.test_cleanup.lock().push(any);
  }
}

/// The hooks the core itself relies on. They run first in every chain and
/// perform their work *after* awaiting the remainder, so user handlers
/// observe the event before fan-out and cleanup happen.
fn install_builtin_hooks(
  hooks: &HookRegistry,
  realtime: Arc<RealtimeBroker>,
  schema: Arc<SchemaCache>,
  files: FileStore,
  conn: Connection,
) {
  // Record deletion owns the per-record file tree.
  hooks.on(HookEvent::AfterDelete, None, move |ctx, next: Next| {
    let files = files.clone();
    let conn = conn.clone();
    Box::pin(async move {
      let ctx = next.run(ctx).await?;
      if let Some(ref id) = ctx.id {
        if let Err(err) = delete_file_metadata(&conn, &ctx.collection, id, None).await {
          warn!("Failed to drop file metadata: {err}");
        }
        if let Err(err) = files.remove_record_dir(&ctx.collection, id).await {
          warn!("Failed to remove record files: {err}");
        }
      }
      Ok(ctx)
    }) as BoxFuture<'static, HookResult>
  });

  {
    let realtime = realtime.clone();
    let schema = schema.clone();
    hooks.on(HookEvent::AfterCreate, None, move |ctx, next: Next| {
      let realtime = realtime.clone();
      let schema = schema.clone();
      Box::pin(async move {
        let ctx = next.run(ctx).await?;
        broadcast(&realtime, &schema, &ctx, RecordAction::Create);
        Ok(ctx)
      }) as BoxFuture<'static, HookResult>
    });
  }
  {
    let realtime = realtime.clone();
    let schema = schema.clone();
    hooks.on(HookEvent::AfterUpdate, None, move |ctx, next: Next| {
      let realtime = realtime.clone();
      let schema = schema.clone();
      Box::pin(async move {
        let ctx = next.run(ctx).await?;
        broadcast(&realtime, &schema, &ctx, RecordAction::Update);
        Ok(ctx)
      }) as BoxFuture<'static, HookResult>
    });
  }
  hooks.on(HookEvent::AfterDelete, None, move |ctx, next: Next| {
    let realtime = realtime.clone();
    let schema = schema.clone();
    Box::pin(async move {
      let ctx = next.run(ctx).await?;
      broadcast(&realtime, &schema, &ctx, RecordAction::Delete);
      Ok(ctx)
    }) as BoxFuture<'static, HookResult>
  });
}

fn broadcast(
  realtime: &RealtimeBroker,
  schema: &SchemaCache,
  ctx: &crate::hooks::HookContext,
  action: RecordAction,
) {
  let Some(ref id) = ctx.id else {
    return;
  };
  let Some(collection) = schema.get(&ctx.collection) else {
    return;
  };

  // Deletes no longer have a record to ship; the id is the payload.
  let fallback = serde_json::json!({"id": id});
  let record = ctx.record.as_ref().unwrap_or(&fallback);

  realtime.broadcast(&collection, id, action, record);
}

#[cfg(test)]
pub(crate) async fn test_state() -> AppState {
  use crate::auth::jwt::test_jwt_helper;
  use crate::migrations::apply_main_migrations;

  let _ = env_logger::try_init_from_env(env_logger::Env::new().default_filter_or("info"));

  let conn = Connection::open_in_memory().expect("in-memory db");
  conn
    .call(|conn| {
      apply_main_migrations(conn).map_err(|err| bunbase_sqlite::Error::Other(err.into()))?;
      return Ok(());
    })
    .await
    .expect("migrations");

  let schema = Arc::new(SchemaCache::default());
  schema.rebuild(&conn).await.expect("schema cache");

  let tmp = temp_dir::TempDir::new().expect("temp dir");
  let files = FileStore::new(tmp.path().to_path_buf());
  let (mailer, _outbox) = Mailer::new_for_test();

  let state = AppState::new(AppStateArgs {
    data_dir: DataDir(tmp.path().to_path_buf()),
    conn,
    jwt: test_jwt_helper(),
    schema,
    files,
    mailer,
  });
  state.stash_test_cleanup(Box::new(tmp));

  return state;
}
