use std::sync::Arc;

use crate::app_state::{AppState, test_state};
use crate::auth::{Admin, RequestAuth, User};
use crate::files::FileUpload;
use crate::hooks::{HookContext, HookEvent, HookResult, Next};
use futures_util::future::BoxFuture;
use crate::records::query::parse_list_query;
use crate::records::{
  RecordError, create_record, delete_record, list_records, read_record, update_record,
};
use crate::schema::engine::{self, CollectionSpec, FieldPatch, FieldSpec};
use crate::schema::{Collection, FieldOptions, FieldType, RuleSet};

fn admin() -> RequestAuth {
  return RequestAuth::Admin(Admin {
    id: "a0".to_string(),
    email: "admin@localhost".to_string(),
  });
}

fn user(id: &str) -> RequestAuth {
  return RequestAuth::User(User {
    id: id.to_string(),
    email: format!("{id}@test.org"),
    verified: true,
    collection_id: "c_users".to_string(),
    collection_name: "users".to_string(),
  });
}

fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
  return value.as_object().expect("object").clone();
}

fn field(name: &str, field_type: FieldType) -> FieldSpec {
  return FieldSpec {
    name: name.to_string(),
    field_type,
    required: false,
    options: FieldOptions::default(),
  };
}

async fn create_posts(state: &AppState, rules: RuleSet) -> Arc<Collection> {
  engine::create_collection(
    state.conn(),
    CollectionSpec {
      name: "posts".to_string(),
      kind: Default::default(),
      options: Default::default(),
      rules,
      fields: vec![
        FieldSpec {
          required: true,
          ..field("title", FieldType::Text)
        },
        field("score", FieldType::Number),
        field("published", FieldType::Boolean),
        field("meta", FieldType::Json),
      ],
    },
  )
  .await
  .unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();

  return state.schema().get("posts").unwrap();
}

#[tokio::test]
async fn test_create_then_read_round_trip() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  let created = create_record(
    &state,
    &posts,
    object(serde_json::json!({
      "title": "hello",
      "score": 10,
      "published": true,
      "meta": {"tags": ["a", "b"]},
    })),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();

  let id = created["id"].as_str().unwrap().to_string();
  assert!(!id.is_empty());
  assert_eq!(created["title"], "hello");
  // JSON fields round-trip as values, not strings; booleans as booleans;
  // integral numbers as integers.
  assert_eq!(created["meta"], serde_json::json!({"tags": ["a", "b"]}));
  assert_eq!(created["published"], serde_json::json!(true));
  assert_eq!(created["score"], serde_json::json!(10));

  let read = read_record(&state, &posts, &id, &admin(), &[]).await.unwrap();
  assert_eq!(created, read);
}

#[tokio::test]
async fn test_update_merges_patch_and_bumps_updated_at() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  let created = create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "v1", "score": 1})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let id = created["id"].as_str().unwrap().to_string();

  let updated = update_record(
    &state,
    &posts,
    &id,
    object(serde_json::json!({"score": 2})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();

  // Patch merged over the prior record.
  assert_eq!(updated["title"], "v1");
  assert_eq!(updated["score"], serde_json::json!(2));
  assert!(
    updated["updated_at"].as_str().unwrap() > created["updated_at"].as_str().unwrap(),
    "updated_at must strictly increase"
  );

  // Validation failures surface per field.
  let result = update_record(
    &state,
    &posts,
    &id,
    object(serde_json::json!({"published": "nope"})),
    vec![],
    &admin(),
    None,
  )
  .await;
  assert!(matches!(result, Err(RecordError::Validation(_))));

  // Unknown records 404.
  let result = update_record(
    &state,
    &posts,
    "missing",
    object(serde_json::json!({"score": 3})),
    vec![],
    &admin(),
    None,
  )
  .await;
  assert!(matches!(result, Err(RecordError::NotFound)));
}

#[tokio::test]
async fn test_rule_guarded_list_and_view() {
  let state = test_state().await;
  // Public list, authenticated view.
  let posts = create_posts(
    &state,
    RuleSet {
      list_rule: Some(String::new()),
      view_rule: Some(r#"@request.auth.id != """#.to_string()),
      ..Default::default()
    },
  )
  .await;

  let created = create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "seen"})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let id = created["id"].as_str().unwrap().to_string();

  // Anonymous list succeeds.
  let listed = list_records(
    &state,
    &posts,
    parse_list_query(None).unwrap(),
    &RequestAuth::Anonymous,
  )
  .await
  .unwrap();
  assert_eq!(listed.total_items, 1);

  // Anonymous view is denied with 403; an authenticated user passes.
  let result = read_record(&state, &posts, &id, &RequestAuth::Anonymous, &[]).await;
  assert!(matches!(result, Err(RecordError::Forbidden)));

  assert!(read_record(&state, &posts, &id, &user("u1"), &[]).await.is_ok());

  // Create without a rule is admin-only.
  let result = create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "x"})),
    vec![],
    &user("u1"),
    None,
  )
  .await;
  assert!(matches!(result, Err(RecordError::Forbidden)));
}

#[tokio::test]
async fn test_before_hook_cancels_create_atomically() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  state.hooks().on(
    HookEvent::BeforeCreate,
    Some("posts"),
    |_ctx, _next: Next| {
      Box::pin(async move {
        Err(crate::hooks::HookError::Rejected("Blocked".to_string()))
      }) as BoxFuture<'static, HookResult>
    },
  );

  let result = create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "X"})),
    vec![],
    &admin(),
    None,
  )
  .await;
  match result {
    Err(RecordError::Hook(message)) => assert!(message.contains("Blocked")),
    other => panic!("expected hook rejection, got {other:?}"),
  }

  // No change is visible to a subsequent read.
  let listed = list_records(&state, &posts, parse_list_query(None).unwrap(), &admin())
    .await
    .unwrap();
  assert_eq!(listed.total_items, 0);
  assert!(listed.items.is_empty());
}

#[tokio::test]
async fn test_before_hook_mutates_data() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  state.hooks().on(
    HookEvent::BeforeCreate,
    Some("posts"),
    |mut ctx: HookContext, next: Next| {
      if let Some(ref mut data) = ctx.data {
        data.insert("score".to_string(), serde_json::json!(42));
      }
      next.run(ctx)
    },
  );

  let created = create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "stamped"})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();

  assert_eq!(created["score"], serde_json::json!(42));
}

#[tokio::test]
async fn test_pagination_math() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  for i in 0..61 {
    create_record(
      &state,
      &posts,
      object(serde_json::json!({"title": format!("post {i}"), "score": i})),
      vec![],
      &admin(),
      None,
    )
    .await
    .unwrap();
  }

  let page3 = list_records(
    &state,
    &posts,
    parse_list_query(Some("perPage=20&page=3&sort=score")).unwrap(),
    &admin(),
  )
  .await
  .unwrap();
  assert_eq!(page3.page, 3);
  assert_eq!(page3.per_page, 20);
  assert_eq!(page3.total_items, 61);
  assert_eq!(page3.total_pages, 4);
  assert_eq!(page3.items.len(), 20);
  assert_eq!(page3.items[0]["score"], serde_json::json!(40));

  let page4 = list_records(
    &state,
    &posts,
    parse_list_query(Some("perPage=20&page=4")).unwrap(),
    &admin(),
  )
  .await
  .unwrap();
  assert_eq!(page4.items.len(), 1);
}

#[tokio::test]
async fn test_filter_escaping_matches_literal_wildcards() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  for title in ["100%", "10"] {
    create_record(
      &state,
      &posts,
      object(serde_json::json!({"title": title})),
      vec![],
      &admin(),
      None,
    )
    .await
    .unwrap();
  }

  // `title~100%` with the percent URL-encoded.
  let listed = list_records(
    &state,
    &posts,
    parse_list_query(Some("title[~]=100%25")).unwrap(),
    &admin(),
  )
  .await
  .unwrap();
  assert_eq!(listed.total_items, 1);
  assert_eq!(listed.items[0]["title"], "100%");

  // An unescaped LIKE would have matched both.
  let listed = list_records(
    &state,
    &posts,
    parse_list_query(Some("title[~]=10")).unwrap(),
    &admin(),
  )
  .await
  .unwrap();
  assert_eq!(listed.total_items, 2);
}

#[tokio::test]
async fn test_invalid_filter_and_sort_fields_fail() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  for raw in ["bogus=1", "sort=-bogus"] {
    let result = list_records(
      &state,
      &posts,
      parse_list_query(Some(raw)).unwrap(),
      &admin(),
    )
    .await;
    assert!(
      matches!(result, Err(RecordError::BadRequest(msg)) if msg == "invalid filter/sort field"),
      "query {raw:?} must be rejected"
    );
  }
}

#[tokio::test]
async fn test_relation_integrity_and_expand() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  engine::create_collection(
    state.conn(),
    CollectionSpec {
      name: "comments".to_string(),
      kind: Default::default(),
      options: Default::default(),
      rules: RuleSet::default(),
      fields: vec![
        FieldSpec {
          required: true,
          ..field("body", FieldType::Text)
        },
        FieldSpec {
          options: FieldOptions {
            target: Some("posts".to_string()),
            ..Default::default()
          },
          ..field("post", FieldType::Relation)
        },
      ],
    },
  )
  .await
  .unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();
  let comments = state.schema().get("comments").unwrap();

  // Dangling relation fails with a relation error, not a validation error.
  let result = create_record(
    &state,
    &comments,
    object(serde_json::json!({"body": "orphan", "post": "missing"})),
    vec![],
    &admin(),
    None,
  )
  .await;
  assert!(matches!(result, Err(RecordError::Relation(field)) if field == "post"));

  let post = create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "parent"})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let post_id = post["id"].as_str().unwrap().to_string();

  let comment = create_record(
    &state,
    &comments,
    object(serde_json::json!({"body": "child", "post": post_id})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();

  // Expansion resolves the target record; unknown expand fields are skipped.
  let read = read_record(
    &state,
    &comments,
    comment["id"].as_str().unwrap(),
    &admin(),
    &["post".to_string(), "bogus".to_string()],
  )
  .await
  .unwrap();
  assert_eq!(read["expand"]["post"]["title"], "parent");
  assert!(read["expand"].get("bogus").is_none());
}

#[tokio::test]
async fn test_schema_field_migrations_preserve_data() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  let created = create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "survivor", "score": 7})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let id = created["id"].as_str().unwrap().to_string();

  // Rename-only takes the fast path.
  engine::update_field(
    state.conn(),
    &posts,
    "score",
    FieldPatch {
      name: Some("points".to_string()),
      ..Default::default()
    },
  )
  .await
  .unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();
  let posts = state.schema().get("posts").unwrap();

  let read = read_record(&state, &posts, &id, &admin(), &[]).await.unwrap();
  assert_eq!(read["points"], serde_json::json!(7));
  assert!(read.get("score").is_none());

  // Making the field required triggers the table-copy migration.
  engine::update_field(
    state.conn(),
    &posts,
    "points",
    FieldPatch {
      required: Some(true),
      ..Default::default()
    },
  )
  .await
  .unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();
  let posts = state.schema().get("posts").unwrap();
  assert!(posts.field("points").unwrap().required);

  let read = read_record(&state, &posts, &id, &admin(), &[]).await.unwrap();
  assert_eq!(read["points"], serde_json::json!(7));
  assert_eq!(read["title"], "survivor");

  // Dropping the column keeps the remaining data intact.
  engine::drop_field(state.conn(), &posts, "points").await.unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();
  let posts = state.schema().get("posts").unwrap();

  let read = read_record(&state, &posts, &id, &admin(), &[]).await.unwrap();
  assert!(read.get("points").is_none());
  assert_eq!(read["title"], "survivor");
}

#[tokio::test]
async fn test_add_required_field_backfills_default() {
  let state = test_state().await;
  let posts = create_posts(&state, RuleSet::default()).await;

  create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "pre-existing"})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();

  engine::add_field(
    state.conn(),
    &posts,
    FieldSpec {
      required: true,
      ..field("category", FieldType::Text)
    },
  )
  .await
  .unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();
  let posts = state.schema().get("posts").unwrap();

  // Existing rows remain valid thanks to the type-appropriate default.
  let listed = list_records(&state, &posts, parse_list_query(None).unwrap(), &admin())
    .await
    .unwrap();
  assert_eq!(listed.items[0]["category"], serde_json::json!(""));
}

#[tokio::test]
async fn test_file_lifecycle() {
  let state = test_state().await;

  engine::create_collection(
    state.conn(),
    CollectionSpec {
      name: "docs".to_string(),
      kind: Default::default(),
      options: Default::default(),
      rules: RuleSet::default(),
      fields: vec![FieldSpec {
        options: FieldOptions {
          max_size: Some(1024),
          mime_types: Some(vec!["text/*".to_string()]),
          ..Default::default()
        },
        ..field("attachment", FieldType::File)
      }],
    },
  )
  .await
  .unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();
  let docs = state.schema().get("docs").unwrap();

  let upload = FileUpload {
    field: "attachment".to_string(),
    original_name: "notes.txt".to_string(),
    content_type: Some("text/plain".to_string()),
    data: b"hello".to_vec(),
  };

  let created = create_record(
    &state,
    &docs,
    serde_json::Map::new(),
    vec![upload.clone()],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let id = created["id"].as_str().unwrap().to_string();

  // Multi-file fields store an ordered list of generated names.
  let filenames = created["attachment"].as_array().unwrap();
  assert_eq!(filenames.len(), 1);
  let filename = filenames[0].as_str().unwrap().to_string();
  assert!(filename.ends_with(".txt"));

  assert_eq!(
    state.files().read("docs", &id, &filename).await.unwrap(),
    b"hello"
  );

  // Disallowed content types are rejected per field options.
  let result = create_record(
    &state,
    &docs,
    serde_json::Map::new(),
    vec![FileUpload {
      content_type: Some("application/zip".to_string()),
      ..upload.clone()
    }],
    &admin(),
    None,
  )
  .await;
  assert!(matches!(result, Err(RecordError::Validation(_))));

  // Record deletion removes the per-record directory.
  delete_record(&state, &docs, &id, &admin(), None).await.unwrap();
  assert!(state.files().read("docs", &id, &filename).await.is_err());
}

#[tokio::test]
async fn test_multi_file_update_semantics() {
  let state = test_state().await;

  engine::create_collection(
    state.conn(),
    CollectionSpec {
      name: "albums".to_string(),
      kind: Default::default(),
      options: Default::default(),
      rules: RuleSet::default(),
      fields: vec![FieldSpec {
        options: FieldOptions {
          max_files: Some(4),
          ..Default::default()
        },
        ..field("photos", FieldType::File)
      }],
    },
  )
  .await
  .unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();
  let albums = state.schema().get("albums").unwrap();

  let upload = |name: &str| FileUpload {
    field: "photos".to_string(),
    original_name: name.to_string(),
    content_type: Some("image/png".to_string()),
    data: vec![1, 2, 3],
  };

  let created = create_record(
    &state,
    &albums,
    serde_json::Map::new(),
    vec![upload("a.png"), upload("b.png")],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let id = created["id"].as_str().unwrap().to_string();
  let initial: Vec<String> = created["photos"]
    .as_array()
    .unwrap()
    .iter()
    .map(|v| v.as_str().unwrap().to_string())
    .collect();
  assert_eq!(initial.len(), 2);

  // Omitting the field keeps existing files; new uploads append in order.
  let updated = update_record(
    &state,
    &albums,
    &id,
    serde_json::Map::new(),
    vec![upload("c.png")],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let after_append = updated["photos"].as_array().unwrap();
  assert_eq!(after_append.len(), 3);
  assert_eq!(after_append[0].as_str().unwrap(), initial[0]);

  // Passing an explicit subset keeps only those files; the dropped one is
  // deleted from disk.
  let updated = update_record(
    &state,
    &albums,
    &id,
    object(serde_json::json!({"photos": [initial[0]]})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let remaining = updated["photos"].as_array().unwrap();
  assert_eq!(remaining.len(), 1);
  assert_eq!(remaining[0].as_str().unwrap(), initial[0]);

  assert!(state.files().read("albums", &id, &initial[1]).await.is_err());
  assert!(state.files().read("albums", &id, &initial[0]).await.is_ok());
}

#[tokio::test]
async fn test_broadcast_reaches_subscribed_clients() {
  let state = test_state().await;
  let posts = create_posts(
    &state,
    RuleSet {
      view_rule: Some(String::new()),
      ..Default::default()
    },
  )
  .await;

  let (client_id, receiver) = state.realtime().connect();
  assert!(state.realtime().set_subscriptions(
    &client_id,
    vec![
      crate::realtime::broker::Subscription::parse("posts/*").unwrap()
    ],
    &RequestAuth::Anonymous,
  ));

  let created = create_record(
    &state,
    &posts,
    object(serde_json::json!({"title": "announced"})),
    vec![],
    &admin(),
    None,
  )
  .await
  .unwrap();

  // The broadcast is dispatched synchronously from the after-hook.
  let event = receiver.try_recv().expect("one event");
  let _ = event;

  // Deletes broadcast the id.
  delete_record(
    &state,
    &posts,
    created["id"].as_str().unwrap(),
    &admin(),
    None,
  )
  .await
  .unwrap();
  assert!(receiver.try_recv().is_ok());
}

#[tokio::test]
async fn test_uploads_respect_max_files(){
  let state = test_state().await;

  engine::create_collection(
    state.conn(),
    CollectionSpec {
      name: "avatars".to_string(),
      kind: Default::default(),
      options: Default::default(),
      rules: RuleSet::default(),
      fields: vec![FieldSpec {
        options: FieldOptions {
          max_files: Some(1),
          ..Default::default()
        },
        ..field("image", FieldType::File)
      }],
    },
  )
  .await
  .unwrap();
  state.schema().rebuild(state.conn()).await.unwrap();
  let avatars = state.schema().get("avatars").unwrap();

  let upload = |name: &str| FileUpload {
    field: "image".to_string(),
    original_name: name.to_string(),
    content_type: None,
    data: vec![0],
  };

  let result = create_record(
    &state,
    &avatars,
    serde_json::Map::new(),
    vec![upload("a.png"), upload("b.png")],
    &admin(),
    None,
  )
  .await;
  assert!(matches!(result, Err(RecordError::Validation(_))));

  // A single upload to a single-file field stores a plain string value and a
  // later upload replaces it.
  let created = create_record(
    &state,
    &avatars,
    serde_json::Map::new(),
    vec![upload("a.png")],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let id = created["id"].as_str().unwrap().to_string();
  let first = created["image"].as_str().unwrap().to_string();

  let updated = update_record(
    &state,
    &avatars,
    &id,
    serde_json::Map::new(),
    vec![upload("b.png")],
    &admin(),
    None,
  )
  .await
  .unwrap();
  let second = updated["image"].as_str().unwrap().to_string();
  assert_ne!(first, second);
  assert!(state.files().read("avatars", &id, &first).await.is_err());
}
