use const_format::formatcp;
use serde::Deserialize;

use crate::constants::{COLLECTIONS_TABLE, FIELDS_TABLE};
use crate::schema::alter::copy_rebuild;
use crate::schema::{
  Collection, CollectionOptions, CollectionType, Field, FieldOptions, FieldType, RuleSet,
  SchemaError, is_safe_identifier, reserved_field_names,
};
use crate::util::{new_record_id, now_rfc3339};
use bunbase_sqlite::Connection;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
  pub name: String,
  #[serde(rename = "type")]
  pub field_type: FieldType,
  #[serde(default)]
  pub required: bool,
  #[serde(default)]
  pub options: FieldOptions,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSpec {
  pub name: String,
  #[serde(rename = "type", default)]
  pub kind: CollectionType,
  #[serde(default)]
  pub options: CollectionOptions,
  #[serde(default)]
  pub rules: RuleSet,
  #[serde(default)]
  pub fields: Vec<FieldSpec>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatch {
  pub name: Option<String>,
  #[serde(rename = "type")]
  pub field_type: Option<FieldType>,
  pub required: Option<bool>,
  pub options: Option<FieldOptions>,
}

fn validate_field_spec(spec: &FieldSpec, kind: CollectionType) -> Result<(), SchemaError> {
  if !is_safe_identifier(&spec.name) {
    return Err(SchemaError::InvalidIdentifier(spec.name.clone()));
  }
  if reserved_field_names(kind).contains(&spec.name.as_str()) {
    return Err(SchemaError::ReservedField(spec.name.clone()));
  }
  if spec.field_type == FieldType::Relation && spec.options.target.is_none() {
    return Err(SchemaError::MissingRelationTarget);
  }
  return Ok(());
}

fn insert_field_row(tx: &rusqlite::Transaction, field: &Field) -> Result<(), SchemaError> {
  const QUERY: &str = formatcp!(
    "INSERT INTO {FIELDS_TABLE}
       (id, collection_id, name, type, required, options, created_at)
     VALUES ($1, $2, $3, $4, $5, $6, $7)"
  );

  tx.execute(
    QUERY,
    rusqlite::params![
      field.id,
      field.collection_id,
      field.name,
      field.field_type.as_str(),
      field.required,
      serde_json::to_string(&field.options)?,
      field.created_at,
    ],
  )?;
  return Ok(());
}

fn touch_collection_row(
  tx: &rusqlite::Transaction,
  collection_id: &str,
) -> Result<(), SchemaError> {
  const QUERY: &str = formatcp!("UPDATE {COLLECTIONS_TABLE} SET updated_at = $1 WHERE id = $2");
  tx.execute(QUERY, rusqlite::params![now_rfc3339(), collection_id])?;
  return Ok(());
}

fn collection_name_exists(
  tx: &rusqlite::Transaction,
  name: &str,
) -> Result<bool, rusqlite::Error> {
  const QUERY: &str =
    formatcp!("SELECT EXISTS(SELECT 1 FROM {COLLECTIONS_TABLE} WHERE name = $1)");
  return tx.query_row(QUERY, [name], |row| row.get(0));
}

/// Create a collection: metadata rows plus the backing table, in one write
/// transaction.
pub async fn create_collection(
  conn: &Connection,
  spec: CollectionSpec,
) -> Result<Collection, SchemaError> {
  if !is_safe_identifier(&spec.name) {
    return Err(SchemaError::InvalidIdentifier(spec.name.clone()));
  }
  for field_spec in &spec.fields {
    validate_field_spec(field_spec, spec.kind)?;
    if spec
      .fields
      .iter()
      .filter(|other| other.name == field_spec.name)
      .count()
      > 1
    {
      return Err(SchemaError::FieldExists(field_spec.name.clone()));
    }
  }

  let now = now_rfc3339();
  let collection_id = new_record_id();
  let collection = Collection {
    id: collection_id.clone(),
    name: spec.name,
    kind: spec.kind,
    options: spec.options,
    rules: spec.rules,
    created_at: now.clone(),
    updated_at: now.clone(),
    fields: spec
      .fields
      .into_iter()
      .map(|f| Field {
        id: new_record_id(),
        collection_id: collection_id.clone(),
        name: f.name,
        field_type: f.field_type,
        required: f.required,
        options: f.options,
        created_at: now.clone(),
      })
      .collect(),
  };

  let create_body = collection.create_table_body(false)?;

  return conn
    .call(move |conn| {
      let tx = conn.transaction()?;

      if collection_name_exists(&tx, &collection.name)
        .map_err(|err| bunbase_sqlite::Error::Rusqlite(err))?
      {
        return Ok(Err(SchemaError::CollectionExists));
      }

      for field in &collection.fields {
        if field.field_type == FieldType::Relation {
          let target = field.options.target.as_deref().unwrap_or_default();
          if !collection_name_exists(&tx, target)
            .map_err(|err| bunbase_sqlite::Error::Rusqlite(err))?
          {
            return Ok(Err(SchemaError::MissingRelationTarget));
          }
        }
      }

      let result = (|| -> Result<(), SchemaError> {
        const QUERY: &str = formatcp!(
          "INSERT INTO {COLLECTIONS_TABLE}
             (id, name, type, options, rules, created_at, updated_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        tx.execute(
          QUERY,
          rusqlite::params![
            collection.id,
            collection.name,
            collection.kind.as_str(),
            serde_json::to_string(&collection.options)?,
            serde_json::to_string(&collection.rules)?,
            collection.created_at,
            collection.updated_at,
          ],
        )?;

        for field in &collection.fields {
          insert_field_row(&tx, field)?;
        }

        tx.execute_batch(&format!(
          r#"CREATE TABLE "{name}" (
  {create_body}
)"#,
          name = collection.name
        ))?;

        return Ok(());
      })();

      return match result {
        Ok(()) => {
          tx.commit()
            .map_err(|err| bunbase_sqlite::Error::Rusqlite(err))?;
          Ok(Ok(collection))
        }
        Err(err) => Ok(Err(err)),
      };
    })
    .await
    .map_err(SchemaError::Sql)?;
}

/// Append a field: metadata row plus ADD COLUMN, in one transaction.
///
/// Required relation fields cannot take SQLite's ADD COLUMN path (a non-null
/// default on a REFERENCES column is rejected), so they go through the table
/// copy instead.
pub async fn add_field(
  conn: &Connection,
  collection: &Collection,
  spec: FieldSpec,
) -> Result<(), SchemaError> {
  validate_field_spec(&spec, collection.kind)?;
  if collection.field(&spec.name).is_some() {
    return Err(SchemaError::FieldExists(spec.name));
  }

  let field = Field {
    id: new_record_id(),
    collection_id: collection.id.clone(),
    name: spec.name,
    field_type: spec.field_type,
    required: spec.required,
    options: spec.options,
    created_at: now_rfc3339(),
  };

  if field.field_type == FieldType::Relation && field.required {
    let mut next = collection.clone();
    next.fields.push(field.clone());
    return rebuild_collection_table(conn, collection, next, vec![RowChange::Insert(field)]).await;
  }

  let definition = field.column_definition(true)?;
  let table = collection.name.clone();
  let collection_id = collection.id.clone();

  return conn
    .call(move |conn| {
      let tx = conn.transaction()?;

      let result = (|| -> Result<(), SchemaError> {
        if field.field_type == FieldType::Relation {
          let target = field.options.target.as_deref().unwrap_or_default();
          if !collection_name_exists(&tx, target)? {
            return Err(SchemaError::MissingRelationTarget);
          }
        }

        insert_field_row(&tx, &field)?;
        touch_collection_row(&tx, &collection_id)?;
        tx.execute_batch(&format!(r#"ALTER TABLE "{table}" ADD COLUMN {definition}"#))?;
        return Ok(());
      })();

      return match result {
        Ok(()) => {
          tx.commit()
            .map_err(|err| bunbase_sqlite::Error::Rusqlite(err))?;
          Ok(Ok(()))
        }
        Err(err) => Ok(Err(err)),
      };
    })
    .await
    .map_err(SchemaError::Sql)?;
}

/// Update a field. A pure rename maps to a single RENAME COLUMN; changes to
/// type or required-ness rebuild the table via the copy migration.
pub async fn update_field(
  conn: &Connection,
  collection: &Collection,
  field_name: &str,
  patch: FieldPatch,
) -> Result<(), SchemaError> {
  let Some(field) = collection.field(field_name) else {
    return Err(SchemaError::FieldNotFound);
  };

  let mut next_field = field.clone();
  if let Some(ref name) = patch.name {
    if !is_safe_identifier(name) {
      return Err(SchemaError::InvalidIdentifier(name.clone()));
    }
    if reserved_field_names(collection.kind).contains(&name.as_str()) {
      return Err(SchemaError::ReservedField(name.clone()));
    }
    if name != field_name && collection.field(name).is_some() {
      return Err(SchemaError::FieldExists(name.clone()));
    }
    next_field.name = name.clone();
  }
  if let Some(field_type) = patch.field_type {
    next_field.field_type = field_type;
  }
  if let Some(required) = patch.required {
    next_field.required = required;
  }
  if let Some(options) = patch.options {
    next_field.options = options;
  }

  if next_field.field_type == FieldType::Relation && next_field.options.target.is_none() {
    return Err(SchemaError::MissingRelationTarget);
  }

  // Only type and required-ness (plus a changed relation target) alter the
  // column itself; renames are a single statement and anything else is
  // metadata-only.
  let needs_rebuild = next_field.field_type != field.field_type
    || next_field.required != field.required
    || (next_field.field_type == FieldType::Relation
      && next_field.options.target != field.options.target);

  if !needs_rebuild {
    let table = collection.name.clone();
    let old_name = field.name.clone();
    let next_field = next_field.clone();
    let collection_id = collection.id.clone();

    return conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let result = (|| -> Result<(), SchemaError> {
          const QUERY: &str =
            formatcp!("UPDATE {FIELDS_TABLE} SET name = $1, options = $2 WHERE id = $3");
          tx.execute(
            QUERY,
            rusqlite::params![
              next_field.name,
              serde_json::to_string(&next_field.options)?,
              next_field.id
            ],
          )?;
          touch_collection_row(&tx, &collection_id)?;

          if next_field.name != old_name {
            tx.execute_batch(&format!(
              r#"ALTER TABLE "{table}" RENAME COLUMN "{old_name}" TO "{new_name}""#,
              new_name = next_field.name
            ))?;
          }
          return Ok(());
        })();

        return match result {
          Ok(()) => {
            tx.commit()
              .map_err(|err| bunbase_sqlite::Error::Rusqlite(err))?;
            Ok(Ok(()))
          }
          Err(err) => Ok(Err(err)),
        };
      })
      .await
      .map_err(SchemaError::Sql)?;
  }

  let mut next = collection.clone();
  if let Some(slot) = next.fields.iter_mut().find(|f| f.name == field_name) {
    *slot = next_field.clone();
  }
  return rebuild_collection_table(
    conn,
    collection,
    next,
    vec![RowChange::Update(next_field)],
  )
  .await;
}

/// Drop a field: metadata row plus the table copy without the column.
pub async fn drop_field(
  conn: &Connection,
  collection: &Collection,
  field_name: &str,
) -> Result<(), SchemaError> {
  let Some(field) = collection.field(field_name) else {
    return Err(SchemaError::FieldNotFound);
  };

  let mut next = collection.clone();
  next.fields.retain(|f| f.name != field_name);
  return rebuild_collection_table(
    conn,
    collection,
    next,
    vec![RowChange::Delete(field.id.clone())],
  )
  .await;
}

/// Drop a collection: the metadata row (fields cascade) and the table.
pub async fn drop_collection(conn: &Connection, collection: &Collection) -> Result<(), SchemaError> {
  let table = collection.name.clone();
  let collection_id = collection.id.clone();

  return conn
    .call(move |conn| {
      let tx = conn.transaction()?;

      let result = (|| -> Result<(), SchemaError> {
        const QUERY: &str = formatcp!("DELETE FROM {COLLECTIONS_TABLE} WHERE id = $1");
        tx.execute(QUERY, rusqlite::params![collection_id])?;
        tx.execute_batch(&format!(r#"DROP TABLE "{table}""#))?;
        return Ok(());
      })();

      return match result {
        Ok(()) => {
          tx.commit()
            .map_err(|err| bunbase_sqlite::Error::Rusqlite(err))?;
          Ok(Ok(()))
        }
        Err(err) => Ok(Err(err)),
      };
    })
    .await
    .map_err(SchemaError::Sql)?;
}

/// Metadata-only update: rules and per-kind options require no DDL.
pub async fn update_collection_metadata(
  conn: &Connection,
  collection: &Collection,
  rules: Option<RuleSet>,
  options: Option<CollectionOptions>,
) -> Result<(), SchemaError> {
  let rules_json = serde_json::to_string(&rules.unwrap_or_else(|| collection.rules.clone()))?;
  let options_json =
    serde_json::to_string(&options.unwrap_or_else(|| collection.options.clone()))?;
  let collection_id = collection.id.clone();

  const QUERY: &str = formatcp!(
    "UPDATE {COLLECTIONS_TABLE} SET rules = $1, options = $2, updated_at = $3 WHERE id = $4"
  );
  conn
    .execute(
      QUERY,
      bunbase_sqlite::params!(rules_json, options_json, now_rfc3339(), collection_id),
    )
    .await?;
  return Ok(());
}

enum RowChange {
  Insert(Field),
  Update(Field),
  Delete(String),
}

/// Shared table-copy path: apply metadata changes and rebuild the backing
/// table to the `next` shape inside one transaction, with foreign-key
/// enforcement suspended around it and an integrity check before commit.
async fn rebuild_collection_table(
  conn: &Connection,
  current: &Collection,
  next: Collection,
  changes: Vec<RowChange>,
) -> Result<(), SchemaError> {
  let create_body = next.create_table_body(false)?;

  // Only columns present in both old and new shape survive the copy.
  let old_columns = current.table_columns();
  let copy_columns: Vec<String> = next
    .table_columns()
    .into_iter()
    .filter(|c| old_columns.contains(c))
    .map(|c| c.to_string())
    .collect();

  let table = current.name.clone();
  let collection_id = current.id.clone();

  return conn
    .call(move |conn| {
      conn.pragma_update(None, "foreign_keys", "OFF")?;

      let result = (|| -> Result<(), SchemaError> {
        let tx = conn.transaction()?;

        for change in &changes {
          match change {
            RowChange::Insert(field) => insert_field_row(&tx, field)?,
            RowChange::Update(field) => {
              const QUERY: &str = formatcp!(
                "UPDATE {FIELDS_TABLE}
                   SET name = $1, type = $2, required = $3, options = $4
                 WHERE id = $5"
              );
              tx.execute(
                QUERY,
                rusqlite::params![
                  field.name,
                  field.field_type.as_str(),
                  field.required,
                  serde_json::to_string(&field.options)?,
                  field.id,
                ],
              )?;
            }
            RowChange::Delete(field_id) => {
              const QUERY: &str = formatcp!("DELETE FROM {FIELDS_TABLE} WHERE id = $1");
              tx.execute(QUERY, rusqlite::params![field_id])?;
            }
          }
        }
        touch_collection_row(&tx, &collection_id)?;

        copy_rebuild(&tx, &table, &create_body, &copy_columns)?;

        tx.commit()?;
        return Ok(());
      })();

      conn.pragma_update(None, "foreign_keys", "ON")?;

      return Ok(result);
    })
    .await
    .map_err(SchemaError::Sql)?;
}
