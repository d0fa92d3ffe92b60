use const_format::formatcp;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::{COLLECTIONS_TABLE, FIELDS_TABLE};
use crate::schema::{
  Collection, CollectionOptions, CollectionType, Field, FieldOptions, FieldType, RuleSet,
  SchemaError,
};
use bunbase_sqlite::Connection;

/// In-memory snapshot of all collection metadata.
///
/// The store is the source of truth; every schema mutation must be followed
/// by [SchemaCache::rebuild] so concurrent readers observe the new shape.
#[derive(Default)]
pub struct SchemaCache {
  collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl SchemaCache {
  pub fn get(&self, name: &str) -> Option<Arc<Collection>> {
    return self.collections.read().get(name).cloned();
  }

  pub fn list(&self) -> Vec<Arc<Collection>> {
    let mut collections: Vec<_> = self.collections.read().values().cloned().collect();
    collections.sort_by(|a, b| a.name.cmp(&b.name));
    return collections;
  }

  /// Refetch all collections and fields from the store.
  pub async fn rebuild(&self, conn: &Connection) -> Result<(), SchemaError> {
    const COLLECTIONS_QUERY: &str = formatcp!(
      "SELECT id, name, type, options, rules, created_at, updated_at
         FROM {COLLECTIONS_TABLE} ORDER BY _rowid_"
    );
    // Declaration order is insertion order.
    const FIELDS_QUERY: &str = formatcp!(
      "SELECT id, collection_id, name, type, required, options, created_at
         FROM {FIELDS_TABLE} ORDER BY _rowid_"
    );

    let collection_rows = conn.query_rows(COLLECTIONS_QUERY, ()).await?;
    let field_rows = conn.query_rows(FIELDS_QUERY, ()).await?;

    let mut fields_by_collection: HashMap<String, Vec<Field>> = HashMap::new();
    for row in field_rows.iter() {
      let type_name: String = row.get(3).map_err(invalid_metadata)?;
      let options_json: String = row.get(5).map_err(invalid_metadata)?;

      let field = Field {
        id: row.get(0).map_err(invalid_metadata)?,
        collection_id: row.get(1).map_err(invalid_metadata)?,
        name: row.get(2).map_err(invalid_metadata)?,
        field_type: FieldType::parse(&type_name)
          .ok_or_else(|| SchemaError::UnknownFieldType(type_name.clone()))?,
        required: row.get(4).map_err(invalid_metadata)?,
        options: serde_json::from_str::<FieldOptions>(&options_json)?,
        created_at: row.get(6).map_err(invalid_metadata)?,
      };
      fields_by_collection
        .entry(field.collection_id.clone())
        .or_default()
        .push(field);
    }

    let mut collections = HashMap::new();
    for row in collection_rows.iter() {
      let id: String = row.get(0).map_err(invalid_metadata)?;
      let name: String = row.get(1).map_err(invalid_metadata)?;
      let type_name: String = row.get(2).map_err(invalid_metadata)?;
      let options_json: String = row.get(3).map_err(invalid_metadata)?;
      let rules_json: String = row.get(4).map_err(invalid_metadata)?;

      let collection = Collection {
        fields: fields_by_collection.remove(&id).unwrap_or_default(),
        id,
        name: name.clone(),
        kind: CollectionType::parse(&type_name)
          .ok_or_else(|| SchemaError::UnknownFieldType(type_name.clone()))?,
        options: serde_json::from_str::<CollectionOptions>(&options_json)?,
        rules: serde_json::from_str::<RuleSet>(&rules_json)?,
        created_at: row.get(5).map_err(invalid_metadata)?,
        updated_at: row.get(6).map_err(invalid_metadata)?,
      };

      collections.insert(name, Arc::new(collection));
    }

    *self.collections.write() = collections;
    return Ok(());
  }
}

fn invalid_metadata(err: rusqlite::types::FromSqlError) -> SchemaError {
  return SchemaError::Sql(bunbase_sqlite::Error::Other(err.into()));
}
