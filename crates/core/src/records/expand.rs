use crate::app_state::AppState;
use crate::records::RecordError;
use crate::records::value::row_to_record;
use crate::schema::{Collection, FieldType};
use bunbase_sqlite::params;

/// Attach `expand` maps to the given records.
///
/// Every requested expand field resolves via a single id lookup into its
/// target collection. Non-relation fields, unknown targets and dangling ids
/// are skipped quietly rather than failing the read.
pub(crate) async fn attach_expansions(
  state: &AppState,
  collection: &Collection,
  records: &mut [serde_json::Value],
  expand: &[String],
) -> Result<(), RecordError> {
  for field_name in expand {
    let Some(field) = collection.field(field_name) else {
      continue;
    };
    if field.field_type != FieldType::Relation {
      continue;
    }
    let Some(target) = field
      .options
      .target
      .as_deref()
      .and_then(|name| state.schema().get(name))
    else {
      continue;
    };

    for record in records.iter_mut() {
      let Some(id) = record
        .get(field_name)
        .and_then(|value| value.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
      else {
        continue;
      };

      let Some(row) = state
        .conn()
        .query_row(
          format!(r#"SELECT * FROM "{table}" WHERE id = $1"#, table = target.name),
          params!(id),
        )
        .await?
      else {
        continue;
      };

      let expanded = row_to_record(&target, &row);
      let Some(record_map) = record.as_object_mut() else {
        continue;
      };
      record_map
        .entry("expand")
        .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()))
        .as_object_mut()
        .map(|expand_map| expand_map.insert(field_name.clone(), expanded));
    }
  }

  return Ok(());
}
