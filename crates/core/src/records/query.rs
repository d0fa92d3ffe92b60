use itertools::Itertools;
use std::borrow::Cow;

use crate::constants::{DEFAULT_PER_PAGE, MAX_PER_PAGE};
use crate::records::RecordError;
use crate::schema::{Collection, FieldType};
use bunbase_sqlite::NamedParams;
use rusqlite::types::Value as SqlValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FilterOp {
  Equal,
  NotEqual,
  LessThan,
  LessThanEqual,
  GreaterThan,
  GreaterThanEqual,
  Like,
  NotLike,
}

impl FilterOp {
  fn parse(op: &str) -> Option<Self> {
    return match op {
      "=" => Some(Self::Equal),
      "!=" => Some(Self::NotEqual),
      "<" => Some(Self::LessThan),
      "<=" => Some(Self::LessThanEqual),
      ">" => Some(Self::GreaterThan),
      ">=" => Some(Self::GreaterThanEqual),
      "~" => Some(Self::Like),
      "!~" => Some(Self::NotLike),
      _ => None,
    };
  }

  fn as_sql(&self) -> &'static str {
    return match self {
      Self::Equal => "=",
      Self::NotEqual => "<>",
      Self::LessThan => "<",
      Self::LessThanEqual => "<=",
      Self::GreaterThan => ">",
      Self::GreaterThanEqual => ">=",
      Self::Like => "LIKE",
      Self::NotLike => "NOT LIKE",
    };
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Order {
  Ascending,
  Descending,
}

impl Order {
  fn as_sql(&self) -> &'static str {
    return match self {
      Self::Ascending => "ASC",
      Self::Descending => "DESC",
    };
  }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Filter {
  pub field: String,
  pub op: FilterOp,
  pub value: String,
}

/// Parsed list-query parameters: pagination, sort, filters, expansion.
#[derive(Clone, Debug, Default)]
pub struct ListQuery {
  pub(crate) page: u64,
  pub(crate) per_page: u64,
  pub(crate) sort: Vec<(String, Order)>,
  pub(crate) filters: Vec<Filter>,
  pub(crate) expand: Vec<String>,
}

impl ListQuery {
  /// Parse a raw URL query, e.g. `page=2&perPage=50&sort=-created_at`.
  pub fn parse(raw_query: Option<&str>) -> Result<Self, RecordError> {
    return parse_list_query(raw_query);
  }
}

/// Parse the raw URL query. Reserved keys are `page`, `perPage`, `sort`,
/// `expand` and `token`; every other key is a `field` or `field[op]` filter.
/// Out-of-range pagination values clamp rather than fail.
pub(crate) fn parse_list_query(raw_query: Option<&str>) -> Result<ListQuery, RecordError> {
  let mut query = ListQuery {
    page: 1,
    per_page: DEFAULT_PER_PAGE,
    ..Default::default()
  };

  let Some(raw_query) = raw_query else {
    return Ok(query);
  };

  for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
    match key.as_ref() {
      "page" => {
        let page: u64 = value
          .parse()
          .map_err(|_| RecordError::BadRequest("invalid page"))?;
        query.page = page.max(1);
      }
      "perPage" => {
        let per_page: u64 = value
          .parse()
          .map_err(|_| RecordError::BadRequest("invalid perPage"))?;
        query.per_page = per_page.clamp(1, MAX_PER_PAGE);
      }
      "sort" => {
        // NOTE: An unencoded `+` prefix arrives as a space after form
        // decoding; trimming maps it back onto the ascending default.
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
          let (field, order) = match entry.split_at_checked(1) {
            Some(("-", field)) => (field, Order::Descending),
            Some(("+", field)) => (field, Order::Ascending),
            _ => (entry, Order::Ascending),
          };
          query.sort.push((field.to_string(), order));
        }
      }
      "expand" => {
        query
          .expand
          .extend(value.split(',').filter(|e| !e.is_empty()).map(str::to_string));
      }
      // Tokens may ride along in the query string for SSE/file links.
      "token" => {}
      key => {
        let (field, op) = match key.split_once('[') {
          Some((field, rest)) => {
            let op = rest
              .strip_suffix(']')
              .and_then(FilterOp::parse)
              .ok_or(RecordError::BadRequest("invalid filter operator"))?;
            (field, op)
          }
          None => (key, FilterOp::Equal),
        };

        query.filters.push(Filter {
          field: field.to_string(),
          op,
          value: value.into_owned(),
        });
      }
    }
  }

  return Ok(query);
}

/// The two SQL artifacts of a list operation plus their shared parameters.
pub(crate) struct BuiltListQuery {
  pub data_sql: String,
  pub count_sql: String,
  pub params: NamedParams,
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern under
/// `ESCAPE '\'`, then wrap in wildcards.
fn like_pattern(value: &str) -> String {
  let escaped = value
    .replace('\\', "\\\\")
    .replace('%', "\\%")
    .replace('_', "\\_");
  return format!("%{escaped}%");
}

/// Type a filter value according to the column it targets.
fn filter_value(
  collection: &Collection,
  field: &str,
  op: FilterOp,
  value: &str,
) -> Result<SqlValue, RecordError> {
  if matches!(op, FilterOp::Like | FilterOp::NotLike) {
    return Ok(SqlValue::Text(like_pattern(value)));
  }

  let field_type = match field {
    "id" | "created_at" | "updated_at" | "email" => FieldType::Text,
    "verified" => FieldType::Boolean,
    name => {
      collection
        .field(name)
        .map(|f| f.field_type)
        // Fields passed the whitelist already.
        .unwrap_or(FieldType::Text)
    }
  };

  return match field_type {
    FieldType::Number => value
      .parse::<f64>()
      .map(SqlValue::Real)
      .map_err(|_| RecordError::BadRequest("invalid numeric filter value")),
    FieldType::Boolean => match value {
      "true" | "1" => Ok(SqlValue::Integer(1)),
      "false" | "0" => Ok(SqlValue::Integer(0)),
      _ => Err(RecordError::BadRequest("invalid boolean filter value")),
    },
    _ => Ok(SqlValue::Text(value.to_string())),
  };
}

/// Build the data and count statements for a list query.
///
/// Filter and sort identifiers are checked against the collection's
/// whitelist; unknown names fail with a distinct error and are never
/// substituted into SQL. Values bind to unique synthetic parameters.
pub(crate) fn build_list_query(
  collection: &Collection,
  query: &ListQuery,
) -> Result<BuiltListQuery, RecordError> {
  let whitelist = collection.column_whitelist();

  let mut params: NamedParams = vec![];
  let mut clauses: Vec<String> = vec![];

  for (index, filter) in query.filters.iter().enumerate() {
    if !whitelist.contains(&filter.field.as_str()) {
      return Err(RecordError::BadRequest("invalid filter/sort field"));
    }

    let param = format!(":filter_{index}");
    let clause = match filter.op {
      FilterOp::Like | FilterOp::NotLike => format!(
        r#""{field}" {op} {param} ESCAPE '\'"#,
        field = filter.field,
        op = filter.op.as_sql()
      ),
      _ => format!(
        r#""{field}" {op} {param}"#,
        field = filter.field,
        op = filter.op.as_sql()
      ),
    };
    clauses.push(clause);

    params.push((
      Cow::Owned(param),
      filter_value(collection, &filter.field, filter.op, &filter.value)?,
    ));
  }

  let where_clause = if clauses.is_empty() {
    String::new()
  } else {
    format!(" WHERE {}", clauses.join(" AND "))
  };

  let order_clause = if query.sort.is_empty() {
    r#" ORDER BY "created_at" DESC, "id" DESC"#.to_string()
  } else {
    let entries = query
      .sort
      .iter()
      .map(|(field, order)| -> Result<String, RecordError> {
        if !whitelist.contains(&field.as_str()) {
          return Err(RecordError::BadRequest("invalid filter/sort field"));
        }
        return Ok(format!(r#""{field}" {}"#, order.as_sql()));
      })
      .process_results(|mut iter| iter.join(", "))?;
    format!(" ORDER BY {entries}")
  };

  let table = &collection.name;
  let data_sql =
    format!(r#"SELECT * FROM "{table}"{where_clause}{order_clause} LIMIT :__limit OFFSET :__offset"#);
  let count_sql = format!(r#"SELECT COUNT(*) FROM "{table}"{where_clause}"#);

  params.push((
    Cow::Borrowed(":__limit"),
    SqlValue::Integer(query.per_page as i64),
  ));
  params.push((
    Cow::Borrowed(":__offset"),
    SqlValue::Integer(((query.page.max(1) - 1) * query.per_page) as i64),
  ));

  return Ok(BuiltListQuery {
    data_sql,
    count_sql,
    params,
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::{CollectionOptions, CollectionType, Field, FieldOptions, RuleSet};

  fn test_collection() -> Collection {
    let field = |name: &str, field_type: FieldType| Field {
      id: format!("f_{name}"),
      collection_id: "c0".to_string(),
      name: name.to_string(),
      field_type,
      required: false,
      options: FieldOptions::default(),
      created_at: String::new(),
    };

    return Collection {
      id: "c0".to_string(),
      name: "posts".to_string(),
      kind: CollectionType::Base,
      options: CollectionOptions::default(),
      rules: RuleSet::default(),
      created_at: String::new(),
      updated_at: String::new(),
      fields: vec![field("title", FieldType::Text), field("score", FieldType::Number)],
    };
  }

  #[test]
  fn test_parse_pagination_clamps() {
    let query = parse_list_query(Some("page=0&perPage=0")).unwrap();
    assert_eq!(query.page, 1);
    assert_eq!(query.per_page, 1);

    let query = parse_list_query(Some("perPage=9999")).unwrap();
    assert_eq!(query.per_page, MAX_PER_PAGE);

    let query = parse_list_query(None).unwrap();
    assert_eq!((query.page, query.per_page), (1, DEFAULT_PER_PAGE));

    assert!(parse_list_query(Some("page=abc")).is_err());
  }

  #[test]
  fn test_parse_sort_and_filters() {
    let query =
      parse_list_query(Some("sort=-created_at,%2Btitle,score&title[~]=foo&score[>=]=3")).unwrap();

    assert_eq!(
      query.sort,
      vec![
        ("created_at".to_string(), Order::Descending),
        ("title".to_string(), Order::Ascending),
        ("score".to_string(), Order::Ascending),
      ]
    );
    assert_eq!(
      query.filters,
      vec![
        Filter {
          field: "title".to_string(),
          op: FilterOp::Like,
          value: "foo".to_string(),
        },
        Filter {
          field: "score".to_string(),
          op: FilterOp::GreaterThanEqual,
          value: "3".to_string(),
        },
      ]
    );
  }

  #[test]
  fn test_unknown_fields_are_rejected_not_substituted() {
    let collection = test_collection();

    let query = parse_list_query(Some("nope=1")).unwrap();
    let result = build_list_query(&collection, &query);
    assert!(
      matches!(result, Err(RecordError::BadRequest(msg)) if msg == "invalid filter/sort field")
    );

    let query = parse_list_query(Some("sort=-nope")).unwrap();
    let result = build_list_query(&collection, &query);
    assert!(
      matches!(result, Err(RecordError::BadRequest(msg)) if msg == "invalid filter/sort field")
    );

    // In particular: a malicious identifier never reaches the SQL string.
    let query = parse_list_query(Some("title%22%3B%20DROP%20TABLE%20posts%20--=x")).unwrap();
    assert!(build_list_query(&collection, &query).is_err());
  }

  #[test]
  fn test_built_sql_shape() {
    let collection = test_collection();
    let query = parse_list_query(Some("title[~]=10%25&page=3&perPage=20")).unwrap();

    let built = build_list_query(&collection, &query).unwrap();
    assert_eq!(
      built.data_sql,
      r#"SELECT * FROM "posts" WHERE "title" LIKE :filter_0 ESCAPE '\' ORDER BY "created_at" DESC, "id" DESC LIMIT :__limit OFFSET :__offset"#
    );
    assert_eq!(
      built.count_sql,
      r#"SELECT COUNT(*) FROM "posts" WHERE "title" LIKE :filter_0 ESCAPE '\'"#
    );

    // The LIKE value is wrapped and escaped; offset is (page-1)*perPage.
    assert!(built.params.iter().any(|(name, value)| {
      name == ":filter_0" && *value == SqlValue::Text("%10\\%%".to_string())
    }));
    assert!(built
      .params
      .iter()
      .any(|(name, value)| name == ":__offset" && *value == SqlValue::Integer(40)));
  }

  #[test]
  fn test_like_escaping() {
    assert_eq!(like_pattern("100%"), "%100\\%%");
    assert_eq!(like_pattern("a_b"), "%a\\_b%");
    assert_eq!(like_pattern("back\\slash"), "%back\\\\slash%");
  }

  #[test]
  fn test_filter_value_typing() {
    let collection = test_collection();

    assert_eq!(
      filter_value(&collection, "score", FilterOp::GreaterThan, "2.5").unwrap(),
      SqlValue::Real(2.5)
    );
    assert!(filter_value(&collection, "score", FilterOp::Equal, "abc").is_err());
    assert_eq!(
      filter_value(&collection, "title", FilterOp::Equal, "abc").unwrap(),
      SqlValue::Text("abc".to_string())
    );
  }
}
