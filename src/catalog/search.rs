//! Catalog queries.
//!
//! A [`SearchQuery`] compiles to a `WHERE` clause over `assets a` plus
//! positional parameters. Reserved filter keys map to indexed columns; any
//! other key is matched against `asset_metadata` through an `EXISTS`
//! sub-query.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::timestamp;
use crate::domain::{AssetMetadata, ValueKind};
use crate::error::{ArchiveError, Result};

/// Page size used when a caller wants "everything"
pub const MAX_PAGE: usize = 1_000_000;

/// Filter map: reserved column keys or custom metadata field names
pub type Filters = BTreeMap<String, Value>;

/// Columns that can be sorted on directly
pub const SORT_COLUMNS: &[&str] = &[
    "file_name",
    "file_size",
    "created_at",
    "updated_at",
    "mime_type",
    "asset_id",
    "archive_path",
    "checksum_verified_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql().to_lowercase())
    }
}

impl FromStr for SortOrder {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            _ => Err(ArchiveError::InvalidArgument(format!("Unknown sort order: {}", s))),
        }
    }
}

/// Parameters of a catalog search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Free text matched against file name, original path and metadata
    pub text: Option<String>,
    pub filters: Filters,
    pub sort_by: String,
    pub sort_order: SortOrder,
    pub limit: usize,
    /// Negative offsets are treated as zero
    pub offset: i64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: None,
            filters: Filters::new(),
            sort_by: "created_at".to_string(),
            sort_order: SortOrder::Desc,
            limit: 100,
            offset: 0,
        }
    }
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every asset in archive-path order
    pub fn everything() -> Self {
        Self::new().sort("archive_path", SortOrder::Asc).page(MAX_PAGE, 0)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn sort(mut self, by: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = by.into();
        self.sort_order = order;
        self
    }

    pub fn page(mut self, limit: usize, offset: i64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// One cataloged asset with its metadata restored to original types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub asset: AssetMetadata,
    pub file_name: String,
    pub indexed_at: DateTime<Utc>,
}

impl SearchResult {
    pub fn asset_id(&self) -> &str {
        &self.asset.asset_id
    }

    pub fn archive_path(&self) -> &str {
        &self.asset.archive_path
    }
}

/// A page of results plus the full match count
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub total: usize,
}

/// FTS5 expression for free text: each token quoted, prefix-matched, AND-ed.
///
/// `None` when the text has no tokens.
pub(crate) fn fts_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|token| format!("\"{}\"*", token.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

/// Compile text and filters into a `WHERE` clause (empty when unconstrained)
pub(crate) fn compile_where(query: &SearchQuery) -> Result<(String, Vec<SqlValue>)> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    if let Some(expr) = query.text.as_deref().and_then(fts_expression) {
        clauses.push(
            "a.asset_id IN (SELECT asset_id FROM assets_fts WHERE assets_fts MATCH ?)".to_string(),
        );
        params.push(SqlValue::Text(expr));
    }

    for (key, value) in &query.filters {
        let clause = match key.as_str() {
            "asset_id" | "mime_type" | "profile_id" => column_predicate(key, value, &mut params)?,
            "checksum_sha256" | "digest" => column_predicate("checksum_sha256", value, &mut params)?,
            "file_size_min" => size_predicate(">=", key, value, &mut params)?,
            "file_size_max" => size_predicate("<=", key, value, &mut params)?,
            "created_after" => {
                let (at, _) = parse_bound(key, value)?;
                params.push(SqlValue::Text(timestamp(&at)));
                "a.created_at >= ?".to_string()
            }
            "created_before" => {
                let (at, date_only) = parse_bound(key, value)?;
                if date_only {
                    params.push(SqlValue::Text(timestamp(&(at + Duration::days(1)))));
                    "a.created_at < ?".to_string()
                } else {
                    params.push(SqlValue::Text(timestamp(&at)));
                    "a.created_at <= ?".to_string()
                }
            }
            _ => metadata_predicate(key, value, &mut params)?,
        };
        clauses.push(clause);
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    Ok((sql, params))
}

/// `ORDER BY` clause with an `asset_id` tie-break so paging is stable
pub(crate) fn order_clause(query: &SearchQuery) -> (String, Option<SqlValue>) {
    let dir = query.sort_order.sql();
    if SORT_COLUMNS.contains(&query.sort_by.as_str()) {
        let clause = if query.sort_by == "asset_id" {
            format!("ORDER BY a.asset_id {}", dir)
        } else {
            format!("ORDER BY a.{} {}, a.asset_id ASC", query.sort_by, dir)
        };
        (clause, None)
    } else {
        let clause = format!(
            "ORDER BY (SELECT CASE WHEN am.field_kind = 'number' THEN CAST(am.field_value AS REAL) \
             ELSE am.field_value END FROM asset_metadata am \
             WHERE am.asset_id = a.asset_id AND am.field_name = ?) {}, a.asset_id ASC",
            dir
        );
        (clause, Some(SqlValue::Text(query.sort_by.clone())))
    }
}

fn column_predicate(column: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
    match value {
        Value::Null => Ok(format!("a.{} IS NULL", column)),
        Value::String(s) => {
            params.push(SqlValue::Text(s.clone()));
            Ok(format!("a.{} = ?", column))
        }
        Value::Array(items) => {
            if items.is_empty() {
                return Ok("0".to_string());
            }
            for item in items {
                let text = item.as_str().ok_or_else(|| {
                    ArchiveError::InvalidArgument(format!("Filter '{}' expects text values", column))
                })?;
                params.push(SqlValue::Text(text.to_string()));
            }
            let marks = vec!["?"; items.len()].join(", ");
            Ok(format!("a.{} IN ({})", column, marks))
        }
        other => Err(ArchiveError::InvalidArgument(format!(
            "Filter '{}' expects text, got {}",
            column, other
        ))),
    }
}

fn size_predicate(op: &str, key: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
    let size = value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| ArchiveError::InvalidArgument(format!("Filter '{}' expects an integer", key)))?;
    params.push(SqlValue::Integer(size));
    Ok(format!("a.file_size {} ?", op))
}

/// Parse an RFC 3339 timestamp or a `YYYY-MM-DD` date; the flag marks date-only input
fn parse_bound(key: &str, value: &Value) -> Result<(DateTime<Utc>, bool)> {
    let text = value
        .as_str()
        .ok_or_else(|| ArchiveError::InvalidArgument(format!("Filter '{}' expects a date", key)))?;

    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok((at.with_timezone(&Utc), false));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| (dt.and_utc(), true))
        .ok_or_else(|| ArchiveError::InvalidArgument(format!("Filter '{}': invalid date '{}'", key, text)))
}

const FIELD_EXISTS: &str =
    "SELECT 1 FROM asset_metadata am WHERE am.asset_id = a.asset_id AND am.field_name = ?";

fn metadata_predicate(field: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
    match value {
        Value::Null => {
            params.push(SqlValue::Text(field.to_string()));
            Ok(format!("NOT EXISTS ({})", FIELD_EXISTS))
        }
        Value::Object(_) => {
            params.push(SqlValue::Text(field.to_string()));
            params.push(SqlValue::Text(value.to_string()));
            Ok(format!(
                "EXISTS ({} AND am.field_kind = 'object' AND am.field_value = ?)",
                FIELD_EXISTS
            ))
        }
        // Every element must be present
        Value::Array(items) if items.is_empty() => {
            params.push(SqlValue::Text(field.to_string()));
            Ok(format!("EXISTS ({})", FIELD_EXISTS))
        }
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| element_predicate(field, item, params))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", parts.join(" AND ")))
        }
        scalar => element_predicate(field, scalar, params),
    }
}

/// Scalar match: containment for list fields, kind-aware equality otherwise.
///
/// Numbers compare numerically (`3` matches `3.0`), and a value only matches
/// a field stored with the same kind (`"3"` never matches the number 3).
fn element_predicate(field: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
    let (element_check, element_param, kind, scalar_check, scalar_param) = match value {
        Value::String(s) => (
            "je.type = 'text' AND je.value = ?",
            Some(SqlValue::Text(s.clone())),
            ValueKind::Text,
            "am.field_value = ?",
            SqlValue::Text(s.clone()),
        ),
        Value::Bool(b) => (
            if *b { "je.type = 'true'" } else { "je.type = 'false'" },
            None,
            ValueKind::Boolean,
            "am.field_value = ?",
            SqlValue::Text(if *b { "1" } else { "0" }.to_string()),
        ),
        Value::Number(n) => {
            let native = match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            };
            (
                "je.type IN ('integer', 'real') AND je.value = ?",
                Some(native),
                ValueKind::Number,
                "CAST(am.field_value AS REAL) = ?",
                SqlValue::Real(n.as_f64().unwrap_or_default()),
            )
        }
        other => {
            return Err(ArchiveError::InvalidArgument(format!(
                "Unsupported value for filter '{}': {}",
                field, other
            )))
        }
    };

    params.push(SqlValue::Text(field.to_string()));
    if let Some(p) = element_param {
        params.push(p);
    }
    params.push(scalar_param);

    Ok(format!(
        "EXISTS ({} AND ((am.field_kind = 'list' AND EXISTS \
         (SELECT 1 FROM json_each(am.field_value) je WHERE {})) \
         OR (am.field_kind = '{}' AND {})))",
        FIELD_EXISTS,
        element_check,
        kind.as_str(),
        scalar_check
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fts_expression() {
        assert_eq!(fts_expression("  "), None);
        assert_eq!(
            fts_expression("sun set"),
            Some("\"sun\"* AND \"set\"*".to_string())
        );
        assert_eq!(fts_expression("a\"b"), Some("\"a\"\"b\"*".to_string()));
    }

    #[test]
    fn test_empty_query_has_no_where() {
        let (sql, params) = compile_where(&SearchQuery::new().with_text("   ")).unwrap();
        assert!(sql.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_reserved_filters() {
        let query = SearchQuery::new()
            .with_filter("asset_id", json!(["a", "b"]))
            .with_filter("digest", "abc")
            .with_filter("profile_id", Value::Null)
            .with_filter("file_size_min", 10);
        let (sql, params) = compile_where(&query).unwrap();

        assert!(sql.contains("a.asset_id IN (?, ?)"));
        assert!(sql.contains("a.checksum_sha256 = ?"));
        assert!(sql.contains("a.profile_id IS NULL"));
        assert!(sql.contains("a.file_size >= ?"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_invalid_filters_rejected() {
        let bad_size = SearchQuery::new().with_filter("file_size_max", "lots");
        assert!(matches!(compile_where(&bad_size), Err(ArchiveError::InvalidArgument(_))));

        let bad_date = SearchQuery::new().with_filter("created_after", "yesterday");
        assert!(compile_where(&bad_date).is_err());

        let bad_mime = SearchQuery::new().with_filter("mime_type", 3);
        assert!(compile_where(&bad_mime).is_err());
    }

    #[test]
    fn test_list_filter_requires_every_element() {
        let query = SearchQuery::new().with_filter("tags", json!(["a", "b"]));
        let (sql, params) = compile_where(&query).unwrap();
        assert_eq!(sql.matches("json_each").count(), 2);
        assert_eq!(params.len(), 6);
    }

    #[test]
    fn test_order_clause() {
        let (clause, param) = order_clause(&SearchQuery::new().sort("file_size", SortOrder::Asc));
        assert_eq!(clause, "ORDER BY a.file_size ASC, a.asset_id ASC");
        assert!(param.is_none());

        let (clause, param) = order_clause(&SearchQuery::new().sort("rating", SortOrder::Desc));
        assert!(clause.contains("am.field_name = ?) DESC, a.asset_id ASC"));
        assert_eq!(param, Some(SqlValue::Text("rating".to_string())));

        // Column names never reach SQL unless whitelisted
        let (_, param) = order_clause(&SearchQuery::new().sort("x; DROP TABLE assets", SortOrder::Asc));
        assert!(param.is_some());
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
