//! Compiles a query command into parameterized SQL.
//!
//! Identifiers are validated and quoted; every value travels as a bind
//! parameter, never as SQL text.

use crate::error::AppError;
use crate::query::{FilterOp, Operation, QueryCommand};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

fn ident_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("ident regex"))
}

/// Validate and quote an identifier. Rejects anything that is not a plain
/// snake-case name; quoting alone is not the safety boundary here.
fn quoted(name: &str) -> Result<String, AppError> {
    if !ident_pattern().is_match(name) {
        return Err(AppError::BadRequest(format!("invalid identifier: {}", name)));
    }
    Ok(format!("\"{}\"", name))
}

fn select_columns(select: Option<&str>) -> Result<String, AppError> {
    match select {
        None => Ok("*".to_string()),
        Some(s) if s.trim() == "*" => Ok("*".to_string()),
        Some(s) => {
            let mut cols = Vec::new();
            for part in s.split(',') {
                cols.push(quoted(part.trim())?);
            }
            if cols.is_empty() {
                return Err(AppError::BadRequest("empty select list".into()));
            }
            Ok(cols.join(", "))
        }
    }
}

/// WHERE clause from accumulated filters, conjunctive, in insertion order.
fn where_clause(command: &QueryCommand, q: &mut QueryBuf) -> Result<String, AppError> {
    if command.filters.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(command.filters.len());
    for f in &command.filters {
        let col = quoted(&f.column)?;
        let part = match f.operator {
            FilterOp::Eq => match f.value {
                Value::Null => format!("{} IS NULL", col),
                ref v => format!("{} = ${}", col, q.push_param(v.clone())),
            },
            FilterOp::Neq => format!("{} <> ${}", col, q.push_param(f.value.clone())),
            FilterOp::Gt => format!("{} > ${}", col, q.push_param(f.value.clone())),
            FilterOp::Lt => format!("{} < ${}", col, q.push_param(f.value.clone())),
            FilterOp::Gte => format!("{} >= ${}", col, q.push_param(f.value.clone())),
            FilterOp::Lte => format!("{} <= ${}", col, q.push_param(f.value.clone())),
            FilterOp::Like => format!("{} LIKE ${}", col, q.push_param(f.value.clone())),
            FilterOp::Ilike => format!("{} ILIKE ${}", col, q.push_param(f.value.clone())),
            FilterOp::In => {
                let values = match &f.value {
                    Value::Array(a) => a.clone(),
                    one => vec![one.clone()],
                };
                if values.is_empty() {
                    "1 = 0".to_string()
                } else {
                    let placeholders: Vec<String> = values
                        .into_iter()
                        .map(|v| format!("${}", q.push_param(v)))
                        .collect();
                    format!("{} IN ({})", col, placeholders.join(", "))
                }
            }
            FilterOp::Is => match f.value {
                Value::Null => format!("{} IS NULL", col),
                Value::Bool(true) => format!("{} IS TRUE", col),
                Value::Bool(false) => format!("{} IS FALSE", col),
                ref other => {
                    return Err(AppError::BadRequest(format!(
                        "'is' accepts null or boolean, got {}",
                        other
                    )))
                }
            },
            FilterOp::Not => match f.value {
                Value::Null => format!("{} IS NOT NULL", col),
                ref v => format!("{} <> ${}", col, q.push_param(v.clone())),
            },
        };
        parts.push(part);
    }
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

fn order_clause(command: &QueryCommand) -> Result<String, AppError> {
    match &command.order_by {
        None => Ok(String::new()),
        Some(o) => {
            let dir = if o.ascending { "ASC" } else { "DESC" };
            Ok(format!(" ORDER BY {} {}", quoted(&o.column)?, dir))
        }
    }
}

fn paging_clause(command: &QueryCommand) -> String {
    if let Some(range) = command.range {
        // widen before the +1 so a full-span range cannot overflow
        let count = (u64::from(range.to).saturating_sub(u64::from(range.from)) + 1).min(1000);
        return format!(" LIMIT {} OFFSET {}", count, range.from);
    }
    let mut limit = command.limit;
    if command.single || command.maybe_single {
        // At most two rows so a multiple-match can still be detected.
        limit = Some(limit.unwrap_or(2).min(2));
    }
    match limit {
        Some(n) => format!(" LIMIT {}", n.min(1000)),
        None => String::new(),
    }
}

/// Column names shared by every row of an insert payload, in first-row order.
fn insert_columns(rows: &[&serde_json::Map<String, Value>]) -> Result<Vec<String>, AppError> {
    let first = rows
        .first()
        .ok_or_else(|| AppError::BadRequest("insert payload is empty".into()))?;
    let columns: Vec<String> = first.keys().cloned().collect();
    for row in rows {
        if row.len() != columns.len() || !columns.iter().all(|c| row.contains_key(c)) {
            return Err(AppError::BadRequest(
                "all insert rows must share the same columns".into(),
            ));
        }
    }
    Ok(columns)
}

fn payload_rows(data: &Value) -> Result<Vec<&serde_json::Map<String, Value>>, AppError> {
    match data {
        Value::Object(m) => Ok(vec![m]),
        Value::Array(a) => a
            .iter()
            .map(|v| {
                v.as_object()
                    .ok_or_else(|| AppError::BadRequest("insert rows must be JSON objects".into()))
            })
            .collect(),
        _ => Err(AppError::BadRequest("data payload must be an object or array".into())),
    }
}

fn compile_insert(command: &QueryCommand, upsert: bool) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let table = quoted(&command.table)?;
    let data = command
        .data
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("insert requires a data payload".into()))?;
    let rows = payload_rows(data)?;
    let columns = insert_columns(&rows)?;
    let mut quoted_cols = Vec::with_capacity(columns.len());
    for c in &columns {
        quoted_cols.push(quoted(c)?);
    }
    let mut tuples = Vec::with_capacity(rows.len());
    for row in &rows {
        let placeholders: Vec<String> = columns
            .iter()
            .map(|c| format!("${}", q.push_param(row.get(c).cloned().unwrap_or(Value::Null))))
            .collect();
        tuples.push(format!("({})", placeholders.join(", ")));
    }
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        quoted_cols.join(", "),
        tuples.join(", ")
    );
    if upsert {
        let conflict = command
            .options
            .on_conflict
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("upsert requires on_conflict columns".into()))?;
        let mut conflict_cols = Vec::new();
        for c in conflict.split(',') {
            conflict_cols.push(quoted(c.trim())?);
        }
        let updates: Vec<String> = quoted_cols
            .iter()
            .filter(|c| !conflict_cols.contains(c))
            .map(|c| format!("{} = EXCLUDED.{}", c, c))
            .collect();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", conflict_cols.join(", ")));
        } else {
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                conflict_cols.join(", "),
                updates.join(", ")
            ));
        }
    }
    sql.push_str(" RETURNING *");
    q.sql = sql;
    Ok(q)
}

fn compile_update(command: &QueryCommand) -> Result<QueryBuf, AppError> {
    if command.filters.is_empty() {
        return Err(AppError::BadRequest("update requires at least one filter".into()));
    }
    let mut q = QueryBuf::new();
    let table = quoted(&command.table)?;
    let data = command
        .data
        .as_ref()
        .and_then(Value::as_object)
        .ok_or_else(|| AppError::BadRequest("update requires an object data payload".into()))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("update payload is empty".into()));
    }
    let mut sets = Vec::with_capacity(data.len());
    for (k, v) in data {
        let col = quoted(k)?;
        sets.push(format!("{} = ${}", col, q.push_param(v.clone())));
    }
    let where_sql = where_clause(command, &mut q)?;
    q.sql = format!(
        "UPDATE {} SET {}{} RETURNING *",
        table,
        sets.join(", "),
        where_sql
    );
    Ok(q)
}

fn compile_delete(command: &QueryCommand) -> Result<QueryBuf, AppError> {
    if command.filters.is_empty() {
        return Err(AppError::BadRequest("delete requires at least one filter".into()));
    }
    let mut q = QueryBuf::new();
    let table = quoted(&command.table)?;
    let where_sql = where_clause(command, &mut q)?;
    q.sql = format!("DELETE FROM {}{} RETURNING *", table, where_sql);
    Ok(q)
}

fn compile_select(command: &QueryCommand) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let table = quoted(&command.table)?;
    let cols = select_columns(command.select.as_deref())?;
    let where_sql = where_clause(command, &mut q)?;
    let order_sql = order_clause(command)?;
    let paging_sql = paging_clause(command);
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        cols, table, where_sql, order_sql, paging_sql
    );
    Ok(q)
}

/// Compile one command into SQL text plus its bind parameters.
pub fn compile(command: &QueryCommand) -> Result<QueryBuf, AppError> {
    match command.operation {
        Operation::Select => compile_select(command),
        Operation::Insert => compile_insert(command, false),
        Operation::Upsert => compile_insert(command, true),
        Operation::Update => compile_update(command),
        Operation::Delete => compile_delete(command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;
    use serde_json::json;

    #[test]
    fn select_applies_filters_conjunctively_in_order() {
        let cmd = QueryBuilder::new("custom_sections")
            .select("id, slug")
            .eq("visible", true)
            .gt("position", 2)
            .ilike("title", "%team%")
            .order("position", true)
            .limit(10)
            .build()
            .unwrap();
        let q = compile(&cmd).unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"id\", \"slug\" FROM \"custom_sections\" WHERE \"visible\" = $1 AND \"position\" > $2 AND \"title\" ILIKE $3 ORDER BY \"position\" ASC LIMIT 10"
        );
        assert_eq!(q.params, vec![json!(true), json!(2), json!("%team%")]);
    }

    #[test]
    fn values_never_appear_in_sql_text() {
        let cmd = QueryBuilder::new("users")
            .select("*")
            .eq("email", "robert'); DROP TABLE users;--")
            .build()
            .unwrap();
        let q = compile(&cmd).unwrap();
        assert!(!q.sql.contains("DROP TABLE"));
        assert_eq!(q.params.len(), 1);
    }

    #[test]
    fn hostile_identifier_is_rejected() {
        let cmd = QueryBuilder::new("users; DROP TABLE users")
            .select("*")
            .build()
            .unwrap();
        assert!(matches!(compile(&cmd), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn in_filter_expands_to_placeholders() {
        let cmd = QueryBuilder::new("page_elements")
            .select("*")
            .in_("kind", vec![json!("hero"), json!("gallery")])
            .build()
            .unwrap();
        let q = compile(&cmd).unwrap();
        assert!(q.sql.contains("\"kind\" IN ($1, $2)"));
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let cmd = QueryBuilder::new("t").select("*").in_("id", vec![]).build().unwrap();
        let q = compile(&cmd).unwrap();
        assert!(q.sql.contains("1 = 0"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn null_handling_for_eq_is_and_not() {
        let cmd = QueryBuilder::new("t")
            .select("*")
            .eq("a", Value::Null)
            .is("b", Value::Null)
            .not("c", Value::Null)
            .build()
            .unwrap();
        let q = compile(&cmd).unwrap();
        assert!(q.sql.contains("\"a\" IS NULL"));
        assert!(q.sql.contains("\"b\" IS NULL"));
        assert!(q.sql.contains("\"c\" IS NOT NULL"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn insert_binds_every_value() {
        let cmd = QueryBuilder::new("contact_messages")
            .insert(json!({"name": "Ada", "email": "ada@example.com", "message": "hi"}))
            .build()
            .unwrap();
        let q = compile(&cmd).unwrap();
        assert!(q.sql.starts_with("INSERT INTO \"contact_messages\""));
        assert!(q.sql.ends_with("RETURNING *"));
        assert_eq!(q.params.len(), 3);
    }

    #[test]
    fn multi_row_insert_requires_uniform_columns() {
        let cmd = QueryBuilder::new("t")
            .insert(json!([{"a": 1, "b": 2}, {"a": 3}]))
            .build()
            .unwrap();
        assert!(matches!(compile(&cmd), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn upsert_compiles_on_conflict_update() {
        let cmd = QueryBuilder::new("seo_settings")
            .upsert(json!({"id": 1, "title": "Portfolio"}), "id")
            .build()
            .unwrap();
        let q = compile(&cmd).unwrap();
        assert!(q.sql.contains("ON CONFLICT (\"id\") DO UPDATE SET \"title\" = EXCLUDED.\"title\""));
    }

    #[test]
    fn unfiltered_update_and_delete_are_rejected() {
        let update = QueryBuilder::new("users").update(json!({"role": "admin"})).build().unwrap();
        assert!(matches!(compile(&update), Err(AppError::BadRequest(_))));
        let delete = QueryBuilder::new("users").delete().build().unwrap();
        assert!(matches!(compile(&delete), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn range_compiles_to_limit_offset() {
        let cmd = QueryBuilder::new("t").select("*").range(20, 29).build().unwrap();
        let q = compile(&cmd).unwrap();
        assert!(q.sql.ends_with(" LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn full_span_range_clamps_instead_of_overflowing() {
        let cmd = QueryBuilder::new("t").select("*").range(0, u32::MAX).build().unwrap();
        let q = compile(&cmd).unwrap();
        assert!(q.sql.ends_with(" LIMIT 1000 OFFSET 0"));
    }

    #[test]
    fn single_caps_limit_at_two() {
        let cmd = QueryBuilder::new("t").select("*").single().build().unwrap();
        let q = compile(&cmd).unwrap();
        assert!(q.sql.ends_with(" LIMIT 2"));
    }
}
