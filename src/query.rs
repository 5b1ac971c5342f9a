//! Fluent query builder producing an explicit, executable command.
//!
//! The builder accumulates filter/sort/pagination state and `build()` freezes
//! it into a [`QueryCommand`]. Execution is a separate, explicit step on the
//! adapter — the builder itself never fires a network call.

use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Upsert,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    Ilike,
    In,
    Is,
    Not,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOp,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub from: u32,
    pub to: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_conflict: Option<String>,
}

/// Frozen query state, serialized as the wire JSON consumed by the
/// self-hosted `/database` endpoint. The hosted and alternative adapters
/// translate the same command into their native REST calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCommand {
    pub table: String,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub single: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub maybe_single: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "is_default_options")]
    pub options: CommandOptions,
}

fn is_default_options(o: &CommandOptions) -> bool {
    o.on_conflict.is_none()
}

/// Result of executing a command: the row set (array), a single row
/// (object), or `Null` for `maybe_single()` with no match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub data: Value,
}

impl QueryResult {
    /// Rows as a slice; a single-row result is treated as one row.
    pub fn rows(&self) -> Vec<&Value> {
        match &self.data {
            Value::Array(a) => a.iter().collect(),
            Value::Null => Vec::new(),
            one => vec![one],
        }
    }

    /// The single row, if any.
    pub fn row(&self) -> Option<&Value> {
        match &self.data {
            Value::Null => None,
            Value::Array(a) => a.first(),
            one => Some(one),
        }
    }
}

/// Chainable builder. Filter clauses apply conjunctively, in the order
/// added. Exactly one data-carrying operation may be set; a second one is
/// reported by `build()`.
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    table: String,
    operation: Option<Operation>,
    select: Option<String>,
    filters: Vec<Filter>,
    order_by: Option<OrderBy>,
    limit: Option<u32>,
    range: Option<Range>,
    single: bool,
    maybe_single: bool,
    data: Option<Value>,
    options: CommandOptions,
    error: Option<String>,
}

impl QueryBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        QueryBuilder {
            table: table.into(),
            operation: None,
            select: None,
            filters: Vec::new(),
            order_by: None,
            limit: None,
            range: None,
            single: false,
            maybe_single: false,
            data: None,
            options: CommandOptions::default(),
            error: None,
        }
    }

    fn set_operation(mut self, op: Operation, data: Option<Value>) -> Self {
        if let Some(existing) = self.operation {
            self.error = Some(format!(
                "operation already set to {:?}; cannot also set {:?}",
                existing, op
            ));
            return self;
        }
        self.operation = Some(op);
        self.data = data;
        self
    }

    /// Columns to return, e.g. `"*"` or `"id, slug, title"`.
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        if self.operation.is_none() {
            self.operation = Some(Operation::Select);
        }
        self
    }

    pub fn insert(self, values: Value) -> Self {
        self.set_operation(Operation::Insert, Some(values))
    }

    pub fn update(self, values: Value) -> Self {
        self.set_operation(Operation::Update, Some(values))
    }

    pub fn upsert(self, values: Value, on_conflict: impl Into<String>) -> Self {
        let mut b = self.set_operation(Operation::Upsert, Some(values));
        b.options.on_conflict = Some(on_conflict.into());
        b
    }

    pub fn delete(self) -> Self {
        self.set_operation(Operation::Delete, None)
    }

    fn filter(mut self, column: impl Into<String>, operator: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            operator,
            value,
        });
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq, value.into())
    }

    pub fn neq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq, value.into())
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gt, value.into())
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt, value.into())
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte, value.into())
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte, value.into())
    }

    pub fn like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filter(column, FilterOp::Like, Value::String(pattern.into()))
    }

    pub fn ilike(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filter(column, FilterOp::Ilike, Value::String(pattern.into()))
    }

    pub fn in_(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(column, FilterOp::In, Value::Array(values))
    }

    /// `IS` comparison (null / true / false).
    pub fn is(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Is, value.into())
    }

    /// Negated comparison: `IS NOT` for null, `<>` otherwise.
    pub fn not(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Not, value.into())
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn range(mut self, from: u32, to: u32) -> Self {
        self.range = Some(Range { from, to });
        self
    }

    /// Expect exactly one row; zero rows is an error at execution.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Expect at most one row; zero rows yields `Null` without error.
    pub fn maybe_single(mut self) -> Self {
        self.maybe_single = true;
        self
    }

    /// Freeze the accumulated state. Fails if the table name is empty or if
    /// two data-carrying operations were set on the same builder.
    pub fn build(self) -> Result<QueryCommand, BackendError> {
        if let Some(msg) = self.error {
            return Err(BackendError::InvalidQuery(msg));
        }
        if self.table.is_empty() {
            return Err(BackendError::InvalidQuery("table name is empty".into()));
        }
        let operation = self.operation.unwrap_or(Operation::Select);
        Ok(QueryCommand {
            table: self.table,
            operation,
            select: self.select,
            filters: self.filters,
            order_by: self.order_by,
            limit: self.limit,
            range: self.range,
            single: self.single,
            maybe_single: self.maybe_single,
            data: self.data,
            options: self.options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_accumulate_in_order() {
        let cmd = QueryBuilder::new("custom_sections")
            .select("*")
            .eq("visible", true)
            .gt("position", 3)
            .ilike("title", "%team%")
            .build()
            .unwrap();
        assert_eq!(cmd.operation, Operation::Select);
        let ops: Vec<FilterOp> = cmd.filters.iter().map(|f| f.operator).collect();
        assert_eq!(ops, vec![FilterOp::Eq, FilterOp::Gt, FilterOp::Ilike]);
        assert_eq!(cmd.filters[0].column, "visible");
        assert_eq!(cmd.filters[2].value, json!("%team%"));
    }

    #[test]
    fn second_payload_is_a_builder_error() {
        let err = QueryBuilder::new("users")
            .insert(json!({"email": "a@b.c"}))
            .update(json!({"email": "x@y.z"}))
            .build()
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidQuery(_)));
    }

    #[test]
    fn wire_json_uses_camel_case_and_where() {
        let cmd = QueryBuilder::new("page_elements")
            .select("id, kind")
            .eq("page_id", "home")
            .order("created_at", false)
            .range(0, 49)
            .maybe_single()
            .build()
            .unwrap();
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["table"], "page_elements");
        assert_eq!(v["operation"], "select");
        assert_eq!(v["where"][0]["operator"], "eq");
        assert_eq!(v["orderBy"]["ascending"], false);
        assert_eq!(v["range"]["to"], 49);
        assert_eq!(v["maybeSingle"], true);
        assert!(v.get("single").is_none());
        // and back
        let round: QueryCommand = serde_json::from_value(v).unwrap();
        assert_eq!(round, cmd);
    }

    #[test]
    fn upsert_carries_on_conflict_option() {
        let cmd = QueryBuilder::new("seo_settings")
            .upsert(json!({"id": 1, "title": "t"}), "id")
            .build()
            .unwrap();
        assert_eq!(cmd.operation, Operation::Upsert);
        assert_eq!(cmd.options.on_conflict.as_deref(), Some("id"));
    }

    #[test]
    fn result_row_helpers() {
        let many = QueryResult { data: json!([{"id": 1}, {"id": 2}]) };
        assert_eq!(many.rows().len(), 2);
        let none = QueryResult { data: Value::Null };
        assert!(none.row().is_none());
        let one = QueryResult { data: json!({"id": 7}) };
        assert_eq!(one.row().unwrap()["id"], 7);
    }
}
