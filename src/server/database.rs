//! The generic `/database` endpoint: one POST surface that interprets
//! query commands against PostgreSQL.
//!
//! Reads are public; writes require a signed-in staff user.

use crate::error::AppError;
use crate::query::{Operation, QueryCommand};
use crate::server::auth::MaybeUser;
use crate::server::bind::{row_to_json, BindValue};
use crate::server::interpreter;
use crate::server::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::{json, Value};

/// POST /database
pub async fn execute(
    MaybeUser(user): MaybeUser,
    State(state): State<AppState>,
    Json(command): Json<QueryCommand>,
) -> Result<impl IntoResponse, AppError> {
    if command.operation != Operation::Select && user.is_none() {
        return Err(AppError::Unauthorized("writes require authentication".into()));
    }
    let data = run(&state, &command).await?;
    Ok(Json(json!({ "data": data })))
}

/// Compile, bind and run one command, shaping the result per the command's
/// single/maybe-single flags.
pub async fn run(state: &AppState, command: &QueryCommand) -> Result<Value, AppError> {
    let compiled = interpreter::compile(command)?;
    tracing::debug!(sql = %compiled.sql, params = compiled.params.len(), "database command");
    let mut query = sqlx::query(&compiled.sql);
    for param in &compiled.params {
        query = query.bind(BindValue::from(param));
    }
    let rows = query.fetch_all(&state.pool).await.map_err(|e| {
        AppError::from_db(e, "a row with this unique value already exists")
    })?;
    let data: Vec<Value> = rows.iter().map(row_to_json).collect();
    shape_rows(data, command)
}

/// Shape a fetched row set: plain queries return the array, `single` demands
/// exactly one row, `maybe_single` allows zero (as `Null`). More than one
/// match under either flag is an error.
fn shape_rows(mut data: Vec<Value>, command: &QueryCommand) -> Result<Value, AppError> {
    if command.single || command.maybe_single {
        return match data.len() {
            0 if command.maybe_single => Ok(Value::Null),
            0 => Err(AppError::NotFound(format!("no rows in '{}'", command.table))),
            1 => Ok(data.remove(0)),
            _ => Err(AppError::BadRequest(
                "query matched more than one row where a single row was requested".into(),
            )),
        };
    }
    Ok(Value::Array(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;
    use serde_json::json;

    fn command(single: bool, maybe: bool) -> QueryCommand {
        let mut b = QueryBuilder::new("custom_sections").select("*");
        if single {
            b = b.single();
        }
        if maybe {
            b = b.maybe_single();
        }
        b.build().unwrap()
    }

    #[test]
    fn plain_query_returns_the_array() {
        let cmd = command(false, false);
        let shaped = shape_rows(vec![json!({"id": 1}), json!({"id": 2})], &cmd).unwrap();
        assert_eq!(shaped, json!([{"id": 1}, {"id": 2}]));
        assert_eq!(shape_rows(vec![], &cmd).unwrap(), json!([]));
    }

    #[test]
    fn single_with_one_row_unwraps_it() {
        let cmd = command(true, false);
        let shaped = shape_rows(vec![json!({"id": 7})], &cmd).unwrap();
        assert_eq!(shaped, json!({"id": 7}));
    }

    #[test]
    fn single_with_zero_rows_is_not_found() {
        let cmd = command(true, false);
        assert!(matches!(
            shape_rows(vec![], &cmd),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn maybe_single_with_zero_rows_is_null() {
        let cmd = command(false, true);
        assert_eq!(shape_rows(vec![], &cmd).unwrap(), Value::Null);
    }

    #[test]
    fn multiple_matches_under_either_flag_error() {
        let rows = vec![json!({"id": 1}), json!({"id": 2})];
        assert!(matches!(
            shape_rows(rows.clone(), &command(true, false)),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            shape_rows(rows, &command(false, true)),
            Err(AppError::BadRequest(_))
        ));
    }
}
