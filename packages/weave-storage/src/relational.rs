use std::time::Instant;

use futures::TryStreamExt;
use serde_json::Value;
use sqlx::{
	Column, PgPool, Row, TypeInfo,
	postgres::{PgArguments, PgRow},
	query::Query,
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use weave_domain::{
	TabularResult,
	loader::{QueryParam, RelationalQuery},
};

use crate::Result;

/// Runs a vetted read-only query and decodes rows into JSON cells.
///
/// Rows are streamed and the fetch stops once `max_rows` rows have been read.
pub async fn execute(
	pool: &PgPool,
	query: &RelationalQuery,
	max_rows: usize,
) -> Result<TabularResult> {
	let started = Instant::now();
	let mut rows = bind_params(sqlx::query(query.sql.as_str()), &query.params).fetch(pool);
	let mut columns = Vec::new();
	let mut cells = Vec::new();

	while cells.len() < max_rows {
		let Some(row) = rows.try_next().await? else {
			break;
		};

		if columns.is_empty() {
			columns = row.columns().iter().map(|column| column.name().to_string()).collect();
		}

		cells.push(decode_row(&row));
	}

	let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

	Ok(TabularResult::new(columns, cells, elapsed_ms))
}

fn bind_params<'q>(
	mut query: Query<'q, sqlx::Postgres, PgArguments>,
	params: &'q [QueryParam],
) -> Query<'q, sqlx::Postgres, PgArguments> {
	for param in params {
		query = match param {
			QueryParam::Text(value) => query.bind(value.as_str()),
			QueryParam::Int(value) => query.bind(*value),
		};
	}

	query
}

fn decode_row(row: &PgRow) -> Vec<Value> {
	row.columns()
		.iter()
		.map(|column| decode_cell(row, column.ordinal(), column.type_info().name()))
		.collect()
}

fn decode_cell(row: &PgRow, idx: usize, type_name: &str) -> Value {
	let decoded = match type_name {
		"INT2" => row.try_get::<Option<i16>, _>(idx).map(|v| v.map(Value::from)),
		"INT4" => row.try_get::<Option<i32>, _>(idx).map(|v| v.map(Value::from)),
		"INT8" => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::from)),
		"FLOAT4" => row.try_get::<Option<f32>, _>(idx).map(|v| v.map(|f| Value::from(f as f64))),
		"FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(|v| v.map(Value::from)),
		"BOOL" => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::from)),
		"JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx),
		"UUID" =>
			row.try_get::<Option<uuid::Uuid>, _>(idx).map(|v| v.map(|id| id.to_string().into())),
		"TIMESTAMPTZ" => row
			.try_get::<Option<OffsetDateTime>, _>(idx)
			.map(|v| v.and_then(|ts| ts.format(&Rfc3339).ok()).map(Value::from)),
		"DATE" =>
			row.try_get::<Option<time::Date>, _>(idx).map(|v| v.map(|d| d.to_string().into())),
		_ => row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::from)),
	};

	match decoded {
		Ok(value) => value.unwrap_or(Value::Null),
		Err(err) => {
			tracing::debug!(error = %err, column = idx, type_name, "Unsupported column type.");

			Value::Null
		},
	}
}
