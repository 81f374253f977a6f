use serde_json::Value;

use crate::{Error, Result};

const SYSTEM_PROMPT: &str = "\
Translate the user's question into a single read-only PostgreSQL SELECT statement. Return only \
the SQL, without commentary.";

/// Asks the provider for one SQL statement answering `text`. The result is not yet vetted.
pub async fn generate(
	cfg: &weave_config::LlmProviderConfig,
	text: &str,
	schema_hint: Option<&str>,
) -> Result<String> {
	let system = match schema_hint {
		Some(hint) => format!("{SYSTEM_PROMPT}\n\nSchema:\n{hint}"),
		None => SYSTEM_PROMPT.to_string(),
	};
	let messages = vec![
		serde_json::json!({ "role": "system", "content": system }),
		serde_json::json!({ "role": "user", "content": text }),
	];
	let json = crate::chat(cfg, &messages).await?;

	parse_generated_sql(&json)
}

fn parse_generated_sql(json: &Value) -> Result<String> {
	let content = crate::choice_content(json).ok_or_else(|| Error::InvalidResponse {
		message: "Query generator response is missing message content.".to_string(),
	})?;
	let sql = crate::strip_code_fence(content);

	if sql.is_empty() {
		return Err(Error::InvalidResponse {
			message: "Query generator returned an empty statement.".to_string(),
		});
	}

	Ok(sql.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_fenced_sql() {
		let json = serde_json::json!({
			"choices": [{ "message": { "content": "```sql\nSELECT id FROM documents\n```" } }]
		});

		assert_eq!(parse_generated_sql(&json).expect("parse failed"), "SELECT id FROM documents");
	}

	#[test]
	fn empty_content_is_rejected() {
		let json = serde_json::json!({ "choices": [{ "message": { "content": "  " } }] });

		assert!(matches!(parse_generated_sql(&json), Err(Error::InvalidResponse { .. })));
	}
}
