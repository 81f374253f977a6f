use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardViolation {
	Empty,
	NotReadOnly,
	ForbiddenToken(String),
	MultipleStatements,
}
impl GuardViolation {
	pub fn message(&self) -> String {
		match self {
			Self::Empty => "Generated query is empty.".to_string(),
			Self::NotReadOnly => "Generated query must start with SELECT or WITH.".to_string(),
			Self::ForbiddenToken(token) => {
				format!("Generated query contains forbidden token {token}.")
			},
			Self::MultipleStatements => {
				"Generated query contains more than one statement.".to_string()
			},
		}
	}
}

const FORBIDDEN_KEYWORDS: [&str; 12] = [
	"DROP", "DELETE", "UPDATE", "INSERT", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE", "EXEC",
	"EXECUTE", "MERGE",
];
const FORBIDDEN_FRAGMENTS: [&str; 3] = ["--", "/*", "*/"];

/// Returns the statement with at most one trailing semicolon removed, or why it was refused.
pub fn check_read_only(sql: &str) -> Result<String, GuardViolation> {
	let trimmed = sql.trim();

	if trimmed.is_empty() {
		return Err(GuardViolation::Empty);
	}

	let statement = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

	if statement.contains(';') {
		return Err(GuardViolation::MultipleStatements);
	}

	let upper = statement.to_uppercase();
	let first_word = upper.split_whitespace().next().unwrap_or_default();

	match first_word {
		"SELECT" => {},
		"WITH" if contains_word(&upper, "SELECT") => {},
		_ => return Err(GuardViolation::NotReadOnly),
	}

	for fragment in FORBIDDEN_FRAGMENTS {
		if upper.contains(fragment) {
			return Err(GuardViolation::ForbiddenToken(fragment.to_string()));
		}
	}
	for keyword in FORBIDDEN_KEYWORDS {
		if contains_word(&upper, keyword) {
			return Err(GuardViolation::ForbiddenToken(keyword.to_string()));
		}
	}

	if Regex::new(r"(?i)\b(xp|sp)_\w+").map(|re| re.is_match(statement)).unwrap_or(true) {
		return Err(GuardViolation::ForbiddenToken("stored procedure".to_string()));
	}

	Ok(statement.to_string())
}

fn contains_word(haystack: &str, word: &str) -> bool {
	Regex::new(&format!(r"\b{}\b", regex::escape(word)))
		.map(|re| re.is_match(haystack))
		.unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_select_with_single_trailing_semicolon() {
		assert_eq!(
			check_read_only("  SELECT id FROM documents;  "),
			Ok("SELECT id FROM documents".to_string())
		);
		assert!(check_read_only("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
	}

	#[test]
	fn rejects_writes_comments_and_stacked_statements() {
		assert_eq!(check_read_only("DELETE FROM documents"), Err(GuardViolation::NotReadOnly));
		assert_eq!(
			check_read_only("SELECT 1; DROP TABLE documents;"),
			Err(GuardViolation::MultipleStatements)
		);
		assert_eq!(
			check_read_only("SELECT * FROM documents -- trailing"),
			Err(GuardViolation::ForbiddenToken("--".to_string()))
		);
		assert_eq!(
			check_read_only("WITH x AS (DELETE FROM t RETURNING id) SELECT * FROM x"),
			Err(GuardViolation::ForbiddenToken("DELETE".to_string()))
		);
	}

	#[test]
	fn column_names_containing_keywords_are_allowed() {
		assert!(check_read_only("SELECT updated_at, created_by FROM documents").is_ok());
	}
}
