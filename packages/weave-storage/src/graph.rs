use sqlx::PgPool;

use weave_domain::{SearchResult, cross_validation::GraphAdjacency};

use crate::{Error, Result};

#[derive(Debug, sqlx::FromRow)]
struct TraversedNode {
	node_id: String,
	display_name: String,
	entity_type: String,
	organization: Option<String>,
	community: Option<String>,
	hops: i32,
}

/// Relationship graph stored as node and edge tables in Postgres.
pub struct GraphStore {
	pub pool: PgPool,
	nodes_table: String,
	edges_table: String,
}
impl GraphStore {
	pub fn new(pool: PgPool, tables: &weave_config::GraphTables) -> Self {
		Self {
			pool,
			nodes_table: tables.nodes_table.clone(),
			edges_table: tables.edges_table.clone(),
		}
	}

	/// Walks up to `depth` hops out from every node whose id equals a seed or whose name
	/// contains one. Nodes closer to a seed score higher.
	pub async fn traverse(
		&self,
		seeds: &[String],
		depth: u32,
		limit: usize,
	) -> Result<Vec<SearchResult>> {
		let seeds: Vec<String> = seeds
			.iter()
			.map(|seed| seed.trim())
			.filter(|seed| !seed.is_empty())
			.map(String::from)
			.collect();

		if seeds.is_empty() || limit == 0 {
			return Ok(Vec::new());
		}

		let patterns: Vec<String> =
			seeds.iter().map(|seed| format!("%{}%", escape_like(seed))).collect();
		let depth = i32::try_from(depth)
			.map_err(|_| Error::InvalidArgument("Traversal depth is too large.".to_string()))?;
		let limit = i64::try_from(limit)
			.map_err(|_| Error::InvalidArgument("Traversal limit is too large.".to_string()))?;
		let sql = format!(
			"\
WITH RECURSIVE walk(node_id, hops) AS (
	SELECT n.node_id, 0
	FROM {nodes} n
	WHERE n.node_id = ANY($1::text[]) OR n.display_name ILIKE ANY($2::text[])
	UNION
	SELECT
		CASE WHEN e.source_id = w.node_id THEN e.target_id ELSE e.source_id END,
		w.hops + 1
	FROM walk w
	JOIN {edges} e ON e.source_id = w.node_id OR e.target_id = w.node_id
	WHERE w.hops < $3
)
SELECT
	n.node_id,
	n.display_name,
	n.entity_type,
	n.organization,
	n.community,
	MIN(w.hops) AS hops
FROM walk w
JOIN {nodes} n ON n.node_id = w.node_id
GROUP BY n.node_id, n.display_name, n.entity_type, n.organization, n.community
ORDER BY hops, n.node_id
LIMIT $4",
			nodes = self.nodes_table,
			edges = self.edges_table,
		);
		let rows = sqlx::query_as::<_, TraversedNode>(sql.as_str())
			.bind(&seeds)
			.bind(&patterns)
			.bind(depth)
			.bind(limit)
			.fetch_all(&self.pool)
			.await?;

		Ok(rows.into_iter().map(into_result).collect())
	}

	/// Pairs among `ids` joined by an edge, a shared classification code, or a shared
	/// organization.
	pub async fn adjacency(&self, ids: &[String]) -> Result<GraphAdjacency> {
		if ids.len() < 2 {
			return Ok(GraphAdjacency::default());
		}

		let sql = format!(
			"\
SELECT a.node_id, b.node_id
FROM {nodes} a
JOIN {nodes} b ON a.node_id < b.node_id
WHERE a.node_id = ANY($1::text[])
	AND b.node_id = ANY($1::text[])
	AND (
		EXISTS (
			SELECT 1
			FROM {edges} e
			WHERE (e.source_id = a.node_id AND e.target_id = b.node_id)
				OR (e.source_id = b.node_id AND e.target_id = a.node_id)
		)
		OR (a.classification_code IS NOT NULL AND a.classification_code = b.classification_code)
		OR (a.organization IS NOT NULL AND a.organization = b.organization)
	)",
			nodes = self.nodes_table,
			edges = self.edges_table,
		);
		let pairs: Vec<(String, String)> =
			sqlx::query_as(sql.as_str()).bind(ids).fetch_all(&self.pool).await?;

		Ok(GraphAdjacency::new(pairs))
	}
}

fn into_result(node: TraversedNode) -> SearchResult {
	let score = 1.0 / (1.0 + f64::from(node.hops.max(0)));
	let mut result = SearchResult::new(node.node_id, node.display_name, node.entity_type, score)
		.with_metadata("hops", node.hops);

	if let Some(organization) = node.organization {
		result = result.with_metadata("organization", organization);
	}
	if let Some(community) = node.community {
		result = result.with_metadata("community", community);
	}

	result
}

fn escape_like(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());

	for ch in raw.chars() {
		if matches!(ch, '%' | '_' | '\\') {
			out.push('\\');
		}

		out.push(ch);
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn like_wildcards_are_escaped() {
		assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
	}

	#[test]
	fn closer_nodes_score_higher() {
		let node = |hops| TraversedNode {
			node_id: format!("n{hops}"),
			display_name: "Node".to_string(),
			entity_type: "patent".to_string(),
			organization: Some("Acme".to_string()),
			community: None,
			hops,
		};
		let seed = into_result(node(0));
		let far = into_result(node(2));

		assert_eq!(seed.score, 1.0);
		assert!(far.score < seed.score);
		assert_eq!(far.metadata.get("organization"), Some(&serde_json::json!("Acme")));
	}
}
