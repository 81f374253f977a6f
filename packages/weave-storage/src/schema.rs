pub fn render_graph_schema(tables: &weave_config::GraphTables) -> String {
	let nodes = tables.nodes_table.as_str();
	let edges = tables.edges_table.as_str();

	format!(
		"\
CREATE TABLE IF NOT EXISTS {nodes} (
	node_id text PRIMARY KEY,
	display_name text NOT NULL,
	entity_type text NOT NULL,
	classification_code text,
	organization text,
	community text
);
CREATE INDEX IF NOT EXISTS {nodes}_display_name_idx ON {nodes} (lower(display_name));
CREATE TABLE IF NOT EXISTS {edges} (
	source_id text NOT NULL REFERENCES {nodes} (node_id) ON DELETE CASCADE,
	target_id text NOT NULL REFERENCES {nodes} (node_id) ON DELETE CASCADE,
	relation text NOT NULL,
	weight double precision NOT NULL DEFAULT 1.0,
	PRIMARY KEY (source_id, target_id, relation)
);
CREATE INDEX IF NOT EXISTS {edges}_target_idx ON {edges} (target_id);"
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_configured_table_names() {
		let tables = weave_config::GraphTables {
			nodes_table: "kg_nodes".to_string(),
			edges_table: "kg_edges".to_string(),
		};
		let sql = render_graph_schema(&tables);

		assert!(sql.contains("CREATE TABLE IF NOT EXISTS kg_nodes"));
		assert!(sql.contains("REFERENCES kg_nodes (node_id)"));
		assert!(sql.contains("ON kg_edges (target_id)"));
		assert_eq!(sql.split(';').filter(|s| !s.trim().is_empty()).count(), 4);
	}
}
