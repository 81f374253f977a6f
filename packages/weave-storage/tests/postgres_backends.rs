use weave_config::{GraphTables, Postgres};
use weave_domain::loader::{QueryParam, RelationalQuery};
use weave_storage::{db::Db, graph::GraphStore, relational};
use weave_testkit::TestDatabase;

async fn seeded_db() -> Option<(TestDatabase, Db)> {
	let base_dsn = weave_testkit::env_dsn()?;
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_graph_schema(&GraphTables::default()).await.expect("Failed to ensure schema.");

	for sql in [
		"\
INSERT INTO graph_nodes (node_id, display_name, entity_type, classification_code, organization)
VALUES
	('p1', 'Solid-state battery cell', 'patent', 'H01M', 'Acme'),
	('p2', 'Battery thermal control', 'patent', 'H01M', 'Birch'),
	('p3', 'Wind blade coating', 'patent', 'F03D', 'Cobalt'),
	('p4', 'Grid storage controller', 'patent', 'H02J', 'Dune')",
		"\
INSERT INTO graph_edges (source_id, target_id, relation)
VALUES ('p1', 'p4', 'cites'), ('p4', 'p3', 'cites')",
	] {
		sqlx::query(sql).execute(&db.pool).await.expect("Failed to seed graph.");
	}

	Some((test_db, db))
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set WEAVE_PG_DSN to run."]
async fn traversal_expands_from_name_seeds() {
	let Some((test_db, db)) = seeded_db().await else {
		eprintln!("Skipping traversal_expands_from_name_seeds; set WEAVE_PG_DSN to run this test.");

		return;
	};
	let graph = GraphStore::new(db.pool.clone(), &GraphTables::default());
	let one_hop =
		graph.traverse(&["solid-state".to_string()], 1, 10).await.expect("Traversal failed.");
	let two_hops =
		graph.traverse(&["solid-state".to_string()], 2, 10).await.expect("Traversal failed.");

	assert_eq!(
		one_hop.iter().map(|r| r.node_id.as_str()).collect::<Vec<_>>(),
		vec!["p1", "p4"]
	);
	assert_eq!(one_hop[0].score, 1.0);
	assert!(two_hops.iter().any(|r| r.node_id == "p3"));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set WEAVE_PG_DSN to run."]
async fn adjacency_covers_edges_and_shared_attributes() {
	let Some((test_db, db)) = seeded_db().await else {
		eprintln!("Skipping adjacency_covers_edges_and_shared_attributes; set WEAVE_PG_DSN.");

		return;
	};
	let graph = GraphStore::new(db.pool.clone(), &GraphTables::default());
	let ids = ["p1", "p2", "p3", "p4"].map(String::from);
	let adjacency = graph.adjacency(&ids).await.expect("Adjacency failed.");

	assert!(adjacency.is_adjacent("p1", "p4"));
	assert!(adjacency.is_adjacent("p2", "p1"));
	assert!(!adjacency.is_adjacent("p2", "p3"));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set WEAVE_PG_DSN to run."]
async fn relational_rows_decode_to_json_and_respect_cap() {
	let Some((test_db, db)) = seeded_db().await else {
		eprintln!("Skipping relational_rows_decode_to_json_and_respect_cap; set WEAVE_PG_DSN.");

		return;
	};
	let query = RelationalQuery {
		loader: "test".to_string(),
		sql: "\
SELECT organization, count(*) AS total
FROM graph_nodes
WHERE entity_type = $1
GROUP BY organization
ORDER BY organization"
			.to_string(),
		params: vec![QueryParam::Text("patent".to_string())],
	};
	let table = relational::execute(&db.pool, &query, 3).await.expect("Query failed.");

	assert_eq!(table.columns, vec!["organization", "total"]);
	assert_eq!(table.rows.len(), 3);
	assert_eq!(table.rows[0], vec![serde_json::json!("Acme"), serde_json::json!(1)]);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set WEAVE_PG_DSN to run."]
async fn unbounded_queries_stop_at_the_row_cap() {
	let Some((test_db, db)) = seeded_db().await else {
		eprintln!("Skipping unbounded_queries_stop_at_the_row_cap; set WEAVE_PG_DSN.");

		return;
	};
	let query = RelationalQuery::generated("SELECT n FROM generate_series(1, 200000) AS n");
	let table = relational::execute(&db.pool, &query, 2).await.expect("Query failed.");

	assert!(table.success);
	assert_eq!(table.columns, vec!["n"]);
	assert_eq!(table.rows, vec![vec![serde_json::json!(1)], vec![serde_json::json!(2)]]);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
