use mediation_db::{create_pool, run_migrations, schema_ready, DbRuntimeSettings, REQUIRED_TABLES};

#[test]
fn db_initialization_works() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("init.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");

    assert!(!schema_ready(&conn).expect("schema probe failed"));

    let applied = run_migrations(&conn).expect("failed to run migrations");
    assert_eq!(applied, REQUIRED_TABLES.len());
    assert!(schema_ready(&conn).expect("schema probe failed"));

    // A second pooled connection sees the same file-backed schema.
    let other = pool.get().expect("failed to get second connection");
    assert!(schema_ready(&other).expect("schema probe failed"));
}
