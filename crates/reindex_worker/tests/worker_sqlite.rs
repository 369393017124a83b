#![cfg(feature = "sqlite-tests")]

use std::sync::Arc;

use clap::Parser;
use reindex_worker_lib::cli::{Cli, Command};
use reindex_worker_lib::commands::{execute, CommandOutcome};
use reindex_worker_lib::config::{Config, ConfigOverrides};
use reindex_worker_lib::db::{DatabaseTarget, WorkerConnection};
use reindex_worker_lib::with_connection;
use segment_core::db::sqlite_test::{seed_element, setup_in_memory_sqlite};
use segment_core::{ElementKind, SegmentAssigner, TableTypeMapper, TypeMapper};

fn parse(argv: &[&str]) -> Command {
    Cli::try_parse_from(argv.iter().copied()).expect("argv should parse").command
}

fn run(conn: &mut WorkerConnection, assigner: &SegmentAssigner, argv: &[&str]) -> CommandOutcome {
    let command = parse(argv);
    with_connection!(conn, |conn| execute(conn, assigner, &command))
        .expect("command should succeed")
}

#[test]
fn parsed_commands_drive_a_full_propagation_cycle() {
    let config = Config::from_lookup(
        |_| None,
        ConfigOverrides {
            database_url: Some(":memory:".to_string()),
            element_tables_path: None,
        },
    )
    .expect("config should resolve");
    assert_eq!(config.database, DatabaseTarget::Sqlite(":memory:".to_string()));

    let mut sqlite = setup_in_memory_sqlite();
    seed_element(&mut sqlite, ElementKind::Document, 1, "/en");
    seed_element(&mut sqlite, ElementKind::Document, 2, "/en/news");
    seed_element(&mut sqlite, ElementKind::Document, 3, "/en/news/2024");
    let mut conn = WorkerConnection::Sqlite(sqlite);

    let assigner = SegmentAssigner::new(
        config.tables.clone(),
        Arc::new(config.type_mapper().expect("default mapper")),
    );

    run(&mut conn, &assigner, &["reindex_worker", "init-schema"]);

    let outcome = run(
        &mut conn,
        &assigner,
        &[
            "reindex_worker", "assign", "--element-id", "1", "--type", "document",
            "--segments", "5,3",
        ],
    );
    assert!(matches!(
        outcome,
        CommandOutcome::Assigned { queued_descendants: 2 }
    ));

    run(
        &mut conn,
        &assigner,
        &[
            "reindex_worker", "assign", "--element-id", "3", "--type", "document",
            "--breaks-inheritance", "--segments", "9",
        ],
    );

    let CommandOutcome::Drained(report) = run(
        &mut conn,
        &assigner,
        &["reindex_worker", "drain", "--batch-size", "2"],
    ) else {
        panic!("expected drain outcome");
    };
    assert_eq!(report.claimed, 3);
    assert_eq!(report.batches, 2);

    let CommandOutcome::Shown(news) = run(
        &mut conn,
        &assigner,
        &["reindex_worker", "show", "--element-id", "2", "--type", "document"],
    ) else {
        panic!("expected show outcome");
    };
    assert_eq!(
        news.indexed_segments.map(|set| set.to_db_string()).as_deref(),
        Some("3,5")
    );

    let CommandOutcome::Shown(archive) = run(
        &mut conn,
        &assigner,
        &["reindex_worker", "show", "--element-id", "3", "--type", "document"],
    ) else {
        panic!("expected show outcome");
    };
    assert_eq!(
        archive.effective_segments.map(|set| set.to_db_string()).as_deref(),
        Some("9")
    );

    run(
        &mut conn,
        &assigner,
        &["reindex_worker", "remove", "--element-id", "3", "--type", "document"],
    );
    let CommandOutcome::Shown(removed) = run(
        &mut conn,
        &assigner,
        &["reindex_worker", "show", "--element-id", "3", "--type", "document"],
    ) else {
        panic!("expected show outcome");
    };
    assert!(removed.assignment.is_none());
    assert!(removed.indexed_segments.is_none());
}

#[test]
fn element_table_override_file_is_loaded() {
    let path = std::env::temp_dir().join(format!(
        "reindex_worker_element_tables_{}.json",
        std::process::id()
    ));
    std::fs::write(
        &path,
        r#"{"asset": {"table": "media", "id_column": "media_id",
                      "path_column": "folder", "key_column": "file_name"}}"#,
    )
    .expect("write override file");

    let config = Config::from_lookup(
        |_| None,
        ConfigOverrides {
            database_url: Some("cmf.db".to_string()),
            element_tables_path: Some(path.clone()),
        },
    )
    .expect("config should resolve");
    let mapper = config.type_mapper().expect("override should parse");
    std::fs::remove_file(&path).expect("remove override file");

    let assets = mapper.element_table(ElementKind::Asset);
    assert_eq!(assets.table.as_str(), "media");
    assert_eq!(assets.key_column.as_str(), "file_name");
    assert_eq!(
        mapper.element_table(ElementKind::Object),
        TableTypeMapper::default().element_table(ElementKind::Object)
    );
}
