use crate::{
    cli::{validate_drain_args, Cli, Command, DrainArgs},
    config::{Config, ConfigOverrides},
    db::{DatabaseTarget, WorkerConnection},
    logging::{format_error_report, init_logging},
    with_connection,
};
use diesel::ConnectionError;
use dotenv::dotenv;
use segment_core::db::schema::create_assignment_tables;
use segment_core::db::AssignmentDb;
use segment_core::{
    AssignmentError, DrainReport, ElementRef, SegmentAssigner, SegmentAssignment, SegmentSet,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const SERVICE_NAME: &str = "reindex_worker";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to connect to {backend}: {source}")]
    Connect {
        backend: &'static str,
        #[source]
        source: ConnectionError,
    },
    #[error("failed to create assignment tables: {0}")]
    Schema(#[source] diesel::result::Error),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error("blocking database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Machine-readable result of `show`.
#[derive(Debug, Serialize)]
pub struct ElementReport {
    pub element: ElementRef,
    pub assignment: Option<SegmentAssignment>,
    pub indexed_segments: Option<SegmentSet>,
    pub effective_segments: Option<SegmentSet>,
}

/// What a single (non-watch) command produced.
#[derive(Debug)]
pub enum CommandOutcome {
    SchemaReady,
    Assigned { queued_descendants: usize },
    Removed,
    Enqueued { queued: usize },
    Shown(ElementReport),
    Drained(DrainReport),
}

/// Runs one command against an open connection.
///
/// `drain` performs a single pass here; watch mode loops around this in [`run`].
pub fn execute<C>(
    conn: &mut C,
    assigner: &SegmentAssigner,
    command: &Command,
) -> Result<CommandOutcome, CommandError>
where
    C: AssignmentDb,
{
    match command {
        Command::InitSchema => {
            create_assignment_tables(conn, assigner.tables()).map_err(CommandError::Schema)?;
            Ok(CommandOutcome::SchemaReady)
        }
        Command::Assign(args) => {
            let queued_descendants = assigner.assign_by_id(
                conn,
                args.element.element_id,
                args.element.element_type,
                args.breaks_inheritance,
                &args.segments,
            )?;
            Ok(CommandOutcome::Assigned { queued_descendants })
        }
        Command::Remove(args) => {
            assigner.remove_element_by_id(conn, args.element_id, args.element_type)?;
            Ok(CommandOutcome::Removed)
        }
        Command::EnqueueChildren(args) => {
            let queued = assigner.enqueue_children(conn, args.element_id, args.element_type)?;
            Ok(CommandOutcome::Enqueued { queued })
        }
        Command::Show(args) => {
            let (id, kind) = (args.element_id, args.element_type);
            Ok(CommandOutcome::Shown(ElementReport {
                element: ElementRef::new(id, kind),
                assignment: assigner.get_assignment(conn, id, kind)?,
                indexed_segments: assigner.indexed_segments(conn, id, kind)?,
                effective_segments: assigner.effective_segments(conn, id, kind)?,
            }))
        }
        Command::Drain(args) => Ok(CommandOutcome::Drained(assigner.drain_queue(
            conn,
            args.batch_size,
            args.max_batches,
        )?)),
    }
}

/// Entry point for the binary. Returns the process exit code.
///
/// 0 on success, 2 for invalid arguments or configuration, 1 for runtime failures.
pub async fn run(cli: Cli) -> i32 {
    dotenv().ok();

    let Cli { global, command } = cli;
    let logging_context = init_logging(SERVICE_NAME, command.name(), &global.log_level);
    let run_span = tracing::info_span!(
        "worker_run",
        service = %logging_context.service,
        environment = %logging_context.environment,
        command = %logging_context.command,
        run_id = %logging_context.run_id,
        build_version = %logging_context.build_version,
        build_commit = %logging_context.build_commit
    );
    let _run_guard = run_span.enter();

    if let Command::Drain(args) = &command {
        if let Err(err) = validate_drain_args(args) {
            eprintln!("{err}");
            return 2;
        }
    }

    let config = match Config::from_env(ConfigOverrides {
        database_url: global.database_url,
        element_tables_path: global.element_tables,
    }) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    let type_mapper = match config.type_mapper() {
        Ok(mapper) => mapper,
        Err(err) => {
            eprintln!("invalid element table configuration: {err}");
            return 2;
        }
    };

    info!(
        event = "command_starting",
        command = command.name(),
        backend = config.database.backend_name(),
        assignment_table = %config.tables.assignment,
        queue_table = %config.tables.queue,
        index_table = %config.tables.index,
        "starting command"
    );

    let assigner = Arc::new(SegmentAssigner::new(
        config.tables.clone(),
        Arc::new(type_mapper),
    ));

    match command {
        Command::Drain(args) if args.watch => {
            watch_queue(config.database, assigner, args).await
        }
        command => run_once(config.database, assigner, command).await,
    }
}

async fn run_once(database: DatabaseTarget, assigner: Arc<SegmentAssigner>, command: Command) -> i32 {
    let name = command.name();
    let result = run_db_op(database, move |conn| {
        with_connection!(conn, |conn| execute(conn, &assigner, &command))
    })
    .await;

    match result {
        Ok(outcome) => {
            report_outcome(name, &outcome);
            0
        }
        Err(err) => {
            let error_report = format_error_report(&err);
            error!(
                event = "command_failed",
                command = name,
                error = %err,
                error_debug = ?err,
                error_report = %error_report,
                "command failed"
            );
            eprintln!("{name} failed: {err}");
            eprintln!("{error_report}");
            1
        }
    }
}

/// Drains the queue on a fixed interval until SIGINT or SIGTERM.
///
/// A failed pass is logged and retried on the next tick.
async fn watch_queue(database: DatabaseTarget, assigner: Arc<SegmentAssigner>, args: DrainArgs) -> i32 {
    let shutdown = CancellationToken::new();
    let signal_handle = tokio::spawn(handle_shutdown_signals(shutdown.clone()));
    let interval = Duration::from_millis(args.interval_ms);
    let mut totals = DrainReport::default();
    let mut passes: u64 = 0;

    info!(
        event = "drain_watch_starting",
        batch_size = args.batch_size,
        interval_ms = args.interval_ms,
        "watching reindex queue"
    );

    while !shutdown.is_cancelled() {
        let pass_assigner = assigner.clone();
        let (batch_size, max_batches) = (args.batch_size, args.max_batches);
        let result = run_db_op(database.clone(), move |conn| {
            with_connection!(conn, |conn| pass_assigner
                .drain_queue(conn, batch_size, max_batches)
                .map_err(CommandError::from))
        })
        .await;

        passes = passes.saturating_add(1);
        match result {
            Ok(report) => {
                accumulate(&mut totals, &report);
                if report.claimed > 0 {
                    info!(
                        event = "drain_pass_complete",
                        pass = passes,
                        batches = report.batches,
                        claimed = report.claimed,
                        indexed = report.indexed,
                        cleared = report.cleared,
                        missing = report.missing,
                        skipped = report.skipped,
                        requeued = report.requeued,
                        "drained reindex queue"
                    );
                }
            }
            Err(err) => {
                let error_report = format_error_report(&err);
                error!(
                    event = "drain_pass_failed",
                    pass = passes,
                    error = %err,
                    error_report = %error_report,
                    "drain pass failed, retrying next tick"
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }

    signal_handle.abort();
    info!(
        event = "drain_watch_stopped",
        passes,
        claimed = totals.claimed,
        indexed = totals.indexed,
        cleared = totals.cleared,
        missing = totals.missing,
        skipped = totals.skipped,
        requeued = totals.requeued,
        "stopped watching reindex queue"
    );
    0
}

async fn handle_shutdown_signals(shutdown: CancellationToken) {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(err), _) | (_, Err(err)) => {
            warn!(
                event = "signal_handler_install_failed",
                error = %err,
                "failed to register shutdown signal handlers, stopping watch"
            );
            shutdown.cancel();
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!(event = "shutdown_signal", signal = "SIGTERM", "SIGTERM received, shutting down"),
        _ = sigint.recv() => info!(event = "shutdown_signal", signal = "SIGINT", "SIGINT received, shutting down"),
    }
    shutdown.cancel();
}

/// Opens a fresh connection on the blocking pool and runs `op` with it.
async fn run_db_op<T, F>(database: DatabaseTarget, op: F) -> Result<T, CommandError>
where
    T: Send + 'static,
    F: FnOnce(&mut WorkerConnection) -> Result<T, CommandError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = database.establish().map_err(|source| CommandError::Connect {
            backend: database.backend_name(),
            source,
        })?;
        op(&mut conn)
    })
    .await?
}

fn report_outcome(command: &'static str, outcome: &CommandOutcome) {
    match outcome {
        CommandOutcome::SchemaReady => {
            info!(event = "schema_ready", "assignment tables are in place");
        }
        CommandOutcome::Assigned { queued_descendants } => {
            info!(
                event = "segments_assigned",
                queued_descendants = *queued_descendants,
                "assignment stored"
            );
        }
        CommandOutcome::Removed => {
            info!(event = "element_removed", "assignment rows removed");
        }
        CommandOutcome::Enqueued { queued } => {
            info!(
                event = "children_enqueued",
                queued = *queued,
                "descendants queued"
            );
        }
        CommandOutcome::Shown(report) => print_json(command, report),
        CommandOutcome::Drained(report) => {
            info!(
                event = "drain_complete",
                batches = report.batches,
                claimed = report.claimed,
                indexed = report.indexed,
                cleared = report.cleared,
                missing = report.missing,
                skipped = report.skipped,
                requeued = report.requeued,
                "drained reindex queue"
            );
            print_json(command, report);
        }
    }
}

fn print_json<T: Serialize>(command: &'static str, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(
            event = "output_serialize_failed",
            command,
            error = %err,
            "failed to render command output"
        ),
    }
}

fn accumulate(totals: &mut DrainReport, pass: &DrainReport) {
    totals.batches += pass.batches;
    totals.claimed += pass.claimed;
    totals.indexed += pass.indexed;
    totals.cleared += pass.cleared;
    totals.missing += pass.missing;
    totals.skipped += pass.skipped;
    totals.requeued += pass.requeued;
}
