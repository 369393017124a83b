use std::path::PathBuf;

use crate::build_info;
use clap::{Args, Parser, Subcommand};
use segment_core::{ElementId, ElementKind, SegmentId};

#[derive(Parser, Debug)]
#[command(
    about = "Segment assignment maintenance and index worker",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(long = "database-url", global = true)]
    /// Overrides DATABASE_URL (postgres:// URL or SQLite path)
    pub database_url: Option<String>,

    #[arg(long = "element-tables", global = true)]
    /// JSON file overriding the element-source table layout
    pub element_tables: Option<PathBuf>,

    #[arg(long = "log-level", default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the assignment, queue and index tables if missing
    InitSchema,
    /// Assign segments to an element and queue it and its descendants
    Assign(AssignArgs),
    /// Delete every stored row for an element and queue its descendants
    Remove(ElementArgs),
    /// Queue all descendants of an element for reindexing
    EnqueueChildren(ElementArgs),
    /// Print an element's assignment and indexed segments as JSON
    Show(ElementArgs),
    /// Drain the reindex queue into the index table
    Drain(DrainArgs),
}

impl Command {
    /// Stable name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitSchema => "init_schema",
            Self::Assign(_) => "assign",
            Self::Remove(_) => "remove",
            Self::EnqueueChildren(_) => "enqueue_children",
            Self::Show(_) => "show",
            Self::Drain(_) => "drain",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ElementArgs {
    #[arg(long = "element-id")]
    pub element_id: ElementId,

    #[arg(long = "type", alias = "element-type")]
    /// object, document or asset
    pub element_type: ElementKind,
}

#[derive(Args, Debug, Clone)]
pub struct AssignArgs {
    #[command(flatten)]
    pub element: ElementArgs,

    #[arg(long, default_value_t = false)]
    pub breaks_inheritance: bool,

    #[arg(long, value_delimiter = ',')]
    /// Comma-separated segment ids; omit to clear the element's own segments
    pub segments: Vec<SegmentId>,
}

#[derive(Args, Debug, Clone)]
pub struct DrainArgs {
    #[arg(long = "batch-size", default_value_t = 500)]
    pub batch_size: i64,

    #[arg(long = "max-batches")]
    /// Stop after this many batches per drain pass
    pub max_batches: Option<usize>,

    #[arg(long, default_value_t = false)]
    /// Keep polling the queue until SIGINT/SIGTERM
    pub watch: bool,

    #[arg(long = "interval-ms", default_value_t = 5_000)]
    /// Pause between drain passes in watch mode
    pub interval_ms: u64,
}

pub fn validate_drain_args(args: &DrainArgs) -> Result<(), String> {
    if args.batch_size <= 0 {
        return Err(format!("--batch-size must be > 0, got {}", args.batch_size));
    }
    if args.max_batches == Some(0) {
        return Err("--max-batches must be > 0".to_string());
    }
    if args.watch && args.interval_ms == 0 {
        return Err("--interval-ms must be > 0 in --watch mode".to_string());
    }
    Ok(())
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from(["reindex_worker", "--version", "--no-such-flag"])
            .expect_err("expected clap to stop parsing after --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(build_info::VERSION_WITH_COMMIT));
    }

    #[test]
    fn assign_parses_comma_separated_segments() {
        let cli = Cli::try_parse_from([
            "reindex_worker",
            "assign",
            "--element-id",
            "42",
            "--type",
            "Document",
            "--breaks-inheritance",
            "--segments",
            "3,1,2",
        ])
        .expect("assign args should parse");

        let Command::Assign(args) = cli.command else {
            panic!("expected assign subcommand");
        };
        assert_eq!(args.element.element_id.get(), 42);
        assert_eq!(args.element.element_type, ElementKind::Document);
        assert!(args.breaks_inheritance);
        let ids: Vec<i64> = args.segments.iter().map(|id| id.get()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn invalid_element_values_are_rejected() {
        for argv in [
            ["reindex_worker", "remove", "--element-id", "0", "--type", "object"],
            ["reindex_worker", "remove", "--element-id", "5", "--type", "page"],
        ] {
            let err = Cli::try_parse_from(argv).expect_err("invalid value should fail");
            assert_eq!(err.kind(), ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn global_flags_may_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "reindex_worker",
            "drain",
            "--database-url",
            "cmf.db",
            "--log-level",
            "debug",
        ])
        .expect("global flags should parse after subcommand");

        assert_eq!(cli.global.database_url.as_deref(), Some("cmf.db"));
        assert_eq!(cli.global.log_level, "debug");
        assert_eq!(cli.command.name(), "drain");
    }

    #[test]
    fn drain_defaults_and_validation() {
        let cli = Cli::try_parse_from(["reindex_worker", "drain"]).expect("drain should parse");
        let Command::Drain(mut args) = cli.command else {
            panic!("expected drain subcommand");
        };
        assert_eq!(args.batch_size, 500);
        assert_eq!(args.interval_ms, 5_000);
        assert!(!args.watch);
        assert!(validate_drain_args(&args).is_ok());

        args.batch_size = 0;
        assert!(validate_drain_args(&args).is_err());

        args.batch_size = 10;
        args.max_batches = Some(0);
        assert!(validate_drain_args(&args).is_err());

        args.max_batches = None;
        args.watch = true;
        args.interval_ms = 0;
        assert!(validate_drain_args(&args).is_err());
    }
}
