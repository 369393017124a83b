use std::fmt;
use std::sync::Arc;

use log::{Level, Log, Metadata, Record};

pub const LOG_TARGET: &str = "segment_core";

/// Logger handle injected into components that report failures.
pub type SharedLogger = Arc<dyn Log>;

/// Forwards to whatever logger the process installed through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLogger;

impl Log for ProcessLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            log::logger().log(record);
        }
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

pub fn process_logger() -> SharedLogger {
    Arc::new(ProcessLogger)
}

pub(crate) fn emit(logger: &dyn Log, level: Level, args: fmt::Arguments<'_>) {
    let record = Record::builder()
        .args(args)
        .level(level)
        .target(LOG_TARGET)
        .module_path_static(Some(module_path!()))
        .file_static(Some(file!()))
        .build();

    if logger.enabled(record.metadata()) {
        logger.log(&record);
    }
}
