use std::sync::{Arc, Mutex};

use log::{Level, Log, Metadata, Record};

/// One record captured by [`CapturingLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// In-memory `log::Log` used to assert what a component reported.
#[derive(Debug, Default)]
pub struct CapturingLogger {
    records: Mutex<Vec<CapturedRecord>>,
}

impl CapturingLogger {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records
            .lock()
            .expect("capturing logger mutex poisoned")
            .clone()
    }

    pub fn errors(&self) -> Vec<CapturedRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.level == Level::Error)
            .collect()
    }
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.records
            .lock()
            .expect("capturing logger mutex poisoned")
            .push(CapturedRecord {
                level: record.level(),
                target: record.target().to_string(),
                message: record.args().to_string(),
            });
    }

    fn flush(&self) {}
}
