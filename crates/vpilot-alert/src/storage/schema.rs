//! `SQLite` schema for the device store, as an ordered list of steps.

/// Holds the schema version. Created before any step runs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// One schema step. Applying every step up to `version` yields that version.
#[derive(Debug, Clone, Copy)]
pub struct SchemaStep {
    /// Version reached after this step.
    pub version: i32,
    /// What the step does, for the log.
    pub summary: &'static str,
    /// Statements run as one batch.
    pub sql: &'static str,
}

/// All steps, oldest first.
pub const STEPS: &[SchemaStep] = &[SchemaStep {
    version: 1,
    summary: "device settings",
    // One row per value; writers replace the row, so the last writer wins
    sql: r"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
",
}];
