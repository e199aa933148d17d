//! Database schema definitions

/// Name of the single record table
pub const TABLE: &str = "litestore";

/// Scalar function answering "does this row match the armed filter"
pub const CHECK_FILTER_FN: &str = "check_filter";

/// Scalar function answering "does this row match the armed exclusion"
pub const CHECK_EXCLUDE_FN: &str = "check_exclude";

/// SQL to create the record table with the codec's declared column type
pub fn create_table(column_type: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {TABLE} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    value {column_type} NOT NULL
)
"#
    )
}

pub const INSERT: &str = "INSERT INTO litestore (value) VALUES (?1)";

pub const SELECT_ALL: &str = "SELECT id, value FROM litestore ORDER BY id";

pub const SELECT_FILTERED: &str =
    "SELECT id, value FROM litestore WHERE check_filter(value) ORDER BY id";

pub const SELECT_EXCLUDED: &str =
    "SELECT id, value FROM litestore WHERE check_exclude(value) ORDER BY id";

pub const DELETE_BY_ID: &str = "DELETE FROM litestore WHERE id = ?1";

pub const DELETE_ALL: &str = "DELETE FROM litestore";

pub const DELETE_EXCLUDED: &str = "DELETE FROM litestore WHERE check_exclude(value)";

pub const COUNT: &str = "SELECT COUNT(*) FROM litestore";

pub const PROBE_COLUMNS: &str = "SELECT * FROM litestore LIMIT 1";
