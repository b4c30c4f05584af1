//! SQLite schema
//!
//! Names compare case-insensitively through `COLLATE NOCASE`; amounts are
//! stored as decimal text. `COLLATE NOCASE` only folds ASCII, so used receipts
//! carry `normalize_key` columns and every lookup binds normalized keys.

pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    username      TEXT PRIMARY KEY COLLATE NOCASE,
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,
    matricule     TEXT UNIQUE COLLATE NOCASE,
    created_at    TEXT NOT NULL
)
"#;

pub const CREATE_PROFILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    username            TEXT PRIMARY KEY COLLATE NOCASE,
    email               TEXT NOT NULL COLLATE NOCASE,
    school_fee_due      TEXT NOT NULL,
    penalty_fee         TEXT NOT NULL,
    excess_fee          TEXT NOT NULL,
    graduation_fee_paid INTEGER NOT NULL DEFAULT 0,
    internship_fee_paid INTEGER NOT NULL DEFAULT 0,
    revision            INTEGER NOT NULL DEFAULT 0
)
"#;

pub const CREATE_CLEARANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS clearances (
    clearance_id INTEGER PRIMARY KEY AUTOINCREMENT,
    username     TEXT NOT NULL COLLATE NOCASE,
    receipt_user TEXT NOT NULL,
    receipt_id   TEXT NOT NULL,
    created_at   TEXT NOT NULL
)
"#;

pub const CREATE_CLEARANCE_RECEIPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS clearance_receipts (
    clearance_id INTEGER NOT NULL REFERENCES clearances (clearance_id),
    position     INTEGER NOT NULL,
    receipt_id   TEXT NOT NULL,
    PRIMARY KEY (clearance_id, position)
)
"#;

pub const CREATE_USED_RECEIPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS used_receipts (
    receipt_key  TEXT NOT NULL UNIQUE,
    receipt_id   TEXT NOT NULL,
    user_key     TEXT NOT NULL,
    receipt_user TEXT NOT NULL,
    used_at      TEXT NOT NULL
)
"#;

pub const CREATE_CLEARANCES_USERNAME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_clearances_username ON clearances (username)";

pub const CREATE_USED_RECEIPTS_USER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_used_receipts_user ON used_receipts (user_key)";

/// Every statement `init` runs, in order
pub const ALL: &[&str] = &[
    CREATE_USERS_TABLE,
    CREATE_PROFILES_TABLE,
    CREATE_CLEARANCES_TABLE,
    CREATE_CLEARANCE_RECEIPTS_TABLE,
    CREATE_USED_RECEIPTS_TABLE,
    CREATE_CLEARANCES_USERNAME_INDEX,
    CREATE_USED_RECEIPTS_USER_INDEX,
];
