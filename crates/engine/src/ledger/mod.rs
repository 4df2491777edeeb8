pub mod csv_ledger;
pub mod sqlite;

pub use csv_ledger::CsvLedger;
pub use sqlite::SqliteLedger;

/// Column order shared by every ledger backend.
pub const LEDGER_HEADER: [&str; 7] = [
    "timestamp",
    "symbol",
    "action",
    "price",
    "quantity",
    "spent_or_received",
    "cumulative_pnl",
];
