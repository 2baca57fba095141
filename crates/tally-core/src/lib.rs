//! Tally Core Library
//!
//! CSV import and reconciliation pipeline for the Tally finance app:
//! - Lenient CSV parsing (comma or semicolon, quote toggling)
//! - Column-to-field auto-mapping and bank source formats
//! - Row normalization and validation
//! - Fuzzy matching against existing payments
//! - Import session state machine with selection, links and merge groups
//! - Pluggable payment backends (HTTP, in-memory)
//! - Layered TOML configuration
//! - CSV/JSON export of candidates

pub mod backend;
pub mod config;
pub mod error;
pub mod export;
pub mod mapping;
pub mod matching;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod session;

pub use backend::{
    BackendClient, CreatedPayment, MemoryBackend, NewPayment, PaymentBackend, RemoteBackend,
};
pub use config::{BackendConfig, BackendKind, SubmissionConfig, TallyConfig};
pub use error::{Error, Result};
pub use export::{write_candidates, ExportFormat};
pub use mapping::{auto_map, infer_field, SignConvention, SourceFormat};
pub use matching::{find_best_match, rank_candidates, MatchConfig, MatchFactors, RankedPayment};
pub use models::*;
pub use normalize::normalize_row;
pub use parser::{load_csv_file, parse_csv, parse_date_to_iso, read_csv_file, ParsedCsv};
pub use session::{
    drive_submission, submit_shared, ImportSession, ImportStats, ImportStep, SessionOptions,
    SubmissionAction, SubmissionItem, SubmissionReport,
};
