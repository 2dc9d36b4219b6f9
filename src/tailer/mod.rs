//! Incremental JSONL tailing.

mod error;
mod jsonl;
mod multi;

pub use error::TailerError;
pub use jsonl::{FileIdentity, JsonlTailer, TailedLine, MAX_READ_BYTES};
pub use multi::MultiFileTailer;
