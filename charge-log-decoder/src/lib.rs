//! # charge-log-decoder
//!
//! Decoder library for EV charging-station communication logs. Charge
//! controllers dump their binary wire traffic into text logs as hex; this
//! crate turns those logs back into structured records using a
//! declarative protocol schema instead of hand-written per-command
//! parsing code.
//!
//! The pipeline has three stages:
//!
//! - [`schema`] loads a TOML protocol description (types, enums, framing,
//!   per-command layouts) into an immutable [`ProtocolConfig`].
//! - [`extract`] segments raw log text into timestamped hex frames, in
//!   batch or streaming mode.
//! - [`parser`] drives the [`codec`] over each frame, producing decoded
//!   records with per-frame terminal states and aggregate statistics.
//!
//! ```no_run
//! use charge_log_decoder::{extract, RecordParser};
//! use std::sync::Arc;
//!
//! # fn main() -> charge_log_decoder::Result<()> {
//! let config = Arc::new(charge_log_decoder::schema::load_from_file("protocol.toml")?);
//! let frames = extract::extract_from_file("comm.log", &config.framing.frame_head)?;
//!
//! let parser = RecordParser::new(config);
//! let (records, stats) = parser.parse_many(&frames);
//! println!("{} records, {} recovered errors", records.len(), stats.errors);
//! # Ok(())
//! # }
//! ```
//!
//! Decoding degrades gracefully: a truncated payload yields a record with
//! the missing-data sentinel in the short fields, and a payload that
//! fails to decode is recovered as raw hex plus the error message. One
//! bad frame never aborts a batch.

pub mod codec;
pub mod extract;
pub mod parser;
pub mod schema;
pub mod types;

pub use codec::{Context, FieldCodec};
pub use extract::{FrameIter, StreamExtractor};
pub use parser::{Outcome, ParseStats, RecordParser};
pub use schema::{ProtocolConfig, SchemaCache};
pub use types::{
    DecoderError, Direction, Frame, ParsedRecord, RecordStatus, Result, Value, ValueMap,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
