//! Append-only journal.
//!
//! Each store write becomes one frame:
//!
//! ```text
//! | magic "DWJ1" | len: u32 LE | CBOR record (len bytes) | crc32: u32 LE |
//! ```
//!
//! The CRC covers the CBOR body. On open, a frame cut short at the end of
//! the journal (a write interrupted by a crash) is discarded and the file is
//! truncated back to the last complete frame. Damage anywhere else is
//! reported as corruption.

mod backend;
mod file;
mod frame;
mod memory;
mod record;

pub use backend::JournalBackend;
pub use file::FileJournal;
pub use memory::MemoryJournal;

pub(crate) use frame::{decode_frames, encode_frame};
pub(crate) use record::JournalRecord;
