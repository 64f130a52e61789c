//! Shared plumbing for the nettest crates: digests, canonical JSON, atomic file
//! writes and YAML helpers.

mod digest;
mod fsutil;
mod yaml;

pub use digest::{canonical_json, sha256_bytes, short_digest};
pub use fsutil::{atomic_write_bytes, ensure_dir};
pub use yaml::{
    looks_like_clock, parse_yaml, quote_clock_scalars, read_yaml, to_yaml_string, write_yaml,
};
