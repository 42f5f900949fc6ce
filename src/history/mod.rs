//! Flat-file persistence
//!
//! Title history (live translation sessions) lives in per-title
//! directories; assistant turn history is a single bounded JSON file.
//! Both are plain files on purpose — the session store must stay readable
//! and repairable without tooling.

pub mod titles;
pub mod turns;
