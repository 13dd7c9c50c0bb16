//! Per-address rate limiting and banning.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Security Module                           │
//! ├─────────────┬──────────────┬─────────────┬───────────────────────┤
//! │ VisitGuard  │ AddressTrie  │  Sweeper    │ BanList / CountryMask │
//! │ record/ban  │ 4-level i8   │ decay tick  │ gzip 4-byte records   │
//! │ one Mutex   │ lazy arrays  │ reclaim     │ sorted CIDR ranges    │
//! └─────────────┴──────────────┴─────────────┴───────────────────────┘
//! ```

pub mod address;
pub mod ban_list;
pub mod cell;
pub mod country_mask;
pub mod guard;
pub mod sweeper;
pub mod trie;

// Re-export primary types for convenience
pub use cell::{BanDuration, CellState, PERMANENT_BAN};
pub use country_mask::CountryMaskIndex;
pub use guard::{
    DeleteOutcome, Enumeration, EnumerationMode, GuardSettings, VisitGuard, VisitOutcome,
};
pub use sweeper::run_sweeper;
pub use trie::{AddressTrie, SweepStats};
