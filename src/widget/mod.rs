//! In-crate model of the tracked ranking-table widget
//!
//! The tracking engine consumes this surface as a black box: named change
//! events, command methods and the order staleness/settled signal pair.

pub mod column;
pub mod events;
pub mod filter;
pub mod provider;
pub mod ranking;

pub use column::{Column, ColumnDump, ColumnError, ColumnKind};
pub use events::{EventArgs, EventEmitter, EventHandler};
pub use filter::{ColumnFilter, FilterError, FilterValue};
pub use provider::DataProvider;
pub use ranking::{Ranking, RankingDump, SortCriterion, SortDesc};
