//! Capture and replay glue between the widget and the provenance graph

pub mod buffer;
pub mod manager;
pub mod properties;
pub mod waiter;

pub use buffer::DialogBuffer;
pub use manager::{
    TrackingManager, CMD_ADD_COLUMN, CMD_ADD_RANKING, CMD_MOVE_COLUMN, CMD_SET_COLUMN,
    CMD_SET_GROUP_CRITERIA, CMD_SET_RANKING_SORT_CRITERIA, CMD_SET_SORT_CRITERIA,
};
pub use properties::{PropTarget, TRACKED_PROPERTIES};
pub use waiter::OrderWaiter;
