// Query dispatch core (C10/C11/C12): admin statement recognition, SELECT
// parsing, plan construction, czar-side session orchestration, and the
// result merger that reassembles per-worker batches into one row stream.

pub mod admin;
pub mod merger;
pub mod parser;
pub mod planner;
pub mod session;

pub use admin::{recognize, AdminStatement, KillTarget};
pub use merger::{MergeLimits, ResultMerger};
pub use parser::{parse_select, OrderByColumn, SelectStatement};
pub use planner::{materialize_for_subchunk, plan, QueryPlan};
pub use session::{CatalogSecondaryIndex, QuerySession, SecondaryIndex, SessionResponse, TaskDispatcher};
