pub mod change;
pub mod ltv;

pub use change::{compute_change, default_change_dates, ChangeReport, GroupChange, Weighting};
pub use ltv::{compute_ltv, CohortWindowSet, LtvRow, LtvSeries};
