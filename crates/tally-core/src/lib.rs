pub mod counts;
pub mod error;
pub mod model;
pub mod month;
pub mod views;

pub use counts::{ClientType, CounterSet, Origin};
pub use error::{Result, TallyError};
pub use model::*;
pub use views::{MonthlyCounts, MountTotal, NamespaceTotal};
