pub mod model;
pub mod recurrence;
pub mod time;

pub use time::Clock;
