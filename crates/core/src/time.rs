use chrono::{DateTime, Utc};

/// A simple clock abstraction for deterministic time in services and tests.
///
/// Services read time only through an injected `Clock`, so scheduling
/// decisions and the reminder wait loop can be driven from a fixed point
/// in tests.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Returns a clock that uses the current system time.
    #[must_use]
    pub fn default_clock() -> Self {
        Self::Default
    }

    /// Returns a clock fixed at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }
}

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples
/// (2024-01-01T10:00:00Z).
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_704_103_200, 0)
        .expect("fixed timestamp should be valid")
}
