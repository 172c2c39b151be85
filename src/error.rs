use std::fmt;

use rusqlite::{ErrorCode, ffi};
use thiserror::Error;
use tracing::warn;

/// Which kind of relational rule a write broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Unique,
    NotNull,
    ForeignKey,
    Check,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Constraint::Unique => "unique",
            Constraint::NotNull => "not null",
            Constraint::ForeignKey => "foreign key",
            Constraint::Check => "check",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness, required-field or referential rule was broken.
    /// Never retried; callers see it as-is.
    #[error("constraint violation ({constraint}): {detail}")]
    ConstraintViolation {
        constraint: Constraint,
        detail: String,
    },

    #[error("{entity} #{id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("storage error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Every violation, whether caught by a store check or raised by SQLite,
    /// is built here and logged once.
    pub fn violation(constraint: Constraint, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        warn!(%constraint, %detail, "constraint violation");
        Self::ConstraintViolation { constraint, detail }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// The violated constraint, if this is a `ConstraintViolation`.
    pub fn constraint(&self) -> Option<Constraint> {
        match self {
            Self::ConstraintViolation { constraint, .. } => Some(*constraint),
            _ => None,
        }
    }
}

// SQLite reports every integrity failure as SQLITE_CONSTRAINT; the extended
// code tells us which rule fired.
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
                let constraint = match e.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        Constraint::Unique
                    }
                    ffi::SQLITE_CONSTRAINT_NOTNULL => Constraint::NotNull,
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Constraint::ForeignKey,
                    _ => Constraint::Check,
                };
                Self::violation(constraint, msg.unwrap_or_else(|| e.to_string()))
            }
            other => Self::Sqlite(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown application status '{0}'")]
pub struct UnknownStatus(pub String);

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings(f: impl FnOnce()) -> usize {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(count.clone()));
        tracing::subscriber::with_default(subscriber, f);
        count.load(Ordering::SeqCst)
    }

    #[test]
    fn test_sqlite_constraint_failures_are_logged() {
        let warnings = count_warnings(|| {
            let raw = rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
                Some("FOREIGN KEY constraint failed".to_string()),
            );
            let err = StoreError::from(raw);
            assert_eq!(err.constraint(), Some(Constraint::ForeignKey));
        });
        assert_eq!(warnings, 1);
    }

    #[test]
    fn test_store_violations_are_logged_and_other_errors_are_not() {
        let warnings = count_warnings(|| {
            StoreError::violation(Constraint::Unique, "users.email 'a@x.com' already exists");
            StoreError::from(rusqlite::Error::QueryReturnedNoRows);
            StoreError::not_found("user", 1);
        });
        assert_eq!(warnings, 1);
    }

    #[test]
    fn test_non_constraint_errors_pass_through() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows)));
        assert_eq!(err.constraint(), None);
    }

    #[test]
    fn test_violation_message() {
        let err = StoreError::violation(Constraint::Unique, "users.email 'a@x.com' already exists");
        assert_eq!(
            err.to_string(),
            "constraint violation (unique): users.email 'a@x.com' already exists"
        );
        assert_eq!(err.constraint(), Some(Constraint::Unique));
    }
}
