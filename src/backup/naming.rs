// dbdump/src/backup/naming.rs
use chrono::{DateTime, Utc};

/// Suffix shared by every artifact; listings ignore anything else.
pub const ARTIFACT_SUFFIX: &str = ".sql.gz";

/// Zero-padded, most-significant-first, so lexical order is time order.
const NAME_FORMAT: &str = "%Y-%m-%d %H_%M_%S";

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Derives time-ordered artifact names at second granularity.
pub struct ArtifactNamer {
    clock: Clock,
}

impl ArtifactNamer {
    pub fn system() -> Self {
        Self::with_clock(Utc::now)
    }

    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            clock: Box::new(clock),
        }
    }

    pub fn next_name(&self) -> String {
        artifact_name((self.clock)())
    }
}

pub fn artifact_name(at: DateTime<Utc>) -> String {
    format!("{}{}", at.format(NAME_FORMAT), ARTIFACT_SUFFIX)
}

pub fn is_artifact_name(name: &str) -> bool {
    name.len() > ARTIFACT_SUFFIX.len() && name.ends_with(ARTIFACT_SUFFIX)
}
