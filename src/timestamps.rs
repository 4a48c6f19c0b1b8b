use serde::Serialize;
use time::OffsetDateTime;

/// Capability shared by every persisted entity that tracks creation and
/// last-modification times.
pub trait Timestamped {
    fn created_at(&self) -> OffsetDateTime;
    fn updated_at(&self) -> OffsetDateTime;
}

/// Response fragment flattened into every entity payload.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Timestamps {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Timestamps {
    pub fn of<T: Timestamped>(entity: &T) -> Self {
        Self {
            created_at: entity.created_at(),
            updated_at: entity.updated_at(),
        }
    }
}
