pub mod error;
pub mod guard;
pub mod memory;
pub mod pg;
pub mod traits;
pub mod update;

pub use error::StoreError;
pub use guard::{Classification, IdempotencyGuard};
pub use memory::{MemoryCooldownCache, MemoryNotificationStore, MemoryUserDirectory, MemoryVerificationStore};
pub use pg::{PgCooldownCache, PgNotificationStore, PgUserDirectory, PgVerificationStore};
pub use traits::{CooldownCache, NotificationStore, UserDirectory, UserProfile, VerificationStore};
pub use update::{ApplyOutcome, FieldSet, Guard, StatusWrite, VerificationUpdate};

/// Run the SQL migrations shared by the store and the Postgres broker.
pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
