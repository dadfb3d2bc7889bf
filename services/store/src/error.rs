use thiserror::Error;

/// Errors raised by the document store adapter
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(
        "Characteristics and translations must pair positionally: {characteristics} vs {translations}"
    )]
    MismatchedEnrichment {
        characteristics: usize,
        translations: usize,
    },
}
