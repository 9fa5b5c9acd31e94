use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Request {0} not found or already approved")]
    RequestNotActionable(i64),

    #[error("No roster members for course: {0}")]
    EmptyRoster(String),

    #[error("A pending request already exists for {submitter_email} in {course_name}")]
    DuplicateRequest {
        submitter_email: String,
        course_name: String,
    },

    #[error("VM name already in use: {0}")]
    ResourceConflict(String),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] labvm_provider::ProviderError),

    #[error("Fleet provisioning failed for all {0} roster members")]
    FleetProvisioningFailed(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
