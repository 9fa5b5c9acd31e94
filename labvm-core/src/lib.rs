pub mod credentials;
pub mod error;
pub mod names;

// Re-export the derivation entry points for convenience
pub use credentials::{derive, generate_password, identity_token, DerivedIdentity};
pub use error::{CoreError, Result};
pub use names::{host_name, sanitize};
