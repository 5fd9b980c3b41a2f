pub mod bearer;
pub mod redaction;

pub use bearer::BearerToken;
pub use redaction::{RedactingWriter, redact_secrets};
