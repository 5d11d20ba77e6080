//! CLI commands implementation

pub mod documents;
pub mod init;
pub mod materials;
pub mod status;

pub use documents::*;
pub use init::*;
pub use materials::*;
pub use status::*;
