//! Error types re-exported from `inamon-error`

pub use inamon_error::{InamonError, Result};
