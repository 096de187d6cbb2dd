//! Error handling foundation.
//!
//! Only the `Result` alias lives here. Each crate defines its own error enum
//! and wraps it in a rootcause `Report` as errors propagate.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
