//! Small helpers shared by the extensions and the pipeline.
//!
//! - **URL handling**: normalization and SSRF-minded validation of feed urls
//! - **Text processing**: width-aware truncation, control character and
//!   HTML stripping

mod text;
mod url_validator;

pub use text::{html_to_text, strip_control_chars, truncate_to_width};
pub use url_validator::{normalize_url, validate_url, UrlValidationError};
