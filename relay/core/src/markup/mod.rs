//! Reply Markup
//!
//! Turns a finished model reply into display-ready pages of the Telegram
//! HTML dialect. [`Transcoder`] does the conversion, [`paginate`] the
//! splitting. Both are pure functions of their input.

mod escape;
mod paginate;
mod transcode;

pub use escape::{escape_raw, escape_text};
pub use paginate::{paginate, DEFAULT_PAGE_LIMIT};
pub use transcode::Transcoder;
