//! Async plumbing that doesn't belong to any one folio crate.

mod channel;
mod tee;
mod until_err;

pub use crate::channel::ChannelWriter;
pub use crate::tee::{Branch, Tee};
pub use crate::until_err::{TakeUntilErr, TakeUntilErrExt};
