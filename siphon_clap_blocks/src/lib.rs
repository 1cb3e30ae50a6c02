//! Building blocks for [`clap`]-driven configs.
//!
//! They can easily be re-used using `#[clap(flatten)]`.

pub mod kafka;
pub mod routing;
pub mod write;
