//! The pilot daemon and its client.
//!
//! The daemon keeps a single pooled browser instance around, runs automation tasks against it
//! and exposes a small administrative socket, which is used by the `pilot` client.

pub(crate) mod internal_prelude {
    #[allow(unused_imports)]
    pub(crate) use tracing::{debug, error, info, trace, warn};

    pub(crate) use crate::errors::*;
}

pub(crate) mod errors {
    #[allow(unused_imports)]
    pub use color_eyre::eyre::{bail, eyre, WrapErr};
    pub use color_eyre::Result;
}

pub mod client;
pub mod daemon;
pub(crate) mod process_helper;
pub mod tracing;
