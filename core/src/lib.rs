pub mod action;
pub mod config;
pub mod lifecycle;
pub mod str_interp;
pub mod style;
pub mod testing;

pub mod error {
    #[allow(unused_imports)]
    pub(crate) use anyhow::{anyhow, bail, ensure, Context as _};
    pub use anyhow::{Error, Result};
}

pub use crate::config::Config;
