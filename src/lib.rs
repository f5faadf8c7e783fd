pub mod cli;
pub mod codec;
pub mod czi;
mod error;
pub mod hcs;
pub mod image;
pub mod logging;
pub mod metadata;
pub mod ozx;
pub mod validate;
pub mod viewer;
pub mod writer;

pub use zarrs;

pub use error::{Error, Result};
