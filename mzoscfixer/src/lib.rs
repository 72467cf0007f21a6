mod args;
mod convert;
mod driver;
mod export;
mod store;

pub use args::*;
pub use convert::{convert_to_mzml, ConversionError};
pub use driver::{MZOscFixer, MZOscFixerError};
pub use export::{write_channels, write_channels_to_path};
pub use store::MzDataRunStore;
