//! SQLite feature databases to SENC cells, single or as a zipped chart set.

pub mod archive;
pub mod batch;
pub mod convert;

pub use archive::write_chart_set;
pub use convert::{convert_file, convert_to_writer, ConvertOptions, ConvertStats};
