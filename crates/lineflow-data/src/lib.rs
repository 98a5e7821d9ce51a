pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, LoadedLine, build_line, load_line, load_line_from_dir};
