pub mod dvi;
pub mod error;
pub mod io;
pub mod player;

pub use dvi::document::Document;
pub use error::DviError;
pub use player::bitmap::Bitmap;
pub use player::font::{FontManager, FontSource};
pub use player::interpreter::{PageEvent, PageEvents, PageSink};
