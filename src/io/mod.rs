pub mod cursor;

pub use cursor::{write_u32, DviCursor};
