pub mod bitmap;
pub mod font;
pub mod interpreter;
pub mod rescale;
