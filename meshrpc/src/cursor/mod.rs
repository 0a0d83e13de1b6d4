pub mod cursor;
pub mod sequence;
