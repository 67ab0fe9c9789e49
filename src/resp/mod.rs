mod postponed;
mod reader;
mod value;

pub use postponed::PostponedArray;
pub use reader::RespReader;
pub use value::{format_score, RespValue};
