mod binary;
mod constants;
mod control;
mod mem;

pub use self::{binary::*, constants::*, control::*, mem::*};
