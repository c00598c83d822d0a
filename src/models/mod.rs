pub mod common;
pub mod conflict;
pub mod import;
pub mod sync;
