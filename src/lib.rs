pub mod cartridge;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod import_course;
pub mod markup;
pub mod model;
pub mod quiztext;
pub mod registry;
pub mod remote;
pub mod rubric;
pub mod source;
pub mod suggest;
pub mod sync;

pub use cli::{run, Cli, Commands};
