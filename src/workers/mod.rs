pub mod args;
pub mod console;
pub mod node;
