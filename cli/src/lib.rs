//! Console front end for the runtime sandbox.

pub mod commands;
pub mod console;
pub mod render;

pub use commands::ConsoleCommand;
pub use commands::RunRequest;
pub use commands::UsageError;
pub use console::ConsoleController;
pub use console::ConsoleOutput;
pub use console::spawn_printer;
