pub mod console;
pub mod instance;

pub use console::ConsoleAccess;
pub use instance::{Address, Instance, InstanceStatus};
