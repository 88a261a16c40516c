//! Operator console: line input, terminal output and routing of typed lines
//! to the channel.

mod dispatcher;
mod input;
mod terminal;

pub use dispatcher::{ConsoleDispatcher, ControlCommand, Dispatch, SETTLE_DELAY, USER_PROMPT};
pub use input::ConsoleInput;
pub use terminal::{CaptureTerminal, StdoutTerminal, Terminal};
