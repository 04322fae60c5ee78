pub mod cli;
pub mod command;
pub mod connection;
pub mod protocol;

pub use cli::{print_response, prompt};
pub use command::Command;
pub use connection::{Connection, Options};
pub use protocol::{Error, Request, RequestCode, Response, ResponseFuture, Value};
