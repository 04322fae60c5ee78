//! High-level command module for the interactive client.
//!
//! This module defines the [`Command`] enum, which encapsulates a single user command and
//! its arguments, and maps each one onto a request issued on a
//! [`Connection`](crate::Connection).
//!
//! # Overview
//! The supported commands are:
//!
//! - `ping`
//! - `select <space> <index> <offset> <limit> <iterator> [key..]`
//! - `insert <space> <field>..` and `replace <space> <field>..`
//! - `delete <space> <index> <key>..`
//! - `update <space> <index> <key> <op> <field> <value>`
//! - `call <function> [arg..]`
//! - `.exit`
//!
//! Arguments are parsed as `nil`, `true`/`false`, integers or floats where possible and
//! fall back to strings; surrounding quotes are stripped.
//!
//! # Example
//! ```rust
//! use iproto::{Command, Value};
//!
//! let cmd: Command = "select 512 0 0 1 0".try_into().unwrap();
//! assert_eq!(
//!     cmd,
//!     Command::Select {
//!         space: 512,
//!         index: 0,
//!         offset: 0,
//!         limit: 1,
//!         iterator: 0,
//!         key: vec![],
//!     }
//! );
//! ```
use thiserror::Error;

use crate::{Connection, Error, Response, Value};

/// List of possible error that a command can throw.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("failed to read input: {0}")]
    Input(String),

    #[error("no command provided")]
    Empty,
}

/// User supplied commands to run against a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Select {
        space: u32,
        index: u32,
        offset: u32,
        limit: u32,
        iterator: u32,
        key: Vec<Value>,
    },
    Insert {
        space: u32,
        tuple: Vec<Value>,
    },
    Replace {
        space: u32,
        tuple: Vec<Value>,
    },
    Delete {
        space: u32,
        index: u32,
        key: Vec<Value>,
    },
    Update {
        space: u32,
        index: u32,
        key: Vec<Value>,
        ops: Vec<Value>,
    },
    Call {
        function: String,
        args: Vec<Value>,
    },
    /// Close the connection and terminate the process.
    Exit,
}

impl Command {
    /// Runs the command on `conn`. [`Command::Exit`] closes the connection and yields
    /// no response.
    pub fn execute(self, conn: &Connection) -> Result<Option<Response>, Error> {
        let response = match self {
            Command::Ping => conn.ping()?,
            Command::Select {
                space,
                index,
                offset,
                limit,
                iterator,
                key,
            } => conn.select(space, index, offset, limit, iterator, key)?,
            Command::Insert { space, tuple } => conn.insert(space, tuple)?,
            Command::Replace { space, tuple } => conn.replace(space, tuple)?,
            Command::Delete { space, index, key } => conn.delete(space, index, key)?,
            Command::Update {
                space,
                index,
                key,
                ops,
            } => conn.update(space, index, key, ops)?,
            Command::Call { function, args } => conn.call(&function, args)?,
            Command::Exit => {
                conn.close();
                return Ok(None);
            }
        };
        Ok(Some(response))
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parts = value.split_whitespace().collect::<Vec<&str>>();
        let Some((&name, args)) = parts.split_first() else {
            return Err(CommandError::Empty);
        };

        match name.to_lowercase().as_str() {
            ".exit" => Ok(Command::Exit),
            "ping" => Ok(Command::Ping),
            "select" => {
                let [space, index, offset, limit, iterator] =
                    numbers(name, args, "space, index, offset, limit and iterator")?;
                Ok(Command::Select {
                    space,
                    index,
                    offset,
                    limit,
                    iterator,
                    key: values(&args[5..]),
                })
            }
            "insert" | "replace" => {
                let [space] = numbers(name, args, "a space")?;
                let tuple = values(&args[1..]);
                if tuple.is_empty() {
                    return Err(invalid(
                        name,
                        "requires at least one field. Example: insert 512 1 foo",
                    ));
                }
                if name.eq_ignore_ascii_case("insert") {
                    Ok(Command::Insert { space, tuple })
                } else {
                    Ok(Command::Replace { space, tuple })
                }
            }
            "delete" => {
                let [space, index] = numbers(name, args, "space and index")?;
                let key = values(&args[2..]);
                if key.is_empty() {
                    return Err(invalid(name, "requires a key. Example: delete 512 0 1"));
                }
                Ok(Command::Delete { space, index, key })
            }
            "update" => {
                let [space, index] = numbers(name, args, "space and index")?;
                let [key, op, field, value] = &args[2..] else {
                    return Err(invalid(
                        name,
                        "requires key, operator, field and value. Example: update 512 0 1 = 2 bar",
                    ));
                };
                Ok(Command::Update {
                    space,
                    index,
                    key: vec![parse_value(key)],
                    ops: vec![Value::Array(vec![
                        Value::from(*op),
                        parse_value(field),
                        parse_value(value),
                    ])],
                })
            }
            "call" => {
                let Some((function, rest)) = args.split_first() else {
                    return Err(invalid(name, "requires a function name. Example: call box.info"));
                };
                Ok(Command::Call {
                    function: function.to_string(),
                    args: values(rest),
                })
            }
            _ => Err(CommandError::UnrecognizedCommand(value.trim().to_string())),
        }
    }
}

fn invalid(command: &str, reason: &str) -> CommandError {
    CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses the first `N` arguments as non-negative integers.
fn numbers<const N: usize>(
    command: &str,
    args: &[&str],
    what: &str,
) -> Result<[u32; N], CommandError> {
    if args.len() < N {
        return Err(invalid(command, &format!("requires {what}")));
    }

    let mut out = [0u32; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.parse::<u32>().map_err(|_| {
            invalid(
                command,
                &format!("'{arg}' should be a non-negative number."),
            )
        })?;
    }
    Ok(out)
}

fn values(args: &[&str]) -> Vec<Value> {
    args.iter().map(|arg| parse_value(arg)).collect()
}

fn parse_value(arg: &str) -> Value {
    match arg {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        s => {
            if let Ok(v) = s.parse::<u64>() {
                Value::UInt(v)
            } else if let Ok(v) = s.parse::<i64>() {
                Value::Int(v)
            } else if let Ok(v) = s.parse::<f64>() {
                Value::F64(v)
            } else {
                Value::from(s.trim_matches(|c| c == '"' || c == '\''))
            }
        }
    }
}
