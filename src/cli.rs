//! CLI utilities for the interactive client.
//!
//! The utilities present in this module can be used to build a REPL on top of a
//! [`Connection`](crate::Connection).
use std::io::{BufRead, Write};

use crate::{Command, Response, command::CommandError};

/// Prompt user for a valid command.
///
/// End of input is treated as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(|e| CommandError::Input(e.to_string()))?;
    writer
        .flush()
        .map_err(|e| CommandError::Input(e.to_string()))?;

    let read = reader
        .read_line(&mut s)
        .map_err(|e| CommandError::Input(e.to_string()))?;
    if read == 0 {
        return Ok(Command::Exit);
    }

    s.as_str().try_into()
}

/// Writes one line per returned tuple.
pub fn print_response<W: Write>(mut writer: W, response: &Response) -> std::io::Result<()> {
    for tuple in &response.data {
        writeln!(writer, "{tuple}")?;
    }
    writeln!(writer, "({} tuples)", response.data.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_commands() {
        let input = b"ping\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::Ping, res);
    }

    #[test]
    fn prompt_end_of_input_exits() {
        let mut output = Vec::new();

        let res = prompt(&b""[..], &mut output).unwrap();
        assert_eq!(Command::Exit, res);
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output)
            .map_err(|e| e.to_string())
            .unwrap();
    }

    #[test]
    fn print_tuples() {
        let response = Response::new(
            1,
            vec![
                Value::from(vec![Value::UInt(1), Value::from("a")]),
                Value::from(vec![Value::UInt(2), Value::from("b")]),
            ],
        );
        let mut output = Vec::new();

        print_response(&mut output, &response).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "[1, \"a\"]\n[2, \"b\"]\n(2 tuples)\n"
        );
    }
}
