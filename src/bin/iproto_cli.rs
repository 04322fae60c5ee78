use std::{error::Error, io, time::Duration};

use clap::Parser;
use iproto::*;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address, e.g. 127.0.0.1:3301
    address: String,
    /// Per-request timeout in milliseconds; 0 waits indefinitely
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,
    /// Frames that may queue for the writer before requests block
    #[arg(long, default_value_t = 512)]
    queue: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let options = Options::default()
        .with_timeout(Duration::from_millis(cli.timeout_ms))
        .with_queue_capacity(cli.queue);
    let conn = Connection::connect(cli.address.as_str(), options)?;
    if let Some(greeting) = conn.greeting() {
        println!("{}", greeting.version);
    }

    let handle = conn.clone();
    ctrlc::set_handler(move || {
        handle.close();
        std::process::exit(130);
    })?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    loop {
        let cmd = match prompt(stdin.lock(), stdout.lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };
        let exit = cmd == Command::Exit;

        match cmd.execute(&conn) {
            Ok(Some(response)) => print_response(stdout.lock(), &response)?,
            Ok(None) => {}
            Err(e) => eprintln!("request error: {e}"),
        }
        if exit {
            break;
        }
    }

    Ok(())
}
