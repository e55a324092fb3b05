//! Example: echo server and client driven by one reactor
//!
//! ```text
//! cargo run --example cli -- server 7000
//! cargo run --example cli -- client 127.0.0.1:7000
//! ```

use sockloop::net::ANY_ADDRESS;
use sockloop::Reactor;

use std::cell::Cell;
use std::env;
use std::process::ExitCode;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

const GREETING: &[u8] = b"test";
const TICK: Duration = Duration::from_millis(10);

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        let executable = args.first().map_or("cli", String::as_str);
        println!("Usage: {executable} [server|client] [port|address]");
        return ExitCode::SUCCESS;
    }

    let result = match args[1].as_str() {
        "server" => match args[2].parse() {
            Ok(port) => server(port),
            Err(e) => {
                eprintln!("Invalid port {}: {e}", args[2]);
                return ExitCode::FAILURE;
            }
        },
        "client" => client(&args[2]),
        other => {
            eprintln!("Unknown mode {other}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

// Greets every client, echoes what it sends and forgets it once it leaves.
fn server(port: u16) -> Result<(), sockloop::Error> {
    let mut reactor = Reactor::new()?;
    let listener = reactor.create();

    if let Some(connection) = reactor.connection_mut(listener) {
        connection.set_accept_callback(|reactor, _, client| {
            println!("Client connected");

            let Some(connection) = reactor.connection_mut(client) else {
                return;
            };

            connection.set_read_callback(|reactor, id, bytes| {
                println!("Got data: {}", String::from_utf8_lossy(bytes));
                let _ = reactor.send(id, bytes);
            });
            connection.set_close_callback(|reactor, id| {
                if let Some(connection) = reactor.connection(id) {
                    println!("Client {id} disconnected");
                    if let Some(error) = connection.last_error() {
                        println!("  reason: {error}");
                    }
                }
                let _ = reactor.destroy(id);
            });

            let _ = connection.start_read();
            let _ = connection.send(GREETING);
        });
    }

    reactor.start_accept(listener, ANY_ADDRESS, port)?;
    println!("Listening on port {port}");

    run(&mut reactor, |_| {})
}

// Sends a greeting once connected and reconnects after every failure.
fn client(address: &str) -> Result<(), sockloop::Error> {
    let mut reactor = Reactor::builder()
        .connect_timeout(Duration::from_secs(2))
        .build()?;
    let id = reactor.create();

    let retry = Rc::new(Cell::new(false));

    if let Some(connection) = reactor.connection_mut(id) {
        connection.set_read_callback(|reactor, id, bytes| {
            let from = reactor
                .connection(id)
                .map(|connection| connection.remote_address());
            println!("Got data: {} from {from:?}", String::from_utf8_lossy(bytes));
        });

        connection.set_connect_callback(|reactor, id| {
            if let Some(connection) = reactor.connection(id) {
                println!("Connected to {}", connection.remote_address());
            }
            let _ = reactor.send(id, GREETING);
        });

        let retry = retry.clone();
        connection.set_connect_error_callback(move |reactor, id| {
            if let Some(error) = reactor.connection(id).and_then(|c| c.last_error()) {
                println!("Failed to connect: {error}");
            }
            retry.set(true);
        });

        connection.set_close_callback(|_, id| println!("Connection {id} closed"));
    }

    if reactor.connect_host(id, address).is_err() {
        retry.set(true);
    }

    run(&mut reactor, |reactor| {
        if retry.replace(false) && reactor.connect_host(id, address).is_err() {
            retry.set(true);
        }
    })
}

fn run(
    reactor: &mut Reactor,
    mut between: impl FnMut(&mut Reactor),
) -> Result<(), sockloop::Error> {
    loop {
        reactor.tick()?;
        between(reactor);

        thread::sleep(TICK);
    }
}
