//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Crowmap.
//
// Crowmap is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published by  the Free
// Software Foundation, either version  3 of the License, or (at  your option)
// any later version.
//
// Crowmap is distributed in the hope  that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crowmap. If not, see <http://www.gnu.org/licenses/>.

//! The `crowmap` CLI: bridge the in-memory emulator to real TCP sockets so
//! actual mail clients can be pointed at it during manual testing. The
//! library API is the primary interface; this is a convenience.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;

use log::{error, info};
use structopt::StructOpt;

use crowmap::config::Config;
use crowmap::server::Server;
use crowmap::transport::SocketEvent;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Serve the emulator over TCP.
    Serve(ServeOptions),
}

#[derive(StructOpt)]
struct ServeOptions {
    /// Address to listen on.
    #[structopt(short, long, default_value = "127.0.0.1:1143")]
    listen: String,

    /// TOML configuration file with users, capabilities, and seed
    /// mailboxes. Without it, the default test account and an empty INBOX
    /// are used.
    #[structopt(parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log at debug level instead of info.
    #[structopt(short, long)]
    verbose: bool,
}

fn main() {
    let command = Command::from_args();
    match command {
        Command::Serve(options) => {
            if let Err(e) = serve(options) {
                error!("Fatal: {}", e);
                process::exit(1);
            }
        },
    }
}

fn init_logging(verbose: bool) {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};

    let stderr = ConsoleAppender::builder().target(Target::Stderr).build();
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .expect("Failed to build logging config");
    log4rs::init_config(config).expect("Failed to initialise logging");
}

fn serve(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(options.verbose);

    let config = match options.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    let server = Server::new(config);

    let listener = TcpListener::bind(&options.listen)?;
    info!("Listening on {}", options.listen);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!("Accept failed: {}", e);
                continue;
            },
        };
        let server = Arc::clone(&server);
        thread::spawn(move || {
            if let Err(e) = bridge(&server, stream) {
                info!("Client connection ended: {}", e);
            }
        });
    }

    Ok(())
}

/// Pump octets between one TCP stream and one emulator session.
fn bridge(server: &Arc<Server>, stream: TcpStream) -> std::io::Result<()> {
    let socket = server.connect();
    let events = socket.events().clone();
    let mut write_half = stream.try_clone()?;

    let writer = thread::spawn(move || -> std::io::Result<()> {
        for event in events.iter() {
            match event {
                SocketEvent::Data(data) => {
                    write_half.write_all(&data)?;
                    write_half.flush()?;
                },
                SocketEvent::Close => break,
                SocketEvent::Open => (),
            }
        }
        Ok(())
    });

    let mut read_half = &stream;
    let mut buffer = [0u8; 4096];
    loop {
        let n = read_half.read(&mut buffer)?;
        if 0 == n {
            break;
        }
        socket.send(&buffer[..n]);
    }

    socket.close();
    let _ = writer.join();
    Ok(())
}
