// Copyright (c) 2019 Julead Developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
#[macro_use]
extern crate log;

use clap::{App, Arg};
use julead::backend::{self, DataBackend};
use julead::conf::Configuration;
use julead::listener;
use julead::statistics::Statistics;
use julead::util;
use slog::{o, Drain};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

const DEFAULT_PORT: u16 = 4711;

fn main() { std::process::exit(run()); }

fn run() -> i32 {
    let matches = App::new("julead")
        .about("Storage daemon for a striped object store")
        .arg(
            Arg::with_name("daemon")
                .long("daemon")
                .help("Run as daemon"),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .takes_value(true)
                .value_name("N")
                .help("Port to use"),
        )
        .get_matches();

    let port = match matches.value_of("port") {
        Some(value) => match value.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                eprintln!("Invalid port '{}'.", value);
                return 1;
            },
        },
        None => DEFAULT_PORT,
    };

    // Detach before touching the logger or the socket, so everything the
    // daemon owns is created in the detached process.
    if matches.is_present("daemon") {
        if let Err(e) = util::daemonize() {
            eprintln!("Could not daemonize: {}.", e);
            return 1;
        }
    }

    let _log_guard = init_logging();

    let configuration = match Configuration::load() {
        Ok(configuration) => configuration,
        Err(e) => {
            error!("[julead] could not read configuration: {}", e);
            return 1;
        },
    };

    let backend = match backend::data_backend(&configuration.storage.backend, &configuration.storage.path) {
        Ok(backend) => backend,
        Err(e) => {
            error!("[julead] could not initialize storage backend: {}", e);
            return 1;
        },
    };
    let mut backend: Arc<dyn DataBackend> = Arc::from(backend);

    let statistics = Arc::new(Mutex::new(Statistics::new()));
    let shutdown = Arc::new(AtomicBool::new(false));

    for signal in &[signal_hook::SIGHUP, signal_hook::SIGINT, signal_hook::SIGTERM] {
        if let Err(e) = signal_hook::flag::register(*signal, shutdown.clone()) {
            error!("[julead] could not install signal handler: {}", e);
            return 1;
        }
    }

    let result = listener::run(
        port,
        backend.clone(),
        statistics,
        configuration.stripe_size,
        shutdown,
    );

    // Every worker has been joined by now, so the backend reference is ours
    // alone again and can be finalized.
    match Arc::get_mut(&mut backend) {
        Some(backend) => backend.fini(),
        None => warn!("[julead] backend still referenced at shutdown, skipping fini"),
    }

    match result {
        Ok(()) => {
            info!("[julead] shut down cleanly");
            0
        },
        Err(e) => {
            error!("[julead] listener failed: {}", e);
            1
        },
    }
}

fn init_logging() -> slog_scope::GlobalLoggerGuard {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!());

    let guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init().expect("the log bridge can only be installed once");
    guard
}
