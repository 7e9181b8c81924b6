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
use crate::backend::DataBackend;
use crate::engine::Engine;
use crate::errors::CreationError;
use crate::statistics::Statistics;
use net2::TcpBuilder;
use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_BACKLOG: i32 = 128;
const ACCEPT_POLL_INTERVAL_MS: u64 = 50;

/// Accepts connections and runs one engine worker per client until
/// `shutdown` is raised.
///
/// Raising `shutdown` stops the accept loop; running workers are left to
/// drain their in-flight connections and are joined before this returns.
pub fn run(
    port: u16,
    backend: Arc<dyn DataBackend>,
    statistics: Arc<Mutex<Statistics>>,
    stripe_size: u64,
    shutdown: Arc<AtomicBool>,
) -> Result<(), CreationError> {
    let listener = get_listener(port)?;

    // Non-blocking accept, so the loop can notice a shutdown request even
    // when no client ever connects.
    listener.set_nonblocking(true)?;

    info!("[listener] accepting connections on port {}", port);

    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!("[listener] client connected from {}", addr);

                // The worker blocks on socket reads; hand it a blocking fd.
                if let Err(e) = stream.set_nonblocking(false) {
                    error!("[listener] could not configure client socket: {}", e);
                    continue;
                }

                let backend = backend.clone();
                let statistics = statistics.clone();

                let worker = thread::Builder::new()
                    .name(format!("julead-worker-{}", addr))
                    .spawn(move || match Engine::new(stream, backend, statistics, stripe_size) {
                        Ok(engine) => engine.run(),
                        Err(e) => error!("[listener] failed to set up connection: {}", e),
                    })
                    .map_err(CreationError::ListenerFailed)?;

                workers.push(worker);

                // Keep the bookkeeping bounded on long-lived daemons.
                workers.retain(|worker| !worker.is_finished());
            },
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(ACCEPT_POLL_INTERVAL_MS));
            },
            Err(e) => {
                error!("[listener] error accepting connection: {}", e);
                thread::sleep(Duration::from_millis(ACCEPT_POLL_INTERVAL_MS));
            },
        }
    }

    info!("[listener] shutting down, waiting for workers to drain");

    for worker in workers {
        let _ = worker.join();
    }

    Ok(())
}

fn get_listener(port: u16) -> Result<TcpListener, CreationError> {
    let builder = TcpBuilder::new_v4()?;
    configure_builder(&builder)?;
    builder.reuse_address(true)?;
    builder.bind(("0.0.0.0", port))?;
    let listener = builder.listen(ACCEPT_BACKLOG)?;
    Ok(listener)
}

#[cfg(unix)]
fn configure_builder(builder: &TcpBuilder) -> io::Result<()> {
    use net2::unix::*;

    builder.reuse_port(true)?;
    Ok(())
}

#[cfg(windows)]
fn configure_builder(_builder: &TcpBuilder) -> io::Result<()> { Ok(()) }
