// Daemon mode: read PUTVAL lines on stdin, fan the samples out to the
// configured endpoints, and flush on a fixed cadence.
//
// THREADS AND I/O
//
// The main thread owns the registry and listens on a channel from which it
// reads events: samples (from the stdin reader thread), flush ticks (from
// the ticker thread), and signals (from the signal listener thread).  All
// endpoint work happens on the main thread.  SIGINT and SIGTERM exit after
// a final flush; SIGHUP forces an immediate unconditional flush.

use crate::broker::{self, rumqtt::RumqttConnector};
use crate::config;
use crate::endpoint::Endpoint;
use crate::registry::Registry;
use crate::sample::{self, Sample};

use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use signal_hook::consts::signal;
use signal_hook::iterator::Signals;

enum Operation {
    Sample(Sample),
    FlushTick,
    Signal(i32),
    Shutdown,
}

pub fn daemon_mode(config_file: &str) -> Result<(), String> {
    // The logger is installed even when the configuration is broken, so
    // that the failure is visible somewhere.
    let ini = match config::parse_config(config_file) {
        Ok(ini) => {
            install_logger(ini.debug.verbose);
            ini
        }
        Err(e) => {
            install_logger(false);
            let msg = format!("Configuration: {e}");
            log::error!("{msg}");
            return Err(msg);
        }
    };
    for e in &ini.errors {
        log::error!("Configuration: {e}");
    }
    if ini.endpoints.is_empty() {
        return Err("No usable endpoint configured".to_string());
    }

    let _lib = broker::ClientLibrary::init();

    let mut registry = Registry::new();
    for e in &ini.endpoints {
        registry.register(Arc::new(Endpoint::new(e, Box::new(RumqttConnector {}))))?;
    }

    let (event_sender, event_receiver) = channel::unbounded::<Operation>();

    let mut signals = Signals::new([signal::SIGINT, signal::SIGTERM, signal::SIGHUP])
        .map_err(|e| format!("Signal setup: {e}"))?;
    let signal_sender = event_sender.clone();
    thread::spawn(move || {
        for sig in signals.forever() {
            if signal_sender.send(Operation::Signal(sig)).is_err() {
                return;
            }
        }
    });

    let stdin_sender = event_sender.clone();
    thread::spawn(move || {
        for l in std::io::stdin().lock().lines() {
            let l = match l {
                Ok(l) => l,
                Err(e) => {
                    log::error!("Reading stdin: {e}");
                    break;
                }
            };
            if l.trim().is_empty() {
                continue;
            }
            match sample::parse_putval(&l) {
                Ok(s) => {
                    if stdin_sender.send(Operation::Sample(s)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    // A malformed line loses that sample only.
                    log::error!("Dropping input line: {e}");
                }
            }
        }
        let _ = stdin_sender.send(Operation::Shutdown);
    });

    let cadence = ini.global.flush_cadence.to_duration();
    let tick_sender = event_sender;
    thread::spawn(move || loop {
        thread::sleep(cadence);
        if tick_sender.send(Operation::FlushTick).is_err() {
            return;
        }
    });

    // Zero disables the staleness check: every tick flushes.
    let flush_timeout = match ini.global.flush_timeout {
        Some(d) => d.to_duration(),
        None => Duration::ZERO,
    };

    log::debug!("Daemon running with {} endpoint(s)", registry.len());
    loop {
        match event_receiver.recv() {
            Ok(Operation::Sample(s)) => {
                registry.write_all(&s);
            }
            Ok(Operation::FlushTick) => {
                let _ = registry.flush(flush_timeout, "");
            }
            Ok(Operation::Signal(signal::SIGHUP)) => {
                let _ = registry.flush(Duration::ZERO, "");
            }
            Ok(Operation::Signal(sig)) => {
                log::debug!("Received signal {sig}, exiting");
                break;
            }
            Ok(Operation::Shutdown) | Err(_) => {
                break;
            }
        }
    }

    registry.shutdown();
    Ok(())
}

fn install_logger(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();
}

// check-config mode: parse and validate, report, change nothing.
pub fn check_config(config_file: &str) -> Result<(), String> {
    let ini = config::parse_config(config_file)?;
    for e in &ini.errors {
        eprintln!("Configuration: {e}");
    }
    if ini.endpoints.is_empty() {
        return Err("No usable endpoint configured".to_string());
    }
    for e in &ini.endpoints {
        println!(
            "Endpoint {}: {}:{} topic {} qos {}{}{}",
            e.name,
            e.host,
            e.port,
            e.topic,
            e.qos,
            if e.ca_path.is_some() { " tls" } else { "" },
            if e.insecure { " insecure" } else { "" },
        );
    }
    Ok(())
}
