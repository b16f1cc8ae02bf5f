// raprs - APRS over KISS
//
// Copyright (C) 2025 Kris Kirby
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
// raprs main source
//
// This file is part of raprs.
//
// raprs is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// raprs is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with raprs.  If not, see <https://www.gnu.org/licenses/>.
//
// Connects to a KISS TNC over TCP (Direwolf, soundmodem) or a serial
// port, prints every APRS packet heard and lets the operator send
// messages, position beacons and raw packets from the keyboard.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;

use clap::Parser;
use log::{error, info};

use raprs::config::{Cli, Config};
use raprs::console::{self, Command, Flow, Operator};
use raprs::link::{self, LinkController, LinkEvent};
use raprs::logging;
use raprs::session::SessionState;

fn print_banner(config: &Config, config_path: Option<&PathBuf>) {
    println!("raprs - APRS over KISS");
    println!("======================");
    match config_path {
        Some(path) => println!("Configuration from: {}", path.display()),
        None => println!("Configuration: defaults (no config file found)"),
    }
    println!("  Station: {} > {}", config.callsign, config.tocall);
    if !config.path.is_empty() {
        println!("  Path: {}", config.path.join(","));
    }
    match config.serial_port {
        Some(ref device) => println!("  TNC: serial {} @ {} baud", device, config.baud_rate),
        None => println!("  TNC: tcp {}:{}", config.host, config.port),
    }
    println!("  Message ACK ids: {}", if config.ack_enabled { "ON" } else { "OFF" });
    println!("  Log level: {}", config.log_level);
    if let Some(ref lf) = config.logfile {
        println!("  Log file: {}", lf);
    }
    println!("Type ? for help.");
    println!();
}

fn print_events(events: Receiver<LinkEvent>) {
    for event in events {
        match event {
            LinkEvent::Packet(packet) => println!("{}", packet),
            LinkEvent::Closed(reason) => {
                match reason {
                    Some(e) => error!("Link to TNC lost: {}", e),
                    None => error!("TNC closed the connection"),
                }
                println!("Link to TNC lost, exiting.");
                std::process::exit(1);
            }
        }
    }
}

fn operator_loop(operator: &mut Operator) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        match console::parse_command(&line) {
            Ok(Some(command)) => {
                if operator.execute(command, &mut stdout)? == Flow::Quit {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(message) => writeln!(stdout, "{}", message)?,
        }
        stdout.flush()?;
    }
    // stdin closed without q
    operator.execute(Command::Quit, &mut stdout)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    ctrlc::set_handler(move || {
        println!("\nReceived SIGINT, shutting down...");
        std::process::exit(0);
    })?;

    let cli = Cli::parse();
    let (mut config, mut config_path) = Config::load(&cli)?;
    config.apply_cli_overrides(&cli);

    logging::init(config.logfile.as_deref(), config.log_level, config.log_to_console)?;

    if config_path.is_none() && config.callsign.is_empty() {
        config = console::first_run_setup(&mut io::stdin().lock(), &mut io::stdout(), config)?;
        let path = Config::default_save_path(None);
        config.save(&path)?;
        info!("Saved first-run configuration to {}", path.display());
        println!("Saved {}", path.display());
        config_path = Some(path);
    }

    if !config.quiet_startup {
        print_banner(&config, config_path.as_ref());
    }

    let station = config.station()?;
    let session = Arc::new(Mutex::new(SessionState::new(config.ack_enabled)));

    let transport = match config.serial_port {
        Some(ref device) => link::open_serial(device, config.baud_rate)?,
        None => link::connect_tcp(&config.host, config.port)?,
    };

    let (mut controller, events) = LinkController::new(transport, station, session);
    controller.start()?;
    info!("raprs starting as {}", controller.station().callsign);

    thread::Builder::new()
        .name("event-printer".to_string())
        .spawn(move || print_events(events))?;

    let save_path = Config::default_save_path(config_path.as_deref());
    let mut operator = Operator::new(controller, config, save_path);
    operator_loop(&mut operator)?;

    info!("raprs exiting");
    Ok(())
}
