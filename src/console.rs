// raprs - Operator Console Module
// One-line keyboard commands and their execution against the link

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use log::info;

use crate::config::{self, split_path, Config};
use crate::link::{lock_session, LinkController};

pub const QSL_QUERY: &str = "QSL? 73";
pub const QSL_CONFIRM: &str = "QSL! 73";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Message { addressee: String, text: String },
    Position { comment: Option<String> },
    Raw(String),
    RepeatMessage,
    RepeatRaw,
    ToggleAck,
    /// `1` / `2`: canned "QSL? 73" / "QSL! 73" messages
    Quick { addressee: String, text: &'static str },
    /// `h` lists everyone, `h <call>` looks up one station
    Heard(Option<String>),
    ClearHeard,
    Show,
    Set { key: String, value: String },
    Save,
    Help,
    Quit,
}

fn required<'a>(arg: Option<&'a str>, usage: &str) -> Result<&'a str, String> {
    match arg.map(str::trim) {
        Some(arg) if !arg.is_empty() => Ok(arg),
        _ => Err(format!("usage: {}", usage)),
    }
}

/// Splits `word rest` on the first run of whitespace
fn split_word(line: &str) -> (&str, Option<&str>) {
    match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, Some(rest.trim_start())),
        None => (line, None),
    }
}

/// Parses one console line. Blank lines give `Ok(None)`; unknown or
/// incomplete commands give a message for the operator.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = split_word(line);

    let command = match word.to_lowercase().as_str() {
        "m" => {
            let (addressee, text) = split_word(required(rest, "m <call> <text>")?);
            let text = required(text, "m <call> <text>")?;
            Command::Message {
                addressee: addressee.to_string(),
                text: text.to_string(),
            }
        }
        "p" => Command::Position {
            comment: rest.filter(|c| !c.trim().is_empty()).map(|c| c.trim().to_string()),
        },
        "d" => Command::Raw(required(rest, "d <text>")?.to_string()),
        "r" => Command::RepeatMessage,
        "t" => Command::RepeatRaw,
        "a" => Command::ToggleAck,
        "1" => Command::Quick {
            addressee: required(rest, "1 <call>")?.to_string(),
            text: QSL_QUERY,
        },
        "2" => Command::Quick {
            addressee: required(rest, "2 <call>")?.to_string(),
            text: QSL_CONFIRM,
        },
        "h" => Command::Heard(
            rest.map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        ),
        "hc" => Command::ClearHeard,
        "s" => Command::Show,
        "set" => {
            let (key, value) = split_word(required(rest, "set <key> <value>")?);
            let value = required(value, "set <key> <value>")?;
            Command::Set {
                key: key.to_lowercase(),
                value: value.to_string(),
            }
        }
        "w" => Command::Save,
        "?" | "help" => Command::Help,
        "q" | "quit" => Command::Quit,
        other => return Err(format!("unknown command '{}', type ? for help", other)),
    };
    Ok(Some(command))
}

pub fn help_text() -> &'static str {
    "Commands:
  m <call> <text>    send a message
  p [comment]        send a position beacon
  d <text>           send raw text as the information field
  r                  repeat last message (same id)
  t                  repeat last raw packet
  a                  toggle message ACK ids
  1 <call>           send \"QSL? 73\"
  2 <call>           send \"QSL! 73\"
  h [call]           list heard stations, or when <call> was heard
  hc                 clear heard stations
  s                  show station settings
  set <key> <value>  change callsign, tocall, path, latitude, longitude,
                     symbol_table, symbol_code, pos_comment or ack_enabled
  w                  save settings to the config file
  ?                  this help
  q                  save settings and quit"
}

fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> io::Result<String> {
    write!(out, "{}", prompt)?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Asks for a degree magnitude and a hemisphere letter; `negative` is the
/// letter that makes the value negative (S or W)
fn ask_coordinate<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    axis: &str,
    positive: char,
    negative: char,
) -> io::Result<f64> {
    let degrees = ask(input, out, &format!("{} degrees (decimal): ", axis))?;
    let degrees = degrees.parse::<f64>().map(f64::abs).unwrap_or(0.0);
    let hemisphere = ask(
        input,
        out,
        &format!("{} direction ({}/{}) [{}]: ", axis, positive, negative, positive),
    )?;
    if hemisphere.eq_ignore_ascii_case(&negative.to_string()) {
        Ok(-degrees)
    } else {
        Ok(degrees)
    }
}

/// Interactive station setup for a first run with no config file. Blank
/// answers keep the value already in `config`; unparsable coordinates
/// become 0.
pub fn first_run_setup<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    mut config: Config,
) -> io::Result<Config> {
    writeln!(out, "No configuration found, setting up the station.")?;

    let callsign = ask(input, out, "Enter your callsign (e.g. IK2ABC-7): ")?;
    if !callsign.is_empty() {
        config.callsign = callsign.to_uppercase();
    }
    let tocall = ask(input, out, &format!("Software id (tocall, default {}): ", config.tocall))?;
    if !tocall.is_empty() {
        config.tocall = tocall.to_uppercase();
    }
    let path = ask(input, out, "Digipeater path (comma separated, blank for none): ")?;
    config.path = split_path(&path);

    config.latitude = ask_coordinate(input, out, "Latitude", 'N', 'S')?;
    config.longitude = ask_coordinate(input, out, "Longitude", 'E', 'W')?;

    let table = ask(input, out, "Symbol table (/ or \\) [/]: ")?;
    config.symbol_table = if table == "\\" { '\\' } else { '/' };
    let code = ask(input, out, &format!("Symbol code [{}]: ", config.symbol_code))?;
    if let Some(c) = code.chars().next() {
        config.symbol_code = c;
    }
    config.pos_comment = ask(input, out, "Default position comment (optional): ")?;
    Ok(config)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Runs console commands against a link, keeping the loaded config so
/// station edits can be written back
pub struct Operator {
    link: LinkController,
    config: Config,
    config_path: PathBuf,
}

impl Operator {
    pub fn new(link: LinkController, config: Config, config_path: PathBuf) -> Self {
        Operator {
            link,
            config,
            config_path,
        }
    }

    /// Executes one command. Send and config failures are reported to
    /// `out`; only a failure to write to `out` is returned.
    pub fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> io::Result<Flow> {
        let sent = match command {
            Command::Message { addressee, text } => self.link.send_message(&addressee, &text),
            Command::Quick { addressee, text } => self.link.send_message(&addressee, text),
            Command::Position { comment } => self.link.send_position(comment.as_deref()),
            Command::Raw(text) => self.link.send_raw(&text),
            Command::RepeatMessage => self.link.repeat_last_message(),
            Command::RepeatRaw => self.link.repeat_last_raw(),
            Command::ToggleAck => {
                let enabled = self.link.toggle_ack();
                writeln!(out, "Message ACK ids {}", if enabled { "ON" } else { "OFF" })?;
                return Ok(Flow::Continue);
            }
            Command::Heard(callsign) => {
                self.print_heard(callsign.as_deref(), out)?;
                return Ok(Flow::Continue);
            }
            Command::ClearHeard => {
                lock_session(self.link.session()).clear_heard();
                writeln!(out, "Heard list cleared")?;
                return Ok(Flow::Continue);
            }
            Command::Show => {
                self.print_station(out)?;
                return Ok(Flow::Continue);
            }
            Command::Set { key, value } => {
                let result = if key == "ack_enabled" {
                    lock_session(self.link.session()).set_ack_enabled(config::parse_bool(&value));
                    Ok(())
                } else {
                    self.link.station_mut().set(&key, &value)
                };
                match result {
                    Ok(()) => writeln!(out, "{} = {}", key, value)?,
                    Err(e) => writeln!(out, "error: {}", e)?,
                }
                return Ok(Flow::Continue);
            }
            Command::Save => {
                self.save(out)?;
                return Ok(Flow::Continue);
            }
            Command::Help => {
                writeln!(out, "{}", help_text())?;
                return Ok(Flow::Continue);
            }
            Command::Quit => {
                self.save(out)?;
                return Ok(Flow::Quit);
            }
        };
        // The sent packet itself is echoed by the event printer
        if let Err(e) = sent {
            writeln!(out, "error: {}", e)?;
        }
        Ok(Flow::Continue)
    }

    fn print_heard<W: Write>(&self, callsign: Option<&str>, out: &mut W) -> io::Result<()> {
        if let Some(callsign) = callsign {
            let last_heard = lock_session(self.link.session()).last_heard(callsign);
            return match last_heard {
                Some(at) => writeln!(
                    out,
                    "{} last heard {}",
                    callsign.to_uppercase(),
                    at.format("%Y-%m-%d %H:%M:%S")
                ),
                None => writeln!(out, "{} not heard", callsign.to_uppercase()),
            };
        }
        let heard = lock_session(self.link.session()).heard();
        if heard.is_empty() {
            return writeln!(out, "No stations heard");
        }
        writeln!(out, "Heard stations ({}):", heard.len())?;
        for (callsign, last_heard) in heard {
            writeln!(out, "  {:<10} {}", callsign, last_heard.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }

    fn print_station<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let station = self.link.station();
        let path: Vec<String> = station.path.iter().map(|a| a.to_string()).collect();
        let (ack_enabled, next_id) = {
            let session = lock_session(self.link.session());
            (session.ack_enabled(), session.next_message_id())
        };
        writeln!(out, "Callsign: {}", station.callsign)?;
        writeln!(out, "Tocall:   {}", station.tocall)?;
        writeln!(out, "Path:     {}", if path.is_empty() { "(none)".to_string() } else { path.join(",") })?;
        writeln!(
            out,
            "Position: {:.5} {:.5} symbol {}{}",
            station.position.latitude,
            station.position.longitude,
            station.position.symbol_table,
            station.position.symbol_code
        )?;
        writeln!(out, "Comment:  {}", station.position.comment)?;
        writeln!(
            out,
            "ACK:      {} (next id {})",
            if ack_enabled { "ON" } else { "OFF" },
            next_id
        )
    }

    fn save<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.config.update_from_station(self.link.station());
        self.config.ack_enabled = lock_session(self.link.session()).ack_enabled();
        match self.config.save(&self.config_path) {
            Ok(()) => {
                info!("Saved configuration to {}", self.config_path.display());
                writeln!(out, "Saved {}", self.config_path.display())
            }
            Err(e) => writeln!(out, "error: {}", e),
        }
    }
}
