// raprs - KISS Link Module
// Owns the TNC byte stream (TCP or serial), runs the inbound read loop
// and pushes outgoing APRS frames

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use serialport::SerialPort;

use crate::aprs::{self, AprsPacket};
use crate::ax25::{self, Ax25Frame};
use crate::config::Station;
use crate::error::LinkError;
use crate::kiss::{self, KissDeframer};
use crate::session::SessionState;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);
const READ_BUFFER_SIZE: usize = 1024;

/// A duplex byte stream to a KISS TNC
pub trait Transport: Read + Write + Send {
    /// A second handle on the same stream, used by the read thread
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>>;

    /// Unblocks a pending read so the read thread can exit
    fn close(&self) -> io::Result<()>;

    fn describe(&self) -> String;
}

impl Transport for TcpStream {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn describe(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => format!("tcp://{}", addr),
            Err(_) => "tcp://(disconnected)".to_string(),
        }
    }
}

impl Transport for Box<dyn SerialPort> {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(port))
    }

    // Serial reads time out every 100 ms, so the read thread notices the
    // stop flag without help.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial://{}", self.name().unwrap_or_else(|| "(unnamed)".to_string()))
    }
}

/// Opens a KISS-over-TCP connection (e.g. Direwolf on port 8001)
pub fn connect_tcp(host: &str, port: u16) -> Result<Box<dyn Transport>, LinkError> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(Box::new(stream));
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(LinkError::Io(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address found for {}", host))
    })))
}

/// Opens a KISS TNC on a serial port, 8N1 with no flow control
pub fn open_serial(device: &str, baud_rate: u32) -> Result<Box<dyn Transport>, LinkError> {
    let port = serialport::new(device, baud_rate)
        .timeout(SERIAL_READ_TIMEOUT)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()?;
    Ok(Box::new(port))
}

pub(crate) fn lock_session(session: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Received,
    Sent,
}

/// One packet heard on, or sent to, the link
#[derive(Debug, Clone, PartialEq)]
pub struct PacketEvent {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    pub source: String,
    /// AX.25 destination as used on the wire (our tocall for sends)
    pub destination: String,
    /// Digipeaters, `*` marking the ones that have repeated the frame
    pub path: Vec<String>,
    pub payload: String,
    pub packet: AprsPacket,
    /// This packet acknowledged the last message we sent
    pub acknowledged: bool,
}

impl PacketEvent {
    fn from_frame(
        frame: &Ax25Frame,
        direction: Direction,
        packet: AprsPacket,
        acknowledged: bool,
        timestamp: DateTime<Local>,
    ) -> Self {
        PacketEvent {
            timestamp,
            direction,
            source: frame.source.to_string(),
            destination: frame.destination.to_string(),
            path: frame.path_strings(),
            payload: aprs::latin1_to_string(&frame.info),
            packet,
            acknowledged,
        }
    }
}

impl fmt::Display for PacketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::Received => "RX",
            Direction::Sent => "TX",
        };
        write!(
            f,
            "{} {} {}>{}",
            self.timestamp.format("%H:%M:%S"),
            arrow,
            self.source,
            self.destination
        )?;
        for digi in &self.path {
            write!(f, ",{}", digi)?;
        }
        write!(f, ":{}", self.payload)?;
        if self.acknowledged {
            if let AprsPacket::Ack { id, .. } = self.packet {
                write!(f, "  [ACK for our message {}]", id)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum LinkEvent {
    Packet(PacketEvent),
    /// The read loop ended: EOF (`None`) or an I/O error
    Closed(Option<io::Error>),
}

/// KISS -> AX.25 -> APRS decode path plus the session updates that go
/// with each decoded frame
pub struct InboundPipeline {
    deframer: KissDeframer,
    session: Arc<Mutex<SessionState>>,
}

impl InboundPipeline {
    pub fn new(session: Arc<Mutex<SessionState>>) -> Self {
        InboundPipeline {
            deframer: KissDeframer::new(),
            session,
        }
    }

    /// Feeds bytes read from the link and returns one event per decoded
    /// UI frame. Frames failing KISS or AX.25 decode are dropped.
    pub fn process_inbound(&mut self, data: &[u8]) -> Vec<PacketEvent> {
        self.deframer.push(data);
        let mut events = Vec::new();
        while let Some(result) = self.deframer.next_frame() {
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Dropping KISS frame: {}", e);
                    continue;
                }
            };
            match ax25::decode(&raw) {
                Ok(frame) => events.push(self.handle_frame(&frame, Local::now())),
                Err(e) => debug!("Dropping AX.25 frame ({} bytes): {}", raw.len(), e),
            }
        }
        events
    }

    fn handle_frame(&self, frame: &Ax25Frame, now: DateTime<Local>) -> PacketEvent {
        let packet = aprs::parse(&frame.info);
        debug!("Decoded {} packet from {}", packet.kind(), frame.source);
        let acknowledged = lock_session(&self.session).observe(&frame.source, &packet, now);
        if acknowledged {
            info!("{} acknowledged our last message", frame.source);
        }
        PacketEvent::from_frame(frame, Direction::Received, packet, acknowledged, now)
    }

    pub fn reset(&mut self) {
        self.deframer.clear();
    }
}

fn read_loop(
    mut reader: Box<dyn Transport>,
    mut pipeline: InboundPipeline,
    events: Sender<LinkEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    while running.load(Ordering::SeqCst) {
        match reader.read(&mut buffer) {
            Ok(0) => {
                if running.load(Ordering::SeqCst) {
                    warn!("TNC closed the connection");
                    let _ = events.send(LinkEvent::Closed(None));
                }
                break;
            }
            Ok(n) => {
                debug!("Read {} bytes from TNC", n);
                for event in pipeline.process_inbound(&buffer[..n]) {
                    if events.send(LinkEvent::Packet(event)).is_err() {
                        return;
                    }
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    warn!("Error reading from TNC: {}", e);
                    let _ = events.send(LinkEvent::Closed(Some(e)));
                }
                break;
            }
        }
    }
    pipeline.reset();
    debug!("Read loop finished");
}

/// Drives one KISS link: a read thread turning bytes into packet events,
/// and send methods called from the operator side
pub struct LinkController {
    writer: Box<dyn Transport>,
    station: Station,
    session: Arc<Mutex<SessionState>>,
    events: Sender<LinkEvent>,
    running: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl LinkController {
    pub fn new(
        transport: Box<dyn Transport>,
        station: Station,
        session: Arc<Mutex<SessionState>>,
    ) -> (Self, Receiver<LinkEvent>) {
        let (events, receiver) = mpsc::channel();
        let controller = LinkController {
            writer: transport,
            station,
            session,
            events,
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        };
        (controller, receiver)
    }

    /// Spawns the read thread
    pub fn start(&mut self) -> Result<(), LinkError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let reader = self.writer.try_clone_transport()?;
        let pipeline = InboundPipeline::new(Arc::clone(&self.session));
        let events = self.events.clone();
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        info!("Link up: {}", self.writer.describe());
        let handle = thread::Builder::new()
            .name("kiss-reader".to_string())
            .spawn(move || read_loop(reader, pipeline, events, running))?;
        self.reader = Some(handle);
        Ok(())
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    pub fn station_mut(&mut self) -> &mut Station {
        &mut self.station
    }

    pub fn session(&self) -> &Arc<Mutex<SessionState>> {
        &self.session
    }

    /// Flips the ACK setting for future messages and returns the new value
    pub fn toggle_ack(&self) -> bool {
        lock_session(&self.session).toggle_ack()
    }

    /// Sends an APRS message, with the next message id when ACKs are on.
    /// The id is only used up, and the message only becomes the one `r`
    /// repeats, once the frame has been written.
    pub fn send_message(&mut self, addressee: &str, text: &str) -> Result<PacketEvent, LinkError> {
        // Held across the write so an ACK cannot be checked against a
        // half-sent message
        let session = Arc::clone(&self.session);
        let mut state = lock_session(&session);
        let message = state.prepare_message(addressee, text);
        let info = aprs::build_message(&message.addressee, &message.text, message.id);
        let event = self.transmit(info)?;
        state.commit_message(message);
        Ok(event)
    }

    /// Sends a position beacon; `comment` replaces the configured one
    pub fn send_position(&mut self, comment: Option<&str>) -> Result<PacketEvent, LinkError> {
        let mut position = self.station.position.clone();
        if let Some(comment) = comment {
            position.comment = comment.to_string();
        }
        self.transmit(aprs::build_position(&position))
    }

    /// Sends `text` as the whole information field
    pub fn send_raw(&mut self, text: &str) -> Result<PacketEvent, LinkError> {
        let info = aprs::string_to_latin1(text);
        let event = self.transmit(info.clone())?;
        lock_session(&self.session).record_raw(&info);
        Ok(event)
    }

    /// Re-sends the last message unchanged, including its id
    pub fn repeat_last_message(&mut self) -> Result<PacketEvent, LinkError> {
        let message = lock_session(&self.session)
            .last_message()
            .cloned()
            .ok_or(LinkError::NothingToRepeat("message"))?;
        let info = aprs::build_message(&message.addressee, &message.text, message.id);
        self.transmit(info)
    }

    pub fn repeat_last_raw(&mut self) -> Result<PacketEvent, LinkError> {
        let info = lock_session(&self.session)
            .last_raw()
            .map(<[u8]>::to_vec)
            .ok_or(LinkError::NothingToRepeat("raw packet"))?;
        self.transmit(info)
    }

    fn transmit(&mut self, info: Vec<u8>) -> Result<PacketEvent, LinkError> {
        let frame = Ax25Frame::new(
            self.station.tocall.clone(),
            self.station.callsign.clone(),
            self.station.path.clone(),
            info,
        );
        let kiss_frame = kiss::frame(&frame.encode()?);
        self.writer.write_all(&kiss_frame)?;
        self.writer.flush()?;
        debug!("Wrote {} byte KISS frame", kiss_frame.len());

        let packet = aprs::parse(&frame.info);
        let event = PacketEvent::from_frame(&frame, Direction::Sent, packet, false, Local::now());
        let _ = self.events.send(LinkEvent::Packet(event.clone()));
        Ok(event)
    }

    /// Stops the read thread and releases the stream
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.writer.close() {
            debug!("Closing link: {}", e);
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
            info!("Link down");
        }
    }
}

impl Drop for LinkController {
    fn drop(&mut self) {
        self.shutdown();
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::net::TcpListener;

    /// The TNC side of a loopback link. One deframer lives as long as the
    /// socket so frames arriving in the same read are all kept.
    pub(crate) struct TncEnd {
        pub(crate) stream: TcpStream,
        deframer: KissDeframer,
    }

    impl TncEnd {
        pub(crate) fn read_frame(&mut self) -> Vec<u8> {
            let mut buffer = [0u8; 512];
            loop {
                if let Some(frame) = self.deframer.frames().next() {
                    return frame;
                }
                let n = self.stream.read(&mut buffer).unwrap();
                assert!(n > 0, "link closed before a frame arrived");
                self.deframer.push(&buffer[..n]);
            }
        }

        pub(crate) fn read_info(&mut self) -> Vec<u8> {
            ax25::decode(&self.read_frame()).unwrap().info
        }
    }

    pub(crate) fn loopback_transport() -> (Box<dyn Transport>, TncEnd) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let transport = connect_tcp("127.0.0.1", port).unwrap();
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let tnc = TncEnd {
            stream,
            deframer: KissDeframer::new(),
        };
        (transport, tnc)
    }
}
