// raprs - Library Root
// APRS messaging over a KISS TNC: KISS framing, AX.25 UI frames, APRS
// payloads, session bookkeeping and the link that ties them together

pub mod aprs;
pub mod ax25;
pub mod config;
pub mod console;
pub mod error;
pub mod kiss;
pub mod link;
pub mod logging;
pub mod session;

pub use aprs::{AprsMessage, AprsPacket, AprsPosition};
pub use ax25::{Address, Ax25Frame, Callsign};
pub use config::{Config, Station};
pub use error::{Ax25Error, AprsError, ConfigError, KissError, LinkError};
pub use kiss::KissDeframer;
pub use link::{LinkController, LinkEvent, PacketEvent};
pub use session::SessionState;
