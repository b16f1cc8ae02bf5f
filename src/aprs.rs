// raprs - APRS Payload Module
// Information-field grammar for messages, acknowledgements and
// uncompressed position reports

use crate::error::AprsError;

pub const ADDRESSEE_LEN: usize = 9;
/// Longest message text APRS 1.0 allows; longer text is sent as-is
pub const MAX_MESSAGE_TEXT: usize = 67;
pub const MAX_MESSAGE_ID: u16 = 999;

const DTI_MESSAGE: u8 = b':';
const DTI_POSITION: u8 = b'!';

/// `!` + DDMM.mm + N + table + DDDMM.mm + E + symbol
const POSITION_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AprsMessage {
    pub addressee: String,
    pub text: String,
    pub id: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AprsPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub symbol_table: char,
    pub symbol_code: char,
    pub comment: String,
}

/// A parsed information field
#[derive(Debug, Clone, PartialEq)]
pub enum AprsPacket {
    Message(AprsMessage),
    Ack { addressee: String, id: u16 },
    Position(AprsPosition),
    Raw(String),
}

impl AprsPacket {
    pub fn kind(&self) -> &'static str {
        match self {
            AprsPacket::Message(_) => "message",
            AprsPacket::Ack { .. } => "ack",
            AprsPacket::Position(_) => "position",
            AprsPacket::Raw(_) => "raw",
        }
    }
}

/// Bytes to text, one Latin-1 code point per byte
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Text to bytes; anything outside Latin-1 becomes `?`
pub fn string_to_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// `:ADDRESSEE:text{id` with the addressee padded or cut to nine characters
pub fn build_message(addressee: &str, text: &str, id: Option<u16>) -> Vec<u8> {
    let addressee: String = addressee
        .trim()
        .to_uppercase()
        .chars()
        .take(ADDRESSEE_LEN)
        .collect();
    let mut info = format!(":{:<width$}:{}", addressee, text, width = ADDRESSEE_LEN);
    if let Some(id) = id {
        info.push_str(&format!("{{{}", id));
    }
    string_to_latin1(&info)
}

/// `DDMM.mm` / `DDDMM.mm` with the minutes rounded to hundredths before
/// the degrees are split off, so 59.999' carries into the next degree.
fn format_degrees(value: f64, degree_width: usize) -> String {
    let hundredths = (value.abs() * 6000.0).round() as u64;
    let degrees = hundredths / 6000;
    let minutes = hundredths % 6000;
    format!(
        "{:0dw$}{:02}.{:02}",
        degrees,
        minutes / 100,
        minutes % 100,
        dw = degree_width
    )
}

/// Uncompressed position report without timestamp:
/// `!DDMM.mmN/DDDMM.mmE>comment`
pub fn build_position(position: &AprsPosition) -> Vec<u8> {
    let lat_hemisphere = if position.latitude >= 0.0 { 'N' } else { 'S' };
    let lon_hemisphere = if position.longitude >= 0.0 { 'E' } else { 'W' };
    let info = format!(
        "!{}{}{}{}{}{}{}",
        format_degrees(position.latitude, 2),
        lat_hemisphere,
        position.symbol_table,
        format_degrees(position.longitude, 3),
        lon_hemisphere,
        position.symbol_code,
        position.comment
    );
    string_to_latin1(&info)
}

/// Classifies an information field. Never fails: anything that does not
/// match a known grammar comes back as `Raw`.
pub fn parse(info: &[u8]) -> AprsPacket {
    match info.first() {
        Some(&DTI_MESSAGE) => parse_message(info),
        Some(&DTI_POSITION) => match parse_position(info) {
            Ok(position) => AprsPacket::Position(position),
            Err(e) => {
                log::debug!("{}; treating payload as raw text", e);
                AprsPacket::Raw(latin1_to_string(info))
            }
        },
        _ => AprsPacket::Raw(latin1_to_string(info)),
    }
}

fn parse_message(info: &[u8]) -> AprsPacket {
    let text = latin1_to_string(info);
    let Some((addressee, body)) = text[1..].split_once(':') else {
        return AprsPacket::Raw(text);
    };
    let addressee = addressee.trim_end().to_string();

    if let Some(id) = body.strip_prefix("ack").and_then(parse_message_id) {
        return AprsPacket::Ack { addressee, id };
    }

    let (body, id) = match body.rsplit_once('{') {
        Some((head, tail)) => match parse_message_id(tail) {
            Some(id) => (head, Some(id)),
            None => (body, None),
        },
        None => (body, None),
    };
    AprsPacket::Message(AprsMessage {
        addressee,
        text: body.to_string(),
        id,
    })
}

fn parse_message_id(digits: &str) -> Option<u16> {
    let digits = digits.trim_end();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parses a `!` position report by fixed offsets
pub fn parse_position(info: &[u8]) -> Result<AprsPosition, AprsError> {
    if info.first() != Some(&DTI_POSITION) {
        return Err(AprsError::MalformedPosition("missing '!' type indicator".into()));
    }
    if info.len() < POSITION_LEN {
        return Err(AprsError::MalformedPosition(format!(
            "{} bytes, need at least {}",
            info.len(),
            POSITION_LEN
        )));
    }
    let text = latin1_to_string(info);
    let chars: Vec<char> = text.chars().collect();
    let field = |range: std::ops::Range<usize>| chars[range].iter().collect::<String>();

    let latitude = parse_degrees(&field(1..8), 2, chars[8], 'N', 'S', 90.0)?;
    let symbol_table = chars[9];
    if !(symbol_table == '/' || symbol_table == '\\' || symbol_table.is_ascii_digit()
        || symbol_table.is_ascii_uppercase())
    {
        return Err(AprsError::MalformedPosition(format!(
            "invalid symbol table '{}'",
            symbol_table
        )));
    }
    let longitude = parse_degrees(&field(10..18), 3, chars[18], 'E', 'W', 180.0)?;

    Ok(AprsPosition {
        latitude,
        longitude,
        symbol_table,
        symbol_code: chars[19],
        comment: field(20..chars.len()),
    })
}

fn parse_degrees(
    field: &str,
    degree_width: usize,
    hemisphere: char,
    positive: char,
    negative: char,
    limit: f64,
) -> Result<f64, AprsError> {
    let malformed = || AprsError::MalformedPosition(format!("bad coordinate '{}{}'", field, hemisphere));

    if !field.is_ascii() || field.len() != degree_width + 5 {
        return Err(malformed());
    }
    let (degrees, minutes) = field.split_at(degree_width);
    if minutes.as_bytes()[2] != b'.' {
        return Err(malformed());
    }
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(degrees) || !all_digits(&minutes[..2]) || !all_digits(&minutes[3..]) {
        return Err(malformed());
    }
    let degrees: f64 = degrees.parse().map_err(|_| malformed())?;
    let minutes: f64 = minutes.parse().map_err(|_| malformed())?;
    if minutes >= 60.0 {
        return Err(malformed());
    }
    let value = degrees + minutes / 60.0;
    if value > limit {
        return Err(malformed());
    }
    match hemisphere {
        h if h == positive => Ok(value),
        h if h == negative => Ok(-value),
        _ => Err(malformed()),
    }
}
