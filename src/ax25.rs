// raprs - AX.25 UI Frame Module
// Address packing and UI frame encode/decode for APRS traffic

use std::fmt;
use std::str::FromStr;

use crate::error::Ax25Error;

pub const AX25_CONTROL_UI: u8 = 0x03;
pub const AX25_PID_NO_L3: u8 = 0xF0;

pub const ADDRESS_LEN: usize = 7;
pub const MAX_CALLSIGN_LEN: usize = 6;
pub const MAX_SSID: u8 = 15;
pub const MAX_DIGIPEATERS: usize = 8;

/// Destination + source + control + PID
pub const MIN_FRAME_LEN: usize = 2 * ADDRESS_LEN + 2;

const SSID_RESERVED_BITS: u8 = 0x60;
const SSID_LAST_BIT: u8 = 0x01;
const SSID_H_BIT: u8 = 0x80;

/// Station callsign with its SSID, e.g. `IK2ABC-7`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Callsign {
    call: String,
    ssid: u8,
}

impl Callsign {
    /// Builds a callsign, uppercasing `call`. Fails if the base is empty,
    /// longer than six characters, not alphanumeric, or the SSID is above 15.
    pub fn new(call: &str, ssid: u8) -> Result<Self, Ax25Error> {
        let call = call.trim().to_ascii_uppercase();
        if call.is_empty() {
            return Err(Ax25Error::invalid(call, "callsign is empty"));
        }
        if call.len() > MAX_CALLSIGN_LEN {
            return Err(Ax25Error::invalid(call, "callsign longer than 6 characters"));
        }
        if !call.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Ax25Error::invalid(call, "callsign must be alphanumeric"));
        }
        if ssid > MAX_SSID {
            return Err(Ax25Error::invalid(
                format!("{}-{}", call, ssid),
                "SSID must be between 0 and 15",
            ));
        }
        Ok(Callsign { call, ssid })
    }

    pub fn call(&self) -> &str {
        &self.call
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.call)
        } else {
            write!(f, "{}-{}", self.call, self.ssid)
        }
    }
}

impl FromStr for Callsign {
    type Err = Ax25Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('-') {
            Some((call, ssid)) => {
                let ssid = ssid
                    .parse::<u8>()
                    .map_err(|_| Ax25Error::invalid(s, "SSID must be between 0 and 15"))?;
                Callsign::new(call, ssid)
            }
            None => Callsign::new(s, 0),
        }
    }
}

/// A digipeater entry in the path. `repeated` is the H bit: set once the
/// digipeater has relayed the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub callsign: Callsign,
    pub repeated: bool,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.callsign, if self.repeated { "*" } else { "" })
    }
}

impl FromStr for Address {
    type Err = Ax25Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (call, repeated) = match s.strip_suffix('*') {
            Some(call) => (call, true),
            None => (s, false),
        };
        Ok(Address { callsign: call.parse()?, repeated })
    }
}

/// Packs one 7-byte address: six shifted, space padded characters, then
/// the SSID byte (bits 1-4 SSID, bits 5-6 reserved and set, bit 0 last
/// address, bit 7 H / C bit).
pub fn pack_address(callsign: &Callsign, h_bit: bool, last: bool) -> [u8; ADDRESS_LEN] {
    let mut packed = [b' ' << 1; ADDRESS_LEN];
    for (slot, byte) in packed.iter_mut().zip(callsign.call().bytes()) {
        *slot = byte << 1;
    }
    let mut ssid_byte = SSID_RESERVED_BITS | ((callsign.ssid() & 0x0F) << 1);
    if last {
        ssid_byte |= SSID_LAST_BIT;
    }
    if h_bit {
        ssid_byte |= SSID_H_BIT;
    }
    packed[6] = ssid_byte;
    packed
}

/// Inverse of `pack_address`; returns the callsign, the bit 7 flag and the
/// last-address flag.
pub fn unpack_address(bytes: &[u8]) -> Result<(Callsign, bool, bool), Ax25Error> {
    if bytes.len() != ADDRESS_LEN {
        return Err(Ax25Error::invalid(
            format!("{:02x?}", bytes),
            "address must be 7 bytes",
        ));
    }
    let call: String = bytes[..6]
        .iter()
        .map(|&b| ((b >> 1) & 0x7F) as char)
        .collect::<String>()
        .trim_end()
        .to_string();
    if call.is_empty() || !call.chars().all(|c| c.is_ascii_graphic()) {
        return Err(Ax25Error::invalid(call, "callsign is empty or not printable"));
    }
    let ssid = (bytes[6] >> 1) & 0x0F;
    let h_bit = bytes[6] & SSID_H_BIT != 0;
    let last = bytes[6] & SSID_LAST_BIT != 0;
    // Received callsigns are taken as-is; only locally built ones are
    // held to the alphanumeric rule.
    Ok((Callsign { call, ssid }, h_bit, last))
}

/// An AX.25 UI frame (control 0x03, PID 0xF0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Frame {
    pub destination: Callsign,
    pub source: Callsign,
    pub digipeaters: Vec<Address>,
    pub info: Vec<u8>,
}

impl Ax25Frame {
    pub fn new(
        destination: Callsign,
        source: Callsign,
        digipeaters: Vec<Address>,
        info: Vec<u8>,
    ) -> Self {
        Ax25Frame { destination, source, digipeaters, info }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Ax25Error> {
        encode(&self.destination, &self.source, &self.digipeaters, &self.info)
    }

    /// The path as shown in monitor output: `WIDE1-1*`, `WIDE2-1`
    pub fn path_strings(&self) -> Vec<String> {
        self.digipeaters.iter().map(|d| d.to_string()).collect()
    }
}

impl fmt::Display for Ax25Frame {
    /// TNC2 monitor format: `SRC>DEST,DIGI*:info`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.source, self.destination)?;
        for digi in &self.digipeaters {
            write!(f, ",{}", digi)?;
        }
        let info: String = self.info.iter().map(|&b| b as char).collect();
        write!(f, ":{}", info)
    }
}

/// Encodes destination, source, path, control, PID and info into a raw
/// AX.25 frame (no flags, no FCS) ready for KISS framing.
pub fn encode(
    destination: &Callsign,
    source: &Callsign,
    digipeaters: &[Address],
    info: &[u8],
) -> Result<Vec<u8>, Ax25Error> {
    if digipeaters.len() > MAX_DIGIPEATERS {
        let path: Vec<String> = digipeaters.iter().map(|d| d.to_string()).collect();
        return Err(Ax25Error::invalid(path.join(","), "more than 8 digipeaters"));
    }
    let mut frame =
        Vec::with_capacity((2 + digipeaters.len()) * ADDRESS_LEN + 2 + info.len());
    frame.extend_from_slice(&pack_address(destination, false, false));
    frame.extend_from_slice(&pack_address(source, false, digipeaters.is_empty()));
    for (i, digi) in digipeaters.iter().enumerate() {
        let last = i == digipeaters.len() - 1;
        frame.extend_from_slice(&pack_address(&digi.callsign, digi.repeated, last));
    }
    frame.push(AX25_CONTROL_UI);
    frame.push(AX25_PID_NO_L3);
    frame.extend_from_slice(info);
    Ok(frame)
}

/// Decodes a raw AX.25 frame. Only UI frames with no layer 3 protocol are
/// accepted.
pub fn decode(data: &[u8]) -> Result<Ax25Frame, Ax25Error> {
    if data.len() < MIN_FRAME_LEN {
        return Err(Ax25Error::ShortFrame { len: data.len() });
    }

    let mut offset = 0;
    let mut addresses = Vec::with_capacity(2);
    loop {
        if offset + ADDRESS_LEN > data.len() {
            return Err(Ax25Error::ShortFrame { len: data.len() });
        }
        let (callsign, h_bit, last) = unpack_address(&data[offset..offset + ADDRESS_LEN])?;
        offset += ADDRESS_LEN;
        addresses.push(Address { callsign, repeated: h_bit });
        if addresses.len() > 2 + MAX_DIGIPEATERS {
            return Err(Ax25Error::invalid(
                addresses[0].callsign.to_string(),
                "more than 8 digipeaters",
            ));
        }
        if last {
            break;
        }
    }
    if addresses.len() < 2 {
        return Err(Ax25Error::invalid(
            addresses[0].callsign.to_string(),
            "address field ends before the source address",
        ));
    }
    if offset + 2 > data.len() {
        return Err(Ax25Error::ShortFrame { len: data.len() });
    }

    let control = data[offset];
    let pid = data[offset + 1];
    if control != AX25_CONTROL_UI || pid != AX25_PID_NO_L3 {
        return Err(Ax25Error::UnsupportedFrameType { control, pid });
    }

    let mut addresses = addresses.into_iter();
    let (Some(destination), Some(source)) = (addresses.next(), addresses.next()) else {
        return Err(Ax25Error::ShortFrame { len: data.len() });
    };
    Ok(Ax25Frame {
        // Bit 7 on destination/source is the command/response bit, not H.
        destination: destination.callsign,
        source: source.callsign,
        digipeaters: addresses.collect(),
        info: data[offset + 2..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn call(s: &str) -> Callsign {
        s.parse().unwrap()
    }

    fn sample_frame(digis: &[&str]) -> Ax25Frame {
        Ax25Frame::new(
            call("APZ001"),
            call("IK2ABC-7"),
            digis.iter().map(|d| d.parse().unwrap()).collect(),
            b":IU1BOT   :hello{5".to_vec(),
        )
    }

    #[test]
    fn test_callsign_parsing() {
        let c = call("ik2abc-7");
        assert_eq!(c.call(), "IK2ABC");
        assert_eq!(c.ssid(), 7);
        assert_eq!(c.to_string(), "IK2ABC-7");
        assert_eq!(call("APZ001-0").to_string(), "APZ001");
    }

    #[test]
    fn test_callsign_validation() {
        assert!(Callsign::new("TOOLONG", 0).is_err());
        assert!(Callsign::new("N0CALL", 16).is_err());
        assert!(Callsign::new("", 0).is_err());
        assert!(Callsign::new("N0/CA", 0).is_err());
        assert!("N0CALL-X".parse::<Callsign>().is_err());
        assert!("N0CALL-99".parse::<Callsign>().is_err());
        assert!(Callsign::new("N0CALL", 15).is_ok());
    }

    #[test]
    fn test_address_parsing() {
        let a: Address = "WIDE2-1*".parse().unwrap();
        assert!(a.repeated);
        assert_eq!(a.callsign, call("WIDE2-1"));
        assert_eq!(a.to_string(), "WIDE2-1*");
    }

    #[test]
    fn test_pack_address_layout() {
        let packed = pack_address(&call("N0CALL"), false, false);
        assert_eq!(&packed[..6], &[b'N' << 1, b'0' << 1, b'C' << 1, b'A' << 1, b'L' << 1, b'L' << 1]);
        assert_eq!(packed[6], 0x60);

        let packed = pack_address(&call("AB1"), false, true);
        assert_eq!(&packed[3..6], &[0x40, 0x40, 0x40]);
        assert_eq!(packed[6], 0x61);
    }

    #[test]
    fn test_pack_address_bit_boundaries() {
        for ssid in [0u8, 1, 14, 15] {
            for h_bit in [false, true] {
                for last in [false, true] {
                    let c = Callsign::new("WIDE2", ssid).unwrap();
                    let packed = pack_address(&c, h_bit, last);
                    assert_eq!(packed[6] & 0x60, 0x60);
                    assert_eq!((packed[6] >> 1) & 0x0F, ssid);
                    assert_eq!(packed[6] & 0x80 != 0, h_bit);
                    assert_eq!(packed[6] & 0x01 != 0, last);
                    assert_eq!(unpack_address(&packed).unwrap(), (c, h_bit, last));
                }
            }
        }
    }

    #[test]
    fn test_unpack_rejects_bad_length() {
        assert!(unpack_address(&[0x40; 6]).is_err());
    }

    #[test]
    fn test_digipeater_repeated_flag() {
        for repeated in [false, true] {
            let mut frame = sample_frame(&["WIDE2-1", "WIDE1-1"]);
            frame.digipeaters[0].repeated = repeated;
            let bytes = frame.encode().unwrap();
            // WIDE2-1 is the first digipeater, third address, not last
            assert_eq!(bytes[20] & 0x01, 0);
            assert_eq!(bytes[20] & 0x80 != 0, repeated);
            let decoded = decode(&bytes).unwrap();
            assert_eq!(decoded.digipeaters[0].callsign.call(), "WIDE2");
            assert_eq!(decoded.digipeaters[0].callsign.ssid(), 1);
            assert_eq!(decoded.digipeaters[0].repeated, repeated);
        }
    }

    #[test]
    fn test_last_address_bit() {
        let bytes = sample_frame(&[]).encode().unwrap();
        assert_eq!(bytes[6] & 0x01, 0);
        assert_eq!(bytes[13] & 0x01, 1);
        assert_eq!(&bytes[14..16], &[0x03, 0xF0]);

        let bytes = sample_frame(&["WIDE1-1", "WIDE2-2"]).encode().unwrap();
        assert_eq!(bytes[13] & 0x01, 0);
        assert_eq!(bytes[20] & 0x01, 0);
        assert_eq!(bytes[27] & 0x01, 1);
        assert_eq!((bytes.len() - 2 - frame_info_len()) % ADDRESS_LEN, 0);
    }

    fn frame_info_len() -> usize {
        b":IU1BOT   :hello{5".len()
    }

    #[test]
    fn test_roundtrip() {
        let paths: [&[&str]; 4] = [
            &[],
            &["WIDE2-1"],
            &["ARISS", "WIDE1-1*", "WIDE2-2"],
            &["A1", "B2", "C3", "D4", "E5", "F6", "G7", "H8-15"],
        ];
        for path in paths {
            let frame = sample_frame(path);
            assert_eq!(decode(&frame.encode().unwrap()).unwrap(), frame);
        }
        let empty_info = Ax25Frame::new(call("APZ001"), call("N0CALL"), vec![], vec![]);
        assert_eq!(decode(&empty_info.encode().unwrap()).unwrap(), empty_info);
    }

    #[test]
    fn test_too_many_digipeaters() {
        let frame = sample_frame(&["A1", "B2", "C3", "D4", "E5", "F6", "G7", "H8", "I9"]);
        assert!(matches!(frame.encode(), Err(Ax25Error::InvalidAddress { .. })));
    }

    #[test]
    fn test_decode_rejects_too_many_digipeaters() {
        let digis: Vec<Callsign> = ["A1", "B2", "C3", "D4", "E5", "F6", "G7", "H8", "I9"]
            .iter()
            .map(|d| call(d))
            .collect();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&pack_address(&call("APZ001"), false, false));
        bytes.extend_from_slice(&pack_address(&call("IK2ABC-7"), false, false));
        for (i, digi) in digis.iter().enumerate() {
            bytes.extend_from_slice(&pack_address(digi, false, i == digis.len() - 1));
        }
        bytes.extend_from_slice(&[AX25_CONTROL_UI, AX25_PID_NO_L3]);
        bytes.extend_from_slice(b">status");
        assert_eq!(bytes.len(), 11 * ADDRESS_LEN + 2 + 7);
        assert!(matches!(decode(&bytes), Err(Ax25Error::InvalidAddress { .. })));
    }

    fn arb_callsign() -> impl Strategy<Value = Callsign> {
        ("[A-Z0-9]{1,6}", 0u8..=MAX_SSID)
            .prop_map(|(base, ssid)| Callsign::new(&base, ssid).unwrap())
    }

    fn arb_address() -> impl Strategy<Value = Address> {
        (arb_callsign(), any::<bool>()).prop_map(|(callsign, repeated)| Address { callsign, repeated })
    }

    proptest! {
        #[test]
        fn test_encode_decode_prop(
            destination in arb_callsign(),
            source in arb_callsign(),
            digipeaters in prop::collection::vec(arb_address(), 0..=MAX_DIGIPEATERS),
            info in any::<Vec<u8>>(),
        ) {
            let frame = Ax25Frame::new(destination, source, digipeaters, info);
            let bytes = frame.encode().unwrap();
            prop_assert_eq!((bytes.len() - 2 - frame.info.len()) % ADDRESS_LEN, 0);
            prop_assert_eq!(decode(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn test_short_frame() {
        let bytes = sample_frame(&[]).encode().unwrap();
        assert_eq!(decode(&bytes[..15]), Err(Ax25Error::ShortFrame { len: 15 }));
        assert_eq!(decode(&[]), Err(Ax25Error::ShortFrame { len: 0 }));
    }

    #[test]
    fn test_unterminated_address_field() {
        let mut bytes = sample_frame(&[]).encode().unwrap();
        bytes.truncate(16);
        bytes[13] &= !0x01;
        assert!(matches!(decode(&bytes), Err(Ax25Error::ShortFrame { .. })));
    }

    #[test]
    fn test_destination_marked_last() {
        let mut bytes = sample_frame(&[]).encode().unwrap();
        bytes[6] |= 0x01;
        assert!(matches!(decode(&bytes), Err(Ax25Error::InvalidAddress { .. })));
    }

    #[test]
    fn test_unsupported_frame_type() {
        let mut bytes = sample_frame(&[]).encode().unwrap();
        bytes[14] = 0x2F; // SABM
        assert_eq!(
            decode(&bytes),
            Err(Ax25Error::UnsupportedFrameType { control: 0x2F, pid: 0xF0 })
        );
        let mut bytes = sample_frame(&[]).encode().unwrap();
        bytes[15] = 0xCF; // NET/ROM
        assert!(matches!(decode(&bytes), Err(Ax25Error::UnsupportedFrameType { .. })));
    }

    #[test]
    fn test_command_bit_ignored_on_source() {
        let mut bytes = sample_frame(&[]).encode().unwrap();
        bytes[6] |= 0x80;
        bytes[13] |= 0x80;
        assert_eq!(decode(&bytes).unwrap(), sample_frame(&[]));
    }

    #[test]
    fn test_display_monitor_format() {
        let mut frame = sample_frame(&["WIDE1-1", "WIDE2-1"]);
        frame.digipeaters[0].repeated = true;
        assert_eq!(
            frame.to_string(),
            "IK2ABC-7>APZ001,WIDE1-1*,WIDE2-1::IU1BOT   :hello{5"
        );
        assert_eq!(frame.path_strings(), vec!["WIDE1-1*", "WIDE2-1"]);
    }
}
