//! GPMF container decoding.
//!
//! A GPMF buffer is a flat run of KLV records. Every record starts with an
//! 8-byte header:
//!
//! ```text
//! fourcc(4) | type(1) | element size(1) | repeat(2, big-endian)
//! ```
//!
//! followed by `size * repeat` payload bytes, zero-padded to a 4-byte
//! boundary. A type of `0` marks a container whose payload is itself a run of
//! records.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::Error;

pub const HEADER_LEN: usize = 8;

/// Four-character record identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCC([u8; 4]);

impl FourCC {
    pub const DEVC: FourCC = FourCC(*b"DEVC");
    pub const STRM: FourCC = FourCC(*b"STRM");
    pub const DVID: FourCC = FourCC(*b"DVID");
    pub const DVNM: FourCC = FourCC(*b"DVNM");
    pub const TICK: FourCC = FourCC(*b"TICK");
    pub const STMP: FourCC = FourCC(*b"STMP");
    pub const TSMP: FourCC = FourCC(*b"TSMP");
    pub const STNM: FourCC = FourCC(*b"STNM");
    pub const SIUN: FourCC = FourCC(*b"SIUN");
    pub const UNIT: FourCC = FourCC(*b"UNIT");
    pub const SCAL: FourCC = FourCC(*b"SCAL");
    pub const TYPE: FourCC = FourCC(*b"TYPE");
    pub const ORIN: FourCC = FourCC(*b"ORIN");
    pub const TMPC: FourCC = FourCC(*b"TMPC");
    pub const EMPT: FourCC = FourCC(*b"EMPT");
    pub const SHUT: FourCC = FourCC(*b"SHUT");
    pub const GPS5: FourCC = FourCC(*b"GPS5");
    pub const GPS9: FourCC = FourCC(*b"GPS9");
    pub const GPSF: FourCC = FourCC(*b"GPSF");
    pub const GPSP: FourCC = FourCC(*b"GPSP");
    pub const GPSU: FourCC = FourCC(*b"GPSU");
    pub const ACCL: FourCC = FourCC(*b"ACCL");
    pub const GYRO: FourCC = FourCC(*b"GYRO");
    pub const GRAV: FourCC = FourCC(*b"GRAV");
    pub const CORI: FourCC = FourCC(*b"CORI");
    pub const IORI: FourCC = FourCC(*b"IORI");
    pub const MWET: FourCC = FourCC(*b"MWET");
    pub const WNDM: FourCC = FourCC(*b"WNDM");

    pub const fn new(code: &[u8; 4]) -> Self {
        FourCC(*code)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Best-effort display; firmware occasionally writes non-printable codes.
        for &c in &self.0 {
            let ch = if c.is_ascii_graphic() || c == b' ' { c as char } else { '.' };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

impl FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = s.as_bytes();
        match b {
            [a, b, c, d] => Ok(FourCC([*a, *b, *c, *d])),
            _ => Err(format!("fourcc must be exactly 4 bytes, got {s:?}")),
        }
    }
}

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The set of identifiers directly inside a container.
pub type Contents = BTreeSet<FourCC>;

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Unpadded payload bytes (`size * repeat` of them).
    Leaf(Vec<u8>),
    Container(Vec<RawRecord>),
}

/// One decoded node of the record tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub fourcc: FourCC,
    /// Element type tag; `0` for containers.
    pub type_tag: u8,
    /// Declared size of one element (structure) in bytes.
    pub size: u8,
    pub repeat: u16,
    /// Absolute offset of the header in the decoded buffer.
    pub offset: usize,
    pub body: Body,
}

impl RawRecord {
    pub fn is_container(&self) -> bool {
        matches!(self.body, Body::Container(_))
    }

    pub fn type_char(&self) -> Option<char> {
        (self.type_tag != 0).then_some(self.type_tag as char)
    }

    /// Leaf payload; empty for containers.
    pub fn data(&self) -> &[u8] {
        match &self.body {
            Body::Leaf(data) => data,
            Body::Container(_) => &[],
        }
    }

    /// Child records; empty for leaves.
    pub fn children(&self) -> &[RawRecord] {
        match &self.body {
            Body::Container(children) => children,
            Body::Leaf(_) => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.children().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children().is_empty()
    }

    /// Identifiers of the immediate children.
    pub fn itemset(&self) -> Contents {
        self.children().iter().map(|c| c.fourcc).collect()
    }

    pub fn with_type(&self, fourcc: FourCC) -> impl Iterator<Item = &RawRecord> {
        self.children().iter().filter(move |c| c.fourcc == fourcc)
    }

    pub fn data_len(&self) -> usize {
        self.size as usize * self.repeat as usize
    }

    pub fn padded_len(&self) -> usize {
        padded(self.data_len())
    }

    /// Header plus padded payload: the bytes this record occupies.
    pub fn span(&self) -> usize {
        HEADER_LEN + self.padded_len()
    }
}

fn padded(n: usize) -> usize {
    n.div_ceil(4) * 4
}

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    fourcc: FourCC,
    type_tag: u8,
    size: u8,
    repeat: u16,
}

fn read_record_header(data: &[u8], pos: usize, base: usize) -> Result<RecordHeader, Error> {
    let Some(h) = data.get(pos..pos + HEADER_LEN) else {
        let mut partial = [b'.'; 4];
        let avail = data.len().saturating_sub(pos).min(4);
        partial[..avail].copy_from_slice(&data[pos..pos + avail]);
        return Err(Error::format(
            FourCC(partial),
            base + pos,
            format!(
                "header needs {HEADER_LEN} bytes, {} remain",
                data.len().saturating_sub(pos)
            ),
        ));
    };
    Ok(RecordHeader {
        fourcc: FourCC([h[0], h[1], h[2], h[3]]),
        type_tag: h[4],
        size: h[5],
        repeat: u16::from_be_bytes([h[6], h[7]]),
    })
}

/// Decode one record (and, for containers, all of its descendants) at `pos`.
///
/// `data` is the enclosing slice; nothing is read past its end.
fn decode_record(data: &[u8], pos: usize, base: usize) -> Result<RawRecord, Error> {
    let hdr = read_record_header(data, pos, base)?;
    let data_len = hdr.size as usize * hdr.repeat as usize;
    let padded_len = padded(data_len);
    let payload_start = pos + HEADER_LEN;
    let payload_end = payload_start + padded_len;

    if payload_end > data.len() {
        return Err(Error::format(
            hdr.fourcc,
            base + pos,
            format!(
                "payload of {padded_len} bytes overruns enclosing limit by {}",
                payload_end - data.len()
            ),
        ));
    }

    let body = if hdr.type_tag == 0 {
        let region = &data[payload_start..payload_end];
        let children = Decoder::with_base(region, base + payload_start).collect::<Result<Vec<_>, _>>()?;
        Body::Container(children)
    } else {
        Body::Leaf(data[payload_start..payload_start + data_len].to_vec())
    };

    Ok(RawRecord {
        fourcc: hdr.fourcc,
        type_tag: hdr.type_tag,
        size: hdr.size,
        repeat: hdr.repeat,
        offset: base + pos,
        body,
    })
}

/// Lazily decodes the top-level records of a buffer.
///
/// Each yielded record is fully decoded, children included. The first error
/// ends iteration.
pub struct Decoder<'a> {
    data: &'a [u8],
    base: usize,
    pos: usize,
    failed: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    fn with_base(data: &'a [u8], base: usize) -> Self {
        Decoder {
            data,
            base,
            pos: 0,
            failed: false,
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<RawRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        match decode_record(self.data, self.pos, self.base) {
            Ok(record) => {
                self.pos += record.span();
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

pub fn decode(data: &[u8]) -> Decoder<'_> {
    Decoder::new(data)
}

/// Eagerly decode a whole buffer, failing on the first malformed record.
pub fn decode_all(data: &[u8]) -> Result<Vec<RawRecord>, Error> {
    decode(data).collect()
}

/// Decoded top-level records of one metadata stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gpmd {
    records: Vec<RawRecord>,
}

impl Gpmd {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        Ok(Gpmd { records: decode_all(data)? })
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<RawRecord>> for Gpmd {
    fn from(records: Vec<RawRecord>) -> Self {
        Gpmd { records }
    }
}
