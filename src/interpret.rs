//! Typed interpretation of leaf records.
//!
//! Each known identifier maps to one decode function (see [`lookup`]).
//! Numbers are big-endian; compound values are divided component-wise by the
//! stream's `SCAL` vector.

use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::gpmf::{FourCC, RawRecord};
use crate::point::{Point3, Quaternion};
use crate::Error;

/// Element encodings from the record header's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    I8,
    U8,
    Char,
    F64,
    F32,
    FourCC,
    Guid,
    I64,
    U64,
    I32,
    U32,
    /// Q15.16 fixed point.
    Fixed32,
    /// Q31.32 fixed point.
    Fixed64,
    I16,
    U16,
    UtcDate,
    /// Structure described by a sibling `TYPE` record.
    Complex,
}

impl ElementType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            b'b' => ElementType::I8,
            b'B' => ElementType::U8,
            b'c' => ElementType::Char,
            b'd' => ElementType::F64,
            b'f' => ElementType::F32,
            b'F' => ElementType::FourCC,
            b'G' => ElementType::Guid,
            b'j' => ElementType::I64,
            b'J' => ElementType::U64,
            b'l' => ElementType::I32,
            b'L' => ElementType::U32,
            b'q' => ElementType::Fixed32,
            b'Q' => ElementType::Fixed64,
            b's' => ElementType::I16,
            b'S' => ElementType::U16,
            b'U' => ElementType::UtcDate,
            b'?' => ElementType::Complex,
            _ => return None,
        })
    }

    /// Byte width of one element. `Complex` has no intrinsic width.
    pub fn width(self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 | ElementType::Char => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::F32 | ElementType::I32 | ElementType::U32 | ElementType::Fixed32 | ElementType::FourCC => 4,
            ElementType::F64 | ElementType::I64 | ElementType::U64 | ElementType::Fixed64 => 8,
            ElementType::Guid | ElementType::UtcDate => 16,
            ElementType::Complex => 0,
        }
    }
}

/// Positioning lock state, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GpsFix {
    No = 0,
    Unknown = 1,
    Lock2d = 2,
    Lock3d = 3,
}

impl GpsFix {
    pub fn from_value(v: i64) -> Option<Self> {
        match v {
            0 => Some(GpsFix::No),
            1 => Some(GpsFix::Unknown),
            2 => Some(GpsFix::Lock2d),
            3 => Some(GpsFix::Lock3d),
            _ => None,
        }
    }

    pub fn value(self) -> i64 {
        self as i64
    }

    pub fn is_locked(self) -> bool {
        matches!(self, GpsFix::Lock2d | GpsFix::Lock3d)
    }

    pub fn name(self) -> &'static str {
        match self {
            GpsFix::No => "NO",
            GpsFix::Unknown => "UNKNOWN",
            GpsFix::Lock2d => "LOCK_2D",
            GpsFix::Lock3d => "LOCK_3D",
        }
    }
}

/// One `GPS5` sample: degrees, metres, metres/second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gps5 {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub speed3d: f64,
}

/// One `GPS9` sample; carries its own date, DOP and fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gps9 {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub speed3d: f64,
    /// Days since 2000-01-01.
    pub days: f64,
    /// Seconds since midnight.
    pub secs: f64,
    pub dop: f64,
    pub fix: GpsFix,
}

/// Gravity direction, in file component order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Vector3 {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Text(String),
    Timestamp(DateTime<Utc>),
    Integer(i64),
    Float(f64),
    List(Vec<f64>),
    Fix(GpsFix),
    Gps5(Vec<Gps5>),
    Gps9(Vec<Gps9>),
    Xyz(Vec<Point3>),
    Vector(Vec<Vector3>),
    Quaternion(Vec<Quaternion>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Per-field divisors from a stream's `SCAL` record.
#[derive(Debug, Clone, PartialEq)]
pub struct Scale(Vec<f64>);

impl Scale {
    pub fn new(divisors: Vec<f64>) -> Self {
        Scale(divisors)
    }

    pub fn divisors(&self) -> &[f64] {
        &self.0
    }

    /// Divisors for a compound of `arity` components. A single divisor is
    /// broadcast; otherwise there must be at least one per component.
    pub fn for_arity(&self, fourcc: FourCC, arity: usize) -> Result<Vec<f64>, Error> {
        match self.0.len() {
            1 => Ok(vec![self.0[0]; arity]),
            n if n >= arity => Ok(self.0[..arity].to_vec()),
            n => Err(Error::ScaleMismatch {
                fourcc,
                arity,
                scale_len: n,
            }),
        }
    }
}

impl TryFrom<&Value> for Scale {
    type Error = Value;

    fn try_from(value: &Value) -> Result<Self, Value> {
        match value {
            Value::List(v) => Ok(Scale(v.clone())),
            Value::Integer(v) => Ok(Scale(vec![*v as f64])),
            Value::Float(v) => Ok(Scale(vec![*v])),
            other => Err(other.clone()),
        }
    }
}

/// Extra record-level context some identifiers need.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context<'a> {
    pub scale: Option<&'a Scale>,
    /// Component types from a `TYPE` record, for complex (`?`) records.
    pub types: Option<&'a str>,
}

pub type InterpretFn = fn(&RawRecord, &Context<'_>) -> Result<Value, Error>;

/// The interpreter registry.
pub fn lookup(fourcc: FourCC) -> Option<InterpretFn> {
    let f: InterpretFn = match fourcc {
        FourCC::ACCL | FourCC::GYRO => interpret_xyz,
        FourCC::GRAV => interpret_vector,
        FourCC::CORI | FourCC::IORI => interpret_quaternion,
        FourCC::GPS5 => interpret_gps5,
        FourCC::GPS9 => interpret_gps9,
        FourCC::GPSF => interpret_gps_fix,
        FourCC::GPSP => interpret_gps_precision,
        FourCC::GPSU => interpret_timestamp,
        FourCC::DVNM | FourCC::SIUN | FourCC::UNIT | FourCC::STNM | FourCC::ORIN | FourCC::TYPE => {
            interpret_string
        }
        FourCC::STMP | FourCC::TSMP | FourCC::TICK | FourCC::DVID | FourCC::EMPT => interpret_integer,
        FourCC::TMPC => interpret_float,
        FourCC::SCAL | FourCC::MWET | FourCC::WNDM | FourCC::SHUT => interpret_list,
        _ => return None,
    };
    Some(f)
}

pub fn is_known(fourcc: FourCC) -> bool {
    lookup(fourcc).is_some()
}

pub fn interpret(record: &RawRecord, scale: Option<&Scale>) -> Result<Value, Error> {
    interpret_with(record, &Context { scale, types: None })
}

pub fn interpret_with(record: &RawRecord, ctx: &Context<'_>) -> Result<Value, Error> {
    let f = lookup(record.fourcc).ok_or(Error::UnknownField { fourcc: record.fourcc })?;
    f(record, ctx)
}

fn element_type(record: &RawRecord) -> Result<ElementType, Error> {
    ElementType::from_tag(record.type_tag).ok_or_else(|| {
        Error::format(
            record.fourcc,
            record.offset,
            format!("unknown element type {:?}", record.type_tag as char),
        )
    })
}

fn read_number(fourcc: FourCC, offset: usize, ty: ElementType, b: &[u8]) -> Result<f64, Error> {
    Ok(match ty {
        ElementType::I8 => b[0] as i8 as f64,
        ElementType::U8 => b[0] as f64,
        ElementType::I16 => BigEndian::read_i16(b) as f64,
        ElementType::U16 => BigEndian::read_u16(b) as f64,
        ElementType::I32 => BigEndian::read_i32(b) as f64,
        ElementType::U32 => BigEndian::read_u32(b) as f64,
        ElementType::I64 => BigEndian::read_i64(b) as f64,
        ElementType::U64 => BigEndian::read_u64(b) as f64,
        ElementType::F32 => BigEndian::read_f32(b) as f64,
        ElementType::F64 => BigEndian::read_f64(b),
        ElementType::Fixed32 => BigEndian::read_i32(b) as f64 / 65_536.0,
        ElementType::Fixed64 => BigEndian::read_i64(b) as f64 / 4_294_967_296.0,
        other => {
            return Err(Error::format(fourcc, offset, format!("{other:?} elements are not numeric")));
        }
    })
}

fn read_integer(fourcc: FourCC, offset: usize, ty: ElementType, b: &[u8]) -> Result<i64, Error> {
    Ok(match ty {
        ElementType::I8 => b[0] as i8 as i64,
        ElementType::U8 => b[0] as i64,
        ElementType::I16 => BigEndian::read_i16(b) as i64,
        ElementType::U16 => BigEndian::read_u16(b) as i64,
        ElementType::I32 => BigEndian::read_i32(b) as i64,
        ElementType::U32 => BigEndian::read_u32(b) as i64,
        ElementType::I64 => BigEndian::read_i64(b),
        ElementType::U64 => BigEndian::read_u64(b) as i64,
        other => {
            return Err(Error::format(fourcc, offset, format!("{other:?} elements are not integers")));
        }
    })
}

/// First element of a record, as an exact integer.
fn atom(record: &RawRecord) -> Result<i64, Error> {
    let ty = element_type(record)?;
    let w = ty.width();
    let data = record.data();
    if w == 0 || data.len() < w {
        return Err(Error::format(record.fourcc, record.offset, "record holds no complete element"));
    }
    read_integer(record.fourcc, record.offset, ty, &data[..w])
}

/// Every element of a record, flattened and unscaled.
fn elements(record: &RawRecord) -> Result<Vec<f64>, Error> {
    let ty = element_type(record)?;
    let w = ty.width();
    if w == 0 {
        return Err(Error::format(record.fourcc, record.offset, "complex record read as a flat list"));
    }
    record
        .data()
        .chunks_exact(w)
        .map(|b| read_number(record.fourcc, record.offset, ty, b))
        .collect()
}

fn component_types(record: &RawRecord, ctx: &Context<'_>) -> Result<Vec<ElementType>, Error> {
    let ty = element_type(record)?;
    if ty == ElementType::Complex {
        let Some(types) = ctx.types else {
            return Err(Error::format(record.fourcc, record.offset, "complex record without TYPE"));
        };
        return types
            .bytes()
            .map(|t| {
                ElementType::from_tag(t)
                    .filter(|e| *e != ElementType::Complex)
                    .ok_or_else(|| Error::format(record.fourcc, record.offset, format!("bad TYPE member {:?}", t as char)))
            })
            .collect();
    }
    let w = ty.width();
    if w == 0 || record.size as usize % w != 0 {
        return Err(Error::format(
            record.fourcc,
            record.offset,
            format!("struct size {} is not a multiple of {ty:?}", record.size),
        ));
    }
    Ok(vec![ty; record.size as usize / w])
}

/// Decode `repeat` structures, each divided component-wise by the scale.
fn scaled_structs(record: &RawRecord, ctx: &Context<'_>) -> Result<Vec<Vec<f64>>, Error> {
    let types = component_types(record, ctx)?;
    let width: usize = types.iter().map(|t| t.width()).sum();
    if width != record.size as usize || width == 0 {
        return Err(Error::format(
            record.fourcc,
            record.offset,
            format!("TYPE describes {width} bytes but struct size is {}", record.size),
        ));
    }
    let divisors = match ctx.scale {
        Some(scale) => scale.for_arity(record.fourcc, types.len())?,
        None => vec![1.0; types.len()],
    };

    record
        .data()
        .chunks_exact(width)
        .map(|chunk| {
            let mut pos = 0;
            types
                .iter()
                .zip(&divisors)
                .map(|(ty, d)| {
                    let w = ty.width();
                    let v = read_number(record.fourcc, record.offset, *ty, &chunk[pos..pos + w])?;
                    pos += w;
                    Ok(v / d)
                })
                .collect()
        })
        .collect()
}

fn structs_of<const N: usize>(record: &RawRecord, ctx: &Context<'_>) -> Result<Vec<[f64; N]>, Error> {
    scaled_structs(record, ctx)?
        .into_iter()
        .map(|s| {
            <[f64; N]>::try_from(s.as_slice()).map_err(|_| {
                Error::format(
                    record.fourcc,
                    record.offset,
                    format!("expected {N} components, found {}", s.len()),
                )
            })
        })
        .collect()
}

fn interpret_string(record: &RawRecord, _: &Context<'_>) -> Result<Value, Error> {
    let s = String::from_utf8_lossy(record.data());
    Ok(Value::Text(s.trim_end_matches('\0').to_string()))
}

fn interpret_timestamp(record: &RawRecord, _: &Context<'_>) -> Result<Value, Error> {
    let text = String::from_utf8_lossy(record.data());
    let text = text.trim_end_matches('\0');
    NaiveDateTime::parse_from_str(text, "%y%m%d%H%M%S%.f")
        .map(|dt| Value::Timestamp(dt.and_utc()))
        .map_err(|_| Error::Timestamp {
            fourcc: record.fourcc,
            text: text.to_string(),
        })
}

fn interpret_integer(record: &RawRecord, _: &Context<'_>) -> Result<Value, Error> {
    atom(record).map(Value::Integer)
}

fn interpret_float(record: &RawRecord, _: &Context<'_>) -> Result<Value, Error> {
    let ty = element_type(record)?;
    let w = ty.width();
    let data = record.data();
    if w == 0 || data.len() < w {
        return Err(Error::format(record.fourcc, record.offset, "record holds no complete element"));
    }
    read_number(record.fourcc, record.offset, ty, &data[..w]).map(Value::Float)
}

fn interpret_list(record: &RawRecord, _: &Context<'_>) -> Result<Value, Error> {
    elements(record).map(Value::List)
}

fn interpret_gps_fix(record: &RawRecord, _: &Context<'_>) -> Result<Value, Error> {
    let v = atom(record)?;
    GpsFix::from_value(v)
        .map(Value::Fix)
        .ok_or(Error::UnmappedEnum { fourcc: record.fourcc, value: v })
}

fn interpret_gps_precision(record: &RawRecord, _: &Context<'_>) -> Result<Value, Error> {
    Ok(Value::Float(atom(record)? as f64 / 100.0))
}

fn interpret_gps5(record: &RawRecord, ctx: &Context<'_>) -> Result<Value, Error> {
    let points = structs_of::<5>(record, ctx)?
        .into_iter()
        .map(|[lat, lon, alt, speed, speed3d]| Gps5 { lat, lon, alt, speed, speed3d })
        .collect();
    Ok(Value::Gps5(points))
}

fn interpret_gps9(record: &RawRecord, ctx: &Context<'_>) -> Result<Value, Error> {
    let points = structs_of::<9>(record, ctx)?
        .into_iter()
        .map(|[lat, lon, alt, speed, speed3d, days, secs, dop, fix]| {
            let fix = GpsFix::from_value(fix as i64).ok_or(Error::UnmappedEnum {
                fourcc: record.fourcc,
                value: fix as i64,
            })?;
            Ok(Gps9 { lat, lon, alt, speed, speed3d, days, secs, dop, fix })
        })
        .collect::<Result<_, Error>>()?;
    Ok(Value::Gps9(points))
}

fn interpret_xyz(record: &RawRecord, ctx: &Context<'_>) -> Result<Value, Error> {
    // Camera writes these axes as (y, x, z).
    let points = structs_of::<3>(record, ctx)?
        .into_iter()
        .map(|[y, x, z]| Point3 { x, y, z })
        .collect();
    Ok(Value::Xyz(points))
}

fn interpret_vector(record: &RawRecord, ctx: &Context<'_>) -> Result<Value, Error> {
    let vectors = structs_of::<3>(record, ctx)?
        .into_iter()
        .map(|[a, b, c]| Vector3 { a, b, c })
        .collect();
    Ok(Value::Vector(vectors))
}

fn interpret_quaternion(record: &RawRecord, ctx: &Context<'_>) -> Result<Value, Error> {
    let quats = structs_of::<4>(record, ctx)?
        .into_iter()
        .map(|[w, x, y, z]| Quaternion { w, x, y, z })
        .collect();
    Ok(Value::Quaternion(quats))
}
