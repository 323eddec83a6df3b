use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::point::{Orientation, Point, Point3, Quaternion};

/// Names of the values an [`Entry`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Stream time of the sample, milliseconds.
    Timestamp,
    Dop,
    Packet,
    PacketCount,
    PacketIndex,
    Point,
    /// Receiver-reported 2D speed, m/s.
    Speed,
    Alt,
    GpsFix,
    GpsLock,
    Accl,
    Grav,
    Cori,
    Ori,
    /// Speed computed from successive positions, m/s.
    CSpeed,
    Dist,
    Time,
    Azi,
    Cog,
    Codo,
    CGrad,
    BadGrad,
    Custom(&'static str),
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Timestamp => "timestamp",
            Field::Dop => "dop",
            Field::Packet => "packet",
            Field::PacketCount => "packet_count",
            Field::PacketIndex => "packet_index",
            Field::Point => "point",
            Field::Speed => "speed",
            Field::Alt => "alt",
            Field::GpsFix => "gpsfix",
            Field::GpsLock => "gpslock",
            Field::Accl => "accl",
            Field::Grav => "grav",
            Field::Cori => "cori",
            Field::Ori => "ori",
            Field::CSpeed => "cspeed",
            Field::Dist => "dist",
            Field::Time => "time",
            Field::Azi => "azi",
            Field::Cog => "cog",
            Field::Codo => "codo",
            Field::CGrad => "cgrad",
            Field::BadGrad => "bad_grad",
            Field::Custom(name) => *name,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Point(Point),
    Point3(Point3),
    Quaternion(Quaternion),
    Orientation(Orientation),
    /// Opaque; never interpolated.
    Text(String),
}

impl FieldValue {
    /// Blend towards `other`. `None` when the two are not the same kind or
    /// the kind does not interpolate.
    fn lerp(&self, other: &FieldValue, t: f64) -> Option<FieldValue> {
        Some(match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => FieldValue::Number(a + (b - a) * t),
            (FieldValue::Point(a), FieldValue::Point(b)) => FieldValue::Point(a.lerp(b, t)),
            (FieldValue::Point3(a), FieldValue::Point3(b)) => FieldValue::Point3(a.lerp(b, t)),
            (FieldValue::Quaternion(a), FieldValue::Quaternion(b)) => FieldValue::Quaternion(a.lerp(b, t)),
            (FieldValue::Orientation(a), FieldValue::Orientation(b)) => FieldValue::Orientation(a.lerp(b, t)),
            _ => return None,
        })
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<Point> for FieldValue {
    fn from(v: Point) -> Self {
        FieldValue::Point(v)
    }
}

impl From<Point3> for FieldValue {
    fn from(v: Point3) -> Self {
        FieldValue::Point3(v)
    }
}

impl From<Quaternion> for FieldValue {
    fn from(v: Quaternion) -> Self {
        FieldValue::Quaternion(v)
    }
}

impl From<Orientation> for FieldValue {
    fn from(v: Orientation) -> Self {
        FieldValue::Orientation(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// A batch of field changes produced by a processing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Updates(Vec<(Field, Option<FieldValue>)>);

impl Updates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.0.push((field, Some(value.into())));
        self
    }

    pub fn set_opt(mut self, field: Field, value: Option<FieldValue>) -> Self {
        self.0.push((field, value));
        self
    }

    pub fn remove(mut self, field: Field) -> Self {
        self.0.push((field, None));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One sample: a wall-clock time plus whichever fields the stream provided.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub dt: DateTime<Utc>,
    fields: BTreeMap<Field, FieldValue>,
}

impl Entry {
    pub fn new(dt: DateTime<Utc>) -> Self {
        Entry {
            dt,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: Field, value: impl Into<FieldValue>) {
        self.fields.insert(field, value.into());
    }

    pub fn remove(&mut self, field: Field) -> Option<FieldValue> {
        self.fields.remove(&field)
    }

    pub fn apply(&mut self, updates: Updates) {
        for (field, value) in updates.0 {
            match value {
                Some(v) => {
                    self.fields.insert(field, v);
                }
                None => {
                    self.fields.remove(&field);
                }
            }
        }
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        match self.get(field)? {
            FieldValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn point(&self) -> Option<Point> {
        match self.get(Field::Point)? {
            FieldValue::Point(p) => Some(*p),
            _ => None,
        }
    }

    pub fn point3(&self, field: Field) -> Option<Point3> {
        match self.get(field)? {
            FieldValue::Point3(p) => Some(*p),
            _ => None,
        }
    }

    pub fn quaternion(&self, field: Field) -> Option<Quaternion> {
        match self.get(field)? {
            FieldValue::Quaternion(q) => Some(*q),
            _ => None,
        }
    }

    pub fn orientation(&self, field: Field) -> Option<Orientation> {
        match self.get(field)? {
            FieldValue::Orientation(o) => Some(*o),
            _ => None,
        }
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        match self.get(field)? {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Synthesize the entry a fraction `t` of the way from `self` to `later`.
    ///
    /// Fields present on both sides are blended; fields present on one side
    /// only are dropped. Text is copied from `self`.
    pub fn interpolate(&self, later: &Entry, t: f64) -> Entry {
        let span = later.dt - self.dt;
        let offset = TimeDelta::microseconds(
            (span.num_microseconds().unwrap_or(i64::MAX) as f64 * t) as i64,
        );

        let fields = self
            .fields
            .iter()
            .filter_map(|(field, value)| {
                let blended = match value {
                    FieldValue::Text(_) => Some(value.clone()),
                    _ => value.lerp(later.fields.get(field)?, t),
                };
                blended.map(|v| (*field, v))
            })
            .collect();

        Entry {
            dt: self.dt + offset,
            fields,
        }
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("dt", &self.dt)?;
        for (field, value) in &self.fields {
            map.serialize_entry(field.name(), value)?;
        }
        map.end()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry: {}", self.dt.to_rfc3339())?;
        for (field, value) in &self.fields {
            write!(f, " {field}={value:?}")?;
        }
        Ok(())
    }
}
