//! Per-stream extraction: gather each `STRM` of a wanted kind into a
//! [`StreamRecord`], then turn records into timed [`Entry`] values.

use std::mem;

use chrono::{DateTime, TimeDelta, Utc};

use crate::diagnostics::{SharedDiagnostics, Source};
use crate::entry::{Entry, Field, FieldValue};
use crate::filters::{GpsLockComponents, GpsLockFilter};
use crate::framemeta::FrameMeta;
use crate::gpmf::{Contents, FourCC, RawRecord};
use crate::interpret::{interpret, interpret_with, Context, Gps5, Gps9, GpsFix, Scale, Value, Vector3};
use crate::point::{Point, Point3, Quaternion};
use crate::timeunit::Timeunit;
use crate::timing::PacketTimeCalculator;
use crate::visit::Visitor;
use crate::Error;

/// Everything one `STRM` said about its samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamRecord {
    /// `STMP`, device clock.
    pub timestamp: Option<Timeunit>,
    /// `TSMP`, samples emitted by this stream so far.
    pub samples_total: Option<i64>,
    pub basetime: Option<DateTime<Utc>>,
    pub fix: Option<GpsFix>,
    pub dop: Option<f64>,
    pub temperature: Option<f64>,
    pub value: Option<Value>,
}

impl StreamRecord {
    pub fn gps5(&self) -> &[Gps5] {
        match &self.value {
            Some(Value::Gps5(v)) => v,
            _ => &[],
        }
    }

    pub fn gps9(&self) -> &[Gps9] {
        match &self.value {
            Some(Value::Gps9(v)) => v,
            _ => &[],
        }
    }

    pub fn xyz(&self) -> &[Point3] {
        match &self.value {
            Some(Value::Xyz(v)) => v,
            _ => &[],
        }
    }

    pub fn vectors(&self) -> &[Vector3] {
        match &self.value {
            Some(Value::Vector(v)) => v,
            _ => &[],
        }
    }

    pub fn quaternions(&self) -> &[Quaternion] {
        match &self.value {
            Some(Value::Quaternion(v)) => v,
            _ => &[],
        }
    }
}

/// Collects the items of one `STRM`. `SCAL` and `TYPE` apply to the payload
/// that follows them in the same stream.
#[derive(Debug)]
struct StreamReader {
    wanted: FourCC,
    scale: Option<Scale>,
    types: Option<String>,
    current: StreamRecord,
    done: Vec<StreamRecord>,
}

impl StreamReader {
    fn new(wanted: FourCC) -> Self {
        StreamReader {
            wanted,
            scale: None,
            types: None,
            current: StreamRecord::default(),
            done: Vec::new(),
        }
    }

    fn begin(&mut self) {
        self.scale = None;
        self.types = None;
        self.current = StreamRecord::default();
    }
}

impl Visitor for StreamReader {
    fn visit_item(&mut self, item: &RawRecord) -> Result<(), Error> {
        let record = &mut self.current;
        match item.fourcc {
            FourCC::STMP => record.timestamp = interpret(item, None)?.as_integer().map(Timeunit::from_micros),
            FourCC::TSMP => record.samples_total = interpret(item, None)?.as_integer(),
            FourCC::SCAL => self.scale = Scale::try_from(&interpret(item, None)?).ok(),
            FourCC::TYPE => self.types = interpret(item, None)?.as_text().map(str::to_string),
            FourCC::GPSU => {
                if let Value::Timestamp(ts) = interpret(item, None)? {
                    record.basetime = Some(ts);
                }
            }
            FourCC::GPSF => {
                if let Value::Fix(fix) = interpret(item, None)? {
                    record.fix = Some(fix);
                }
            }
            FourCC::GPSP => record.dop = interpret(item, None)?.as_float(),
            FourCC::TMPC => record.temperature = interpret(item, None)?.as_float(),
            f if f == self.wanted => {
                let ctx = Context {
                    scale: self.scale.as_ref(),
                    types: self.types.as_deref(),
                };
                record.value = Some(interpret_with(item, &ctx)?);
            }
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), Error> {
        self.done.push(mem::take(&mut self.current));
        Ok(())
    }
}

/// One stream record and the index of the `DEVC` packet it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub index: usize,
    pub record: StreamRecord,
}

/// Gathers every stream of one kind, numbering packets by `DEVC`.
#[derive(Debug)]
pub struct PacketVisitor {
    reader: StreamReader,
    counter: usize,
    packets: Vec<Packet>,
}

impl PacketVisitor {
    pub fn new(wanted: FourCC) -> Self {
        PacketVisitor {
            reader: StreamReader::new(wanted),
            counter: 0,
            packets: Vec::new(),
        }
    }

    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }
}

impl Visitor for PacketVisitor {
    fn visit_container(&mut self, fourcc: FourCC, contents: &Contents) -> Option<&mut dyn Visitor> {
        match fourcc {
            FourCC::DEVC => Some(self),
            FourCC::STRM if contents.contains(&self.reader.wanted) => {
                self.reader.begin();
                Some(&mut self.reader)
            }
            _ => None,
        }
    }

    fn end(&mut self) -> Result<(), Error> {
        let index = self.counter;
        self.packets
            .extend(self.reader.done.drain(..).map(|record| Packet { index, record }));
        self.counter += 1;
        Ok(())
    }
}

const SHORT_PACKET: usize = 10;

fn gps9_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH + TimeDelta::seconds(946_684_800)
}

fn seconds(s: f64) -> TimeDelta {
    TimeDelta::microseconds((s * 1_000_000.0) as i64)
}

/// Turns GPS packets into filtered, timed entries.
pub struct GpsConverter {
    calculator: Box<dyn PacketTimeCalculator>,
    filter: Box<dyn GpsLockFilter>,
    diagnostics: SharedDiagnostics,
    total_samples: usize,
    short_packets: usize,
}

impl GpsConverter {
    pub fn new(
        calculator: Box<dyn PacketTimeCalculator>,
        filter: Box<dyn GpsLockFilter>,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        GpsConverter {
            calculator,
            filter,
            diagnostics,
            total_samples: 0,
            short_packets: 0,
        }
    }

    pub fn convert_gps5(&mut self, packet: &Packet, store: &mut FrameMeta) -> Result<(), Error> {
        let record = &packet.record;
        let points = record.gps5();
        if points.is_empty() {
            return Ok(());
        }
        let Some(basetime) = record.basetime else {
            self.diagnostics.warn(
                Source::Gps,
                &format!("No GPS Date :- Skipping Record with {} samples", points.len()),
            );
            return Ok(());
        };

        if points.len() <= SHORT_PACKET {
            self.short_packets += 1;
            if self.short_packets % 10 == 0 {
                self.diagnostics.warn(
                    Source::Gps,
                    &format!(
                        "Have seen {} suspicious GPS packets. Last was {}/18. GPS is misbehaving?",
                        self.short_packets,
                        points.len()
                    ),
                );
            }
        }

        let times = self
            .calculator
            .next_packet(record.timestamp, self.total_samples, points.len())?;
        let fix = record.fix.unwrap_or(GpsFix::Unknown);

        for (index, p) in points.iter().enumerate() {
            let (frame_time, offset) = times.at(index);
            let point = Point::new(p.lat, p.lon);
            let calculated = self.filter.submit(&GpsLockComponents {
                fix,
                point,
                speed: p.speed,
                dop: record.dop.unwrap_or(0.0),
            });

            let mut entry = Entry::new(basetime + offset.to_delta())
                .with(Field::Timestamp, frame_time.millis())
                .with(Field::Packet, packet.index as f64)
                .with(Field::PacketCount, points.len() as f64)
                .with(Field::PacketIndex, index as f64)
                .with(Field::Point, point)
                .with(Field::Speed, p.speed)
                .with(Field::Alt, p.alt)
                .with(Field::GpsFix, calculated.value() as f64)
                .with(Field::GpsLock, calculated.value() as f64);
            if let Some(dop) = record.dop {
                entry.set(Field::Dop, dop);
            }
            store.insert(frame_time, entry);
        }
        self.total_samples += points.len();
        Ok(())
    }

    pub fn convert_gps9(&mut self, packet: &Packet, store: &mut FrameMeta) -> Result<(), Error> {
        let points = packet.record.gps9();
        if points.is_empty() {
            return Ok(());
        }

        let times = self
            .calculator
            .next_packet(packet.record.timestamp, self.total_samples, points.len())?;

        for (index, p) in points.iter().enumerate() {
            let (frame_time, _) = times.at(index);
            let point = Point::new(p.lat, p.lon);
            let calculated = self.filter.submit(&GpsLockComponents {
                fix: p.fix,
                point,
                speed: p.speed,
                dop: p.dop,
            });

            let dt = gps9_epoch() + TimeDelta::days(p.days as i64) + seconds(p.secs);
            let entry = Entry::new(dt)
                .with(Field::Timestamp, frame_time.millis())
                .with(Field::Dop, p.dop)
                .with(Field::Packet, packet.index as f64)
                .with(Field::PacketCount, points.len() as f64)
                .with(Field::PacketIndex, index as f64)
                .with(Field::Point, point)
                .with(Field::Speed, p.speed)
                .with(Field::Alt, p.alt)
                .with(Field::GpsFix, calculated.value() as f64)
                .with(Field::GpsLock, calculated.value() as f64);
            store.insert(frame_time, entry);
        }
        self.total_samples += points.len();
        Ok(())
    }
}

/// Which sensor a [`SensorConverter`] handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    Accl,
    Grav,
    Cori,
}

impl Sensor {
    pub fn fourcc(self) -> FourCC {
        match self {
            Sensor::Accl => FourCC::ACCL,
            Sensor::Grav => FourCC::GRAV,
            Sensor::Cori => FourCC::CORI,
        }
    }

    fn entries(self, record: &StreamRecord) -> Vec<Vec<(Field, FieldValue)>> {
        match self {
            Sensor::Accl => record.xyz().iter().map(|p| vec![(Field::Accl, (*p).into())]).collect(),
            Sensor::Grav => record
                .vectors()
                .iter()
                .map(|v| vec![(Field::Grav, Point3::new(v.a, -v.c, -v.b).into())])
                .collect(),
            Sensor::Cori => record
                .quaternions()
                .iter()
                .map(|q| vec![(Field::Cori, (*q).into()), (Field::Ori, q.euler().into())])
                .collect(),
        }
    }
}

/// Turns accelerometer, gravity or orientation packets into entries timed
/// from the epoch.
pub struct SensorConverter {
    sensor: Sensor,
    calculator: Box<dyn PacketTimeCalculator>,
    total_samples: usize,
}

impl SensorConverter {
    pub fn new(sensor: Sensor, calculator: Box<dyn PacketTimeCalculator>) -> Self {
        SensorConverter {
            sensor,
            calculator,
            total_samples: 0,
        }
    }

    pub fn convert(&mut self, packet: &Packet, store: &mut FrameMeta) -> Result<(), Error> {
        let samples = self.sensor.entries(&packet.record);
        if samples.is_empty() {
            return Ok(());
        }

        let times = self
            .calculator
            .next_packet(packet.record.timestamp, self.total_samples, samples.len())?;

        for (index, fields) in samples.iter().enumerate() {
            let (frame_time, _) = times.at(index);
            let mut entry = Entry::new(DateTime::UNIX_EPOCH + frame_time.to_delta())
                .with(Field::Timestamp, frame_time.millis())
                .with(Field::Packet, packet.index as f64)
                .with(Field::PacketIndex, index as f64);
            for (field, value) in fields {
                entry.set(*field, value.clone());
            }
            store.insert(frame_time, entry);
        }
        self.total_samples += samples.len();
        Ok(())
    }
}
