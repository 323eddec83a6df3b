//! Push-style traversal of a decoded record tree.
//!
//! For every container the walker asks the current visitor whether it wants
//! to descend, passing the identifiers of the container's immediate children.
//! A visitor that returns `None` has the whole subtree skipped. Leaves are
//! handed to [`Visitor::visit_item`]; visitors match on the identifiers they
//! understand and ignore the rest, so unfamiliar firmware fields pass through.
//! Once a container's children are exhausted the walker calls
//! [`Visitor::end`] on the visitor that handled it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::diagnostics::{Diagnostics, Source};
use crate::gpmf::{Contents, FourCC, Gpmd, RawRecord};
use crate::interpret::{interpret, is_known, Gps5, GpsFix, Scale, Value};
use crate::Error;

pub trait Visitor {
    /// Entry hook for a container. Return a visitor for its children, or
    /// `None` to skip it.
    fn visit_container(&mut self, _fourcc: FourCC, _contents: &Contents) -> Option<&mut dyn Visitor> {
        None
    }

    fn visit_item(&mut self, _item: &RawRecord) -> Result<(), Error> {
        Ok(())
    }

    /// Called on the child visitor after the last record of its container.
    fn end(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

pub fn walk(records: &[RawRecord], visitor: &mut dyn Visitor) -> Result<(), Error> {
    for record in records {
        walk_record(record, visitor)?;
    }
    Ok(())
}

fn walk_record(record: &RawRecord, visitor: &mut dyn Visitor) -> Result<(), Error> {
    if !record.is_container() {
        return visitor.visit_item(record);
    }

    let contents = record.itemset();
    if let Some(child) = visitor.visit_container(record.fourcc, &contents) {
        walk(record.children(), child)?;
        child.end()?;
    }
    Ok(())
}

impl Gpmd {
    /// Walk every record with `visitor` and hand it back for inspection.
    pub fn accept<V: Visitor>(&self, mut visitor: V) -> Result<V, Error> {
        walk(self.records(), &mut visitor)?;
        Ok(visitor)
    }
}

/// Is there any stream carrying the wanted identifier?
#[derive(Debug, Clone)]
pub struct StreamFinder {
    wanted: FourCC,
    found: bool,
}

impl StreamFinder {
    pub fn new(wanted: FourCC) -> Self {
        StreamFinder { wanted, found: false }
    }

    pub fn found(&self) -> bool {
        self.found
    }
}

impl Visitor for StreamFinder {
    fn visit_container(&mut self, fourcc: FourCC, contents: &Contents) -> Option<&mut dyn Visitor> {
        match fourcc {
            FourCC::DEVC if !self.found => Some(self),
            FourCC::STRM => {
                self.found |= contents.contains(&self.wanted);
                None
            }
            _ => None,
        }
    }
}

/// Device-clock time of the first stream carrying shutter data. Sensor
/// packets are timed relative to this.
#[derive(Debug, Clone, Default)]
pub struct FirstShutTimestamp {
    timestamp: Option<i64>,
    in_shutter_stream: bool,
}

impl FirstShutTimestamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device clock in microseconds.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

impl Visitor for FirstShutTimestamp {
    fn visit_container(&mut self, fourcc: FourCC, contents: &Contents) -> Option<&mut dyn Visitor> {
        if self.timestamp.is_some() {
            return None;
        }
        match fourcc {
            FourCC::DEVC => Some(self),
            FourCC::STRM if contents.contains(&FourCC::SHUT) => {
                self.in_shutter_stream = true;
                Some(self)
            }
            _ => None,
        }
    }

    fn visit_item(&mut self, item: &RawRecord) -> Result<(), Error> {
        if item.fourcc == FourCC::STMP && self.in_shutter_stream && self.timestamp.is_none() {
            self.timestamp = interpret(item, None)?.as_integer();
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), Error> {
        self.in_shutter_stream = false;
        Ok(())
    }
}

/// Receivers tend to flag a lock a couple of packets before the position is
/// trustworthy, so this takes the date of the third locked GPS5 packet.
#[derive(Debug, Clone, Default)]
pub struct FirstLockedGpsTime {
    count: usize,
    fix: Option<GpsFix>,
    scale: Option<Scale>,
    basetime: Option<DateTime<Utc>>,
    point: Option<Gps5>,
}

impl FirstLockedGpsTime {
    const LOCKED_PACKETS: usize = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_time(&self) -> Option<DateTime<Utc>> {
        self.basetime
    }

    pub fn point(&self) -> Option<Gps5> {
        self.point
    }
}

impl Visitor for FirstLockedGpsTime {
    fn visit_container(&mut self, fourcc: FourCC, contents: &Contents) -> Option<&mut dyn Visitor> {
        match fourcc {
            FourCC::DEVC if self.basetime.is_none() => Some(self),
            FourCC::STRM if contents.contains(&FourCC::GPS5) => Some(self),
            _ => None,
        }
    }

    fn visit_item(&mut self, item: &RawRecord) -> Result<(), Error> {
        match item.fourcc {
            FourCC::GPSF => {
                if let Value::Fix(fix) = interpret(item, None)? {
                    self.fix = Some(fix);
                }
            }
            FourCC::GPSU => {
                if self.basetime.is_none() && self.fix.is_some_and(GpsFix::is_locked) {
                    self.count += 1;
                    if self.count == Self::LOCKED_PACKETS {
                        if let Value::Timestamp(ts) = interpret(item, None)? {
                            self.basetime = Some(ts);
                        }
                    }
                }
            }
            FourCC::SCAL => {
                self.scale = Scale::try_from(&interpret(item, None)?).ok();
            }
            FourCC::GPS5 if self.basetime.is_some() && self.point.is_none() => {
                if let Value::Gps5(points) = interpret(item, self.scale.as_ref())? {
                    self.point = points.first().copied();
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Writes an indented outline of the tree to a diagnostics sink.
pub struct DumpVisitor {
    sink: Arc<dyn Diagnostics>,
    indent: usize,
}

impl DumpVisitor {
    pub fn new(sink: Arc<dyn Diagnostics>) -> Self {
        DumpVisitor { sink, indent: 0 }
    }

    fn line(&self, text: &str) {
        let pad = "  ".repeat(self.indent);
        self.sink.info(Source::Decode, &format!("{pad}{text}"));
    }
}

impl Visitor for DumpVisitor {
    fn visit_container(&mut self, fourcc: FourCC, contents: &Contents) -> Option<&mut dyn Visitor> {
        self.line(&format!("{fourcc} ({} kinds)", contents.len()));
        self.indent += 1;
        Some(self)
    }

    fn visit_item(&mut self, item: &RawRecord) -> Result<(), Error> {
        let header = format!(
            "{} type={} size={} repeat={}",
            item.fourcc,
            item.type_char().unwrap_or('-'),
            item.size,
            item.repeat
        );
        // Compound data is interpreted without its scale, so only show scalars.
        let shown = if is_known(item.fourcc) {
            match interpret(item, None) {
                Ok(v @ (Value::Text(_) | Value::Timestamp(_) | Value::Integer(_) | Value::Float(_) | Value::Fix(_))) => {
                    format!("{header} = {v:?}")
                }
                _ => header,
            }
        } else {
            header
        };
        self.line(&shown);
        Ok(())
    }

    fn end(&mut self) -> Result<(), Error> {
        self.indent = self.indent.saturating_sub(1);
        Ok(())
    }
}
