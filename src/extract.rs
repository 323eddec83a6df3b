use std::fs;
use std::io::Read;
use std::path::Path;

use crate::config::{GpsFilterSettings, LoadFlags, VideoStreamMeta};
use crate::diagnostics::{null_diagnostics, SharedDiagnostics, Source};
use crate::entry::{Entry, Field, Updates};
use crate::filters::{standard, GpsLockFilter, NullFilter, ReasonCounter};
use crate::framemeta::FrameMeta;
use crate::gpmf::{FourCC, Gpmd};
use crate::process::kalman_point3;
use crate::streams::{GpsConverter, PacketVisitor, Sensor, SensorConverter};
use crate::timeunit::Timeunit;
use crate::timing::calculator_for;
use crate::visit::StreamFinder;
use crate::Error;

/// The stores one extraction can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Gps,
    Accl,
    Grav,
    Cori,
}

impl StreamKind {
    /// GPS always, plus whatever secondary streams `flags` asks for.
    pub fn requested(flags: LoadFlags) -> Vec<StreamKind> {
        let mut kinds = vec![StreamKind::Gps];
        if flags.accl {
            kinds.push(StreamKind::Accl);
        }
        if flags.grav {
            kinds.push(StreamKind::Grav);
        }
        if flags.cori {
            kinds.push(StreamKind::Cori);
        }
        kinds
    }

    /// Fields this kind contributes to merged GPS entries.
    pub fn merged_fields(self) -> &'static [Field] {
        match self {
            StreamKind::Gps => &[],
            StreamKind::Accl => &[Field::Accl],
            StreamKind::Grav => &[Field::Grav],
            StreamKind::Cori => &[Field::Cori, Field::Ori],
        }
    }

    /// Run this kind's extraction pass. GPS rejections are tallied in
    /// `rejections` when the options carry filter settings.
    pub fn load(self, gpmd: &Gpmd, options: &ExtractOptions, rejections: &ReasonCounter) -> Result<FrameMeta, Error> {
        match self {
            StreamKind::Gps => gps_framemeta(gpmd, options, options.lock_filter(rejections)),
            StreamKind::Accl => accl_framemeta(gpmd, options),
            StreamKind::Grav => grav_framemeta(gpmd, options),
            StreamKind::Cori => cori_framemeta(gpmd, options),
        }
    }
}

/// Inputs a caller supplies for one extraction.
#[derive(Clone)]
pub struct ExtractOptions {
    /// Needed only when the recording has no shutter-stream anchor.
    pub video: Option<VideoStreamMeta>,
    pub flags: LoadFlags,
    /// `None` passes every fix through unchanged.
    pub gps_filter: Option<GpsFilterSettings>,
    /// Stores raise `NotFound` instead of clamping.
    pub strict: bool,
    pub diagnostics: SharedDiagnostics,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            video: None,
            flags: LoadFlags::default(),
            gps_filter: Some(GpsFilterSettings::default()),
            strict: false,
            diagnostics: null_diagnostics(),
        }
    }
}

impl ExtractOptions {
    fn store(&self) -> FrameMeta {
        let mut store = FrameMeta::with_diagnostics(self.diagnostics.clone());
        store.set_strict(self.strict);
        store
    }

    fn lock_filter(&self, rejections: &ReasonCounter) -> Box<dyn GpsLockFilter> {
        match &self.gps_filter {
            Some(settings) => Box::new(standard(settings, rejections.reporter())),
            None => Box::new(NullFilter),
        }
    }
}

/// The merged GPS store plus why fixes were downgraded.
pub struct Extraction {
    pub frames: FrameMeta,
    pub rejections: ReasonCounter,
}

/// Build the GPS store, preferring `GPS9` over `GPS5` when both exist.
pub fn gps_framemeta(gpmd: &Gpmd, options: &ExtractOptions, filter: Box<dyn GpsLockFilter>) -> Result<FrameMeta, Error> {
    let mut store = options.store();

    let stream = if gpmd.accept(StreamFinder::new(FourCC::GPS9))?.found() {
        FourCC::GPS9
    } else if gpmd.accept(StreamFinder::new(FourCC::GPS5))?.found() {
        FourCC::GPS5
    } else {
        options.diagnostics.warn(Source::Gps, "Can't find any GPS data in this file");
        return Ok(store);
    };

    let calculator = calculator_for(gpmd, options.video.as_ref(), stream, options.diagnostics.clone())?;
    let packets = gpmd.accept(PacketVisitor::new(stream))?.into_packets();
    let mut converter = GpsConverter::new(calculator, filter, options.diagnostics.clone());

    for packet in &packets {
        if stream == FourCC::GPS9 {
            converter.convert_gps9(packet, &mut store)?;
        } else {
            converter.convert_gps5(packet, &mut store)?;
        }
    }
    Ok(store)
}

fn sensor_framemeta(gpmd: &Gpmd, options: &ExtractOptions, sensor: Sensor) -> Result<FrameMeta, Error> {
    let mut store = options.store();
    let stream = sensor.fourcc();
    if !gpmd.accept(StreamFinder::new(stream))?.found() {
        options.diagnostics.debug(Source::Decode, &format!("no {stream} stream"));
        return Ok(store);
    }

    let calculator = calculator_for(gpmd, options.video.as_ref(), stream, options.diagnostics.clone())?;
    let mut converter = SensorConverter::new(sensor, calculator);
    for packet in &gpmd.accept(PacketVisitor::new(stream))?.into_packets() {
        converter.convert(packet, &mut store)?;
    }
    Ok(store)
}

/// Accelerometer samples, Kalman-smoothed per axis.
pub fn accl_framemeta(gpmd: &Gpmd, options: &ExtractOptions) -> Result<FrameMeta, Error> {
    let mut store = sensor_framemeta(gpmd, options, Sensor::Accl)?;
    store.process(kalman_point3(Field::Accl, Field::Accl));
    Ok(store)
}

pub fn grav_framemeta(gpmd: &Gpmd, options: &ExtractOptions) -> Result<FrameMeta, Error> {
    sensor_framemeta(gpmd, options, Sensor::Grav)
}

pub fn cori_framemeta(gpmd: &Gpmd, options: &ExtractOptions) -> Result<FrameMeta, Error> {
    sensor_framemeta(gpmd, options, Sensor::Cori)
}

/// Copy `fields` from `other` onto each entry of `target`, looked up at the
/// entry's stream time. An empty `other` leaves `target` untouched.
pub fn merge(target: &mut FrameMeta, other: &FrameMeta, fields: &[Field]) -> Result<(), Error> {
    if other.is_empty() {
        return Ok(());
    }
    target.try_process(|e: &Entry| {
        let Some(ms) = e.number(Field::Timestamp) else {
            return Ok(None);
        };
        let found = other.get(Timeunit::from_millis_f64(ms), true)?;
        let updates = fields
            .iter()
            .filter_map(|f| found.get(*f).map(|v| (*f, v.clone())))
            .fold(Updates::new(), |u, (f, v)| u.set_opt(f, Some(v)));
        Ok(Some(updates))
    })
}

/// Run every requested pass over a decoded buffer and merge the results
/// into the GPS store.
pub fn extract(gpmd: &Gpmd, options: &ExtractOptions) -> Result<Extraction, Error> {
    let rejections = ReasonCounter::new();
    let mut frames = StreamKind::Gps.load(gpmd, options, &rejections)?;

    for kind in StreamKind::requested(options.flags).into_iter().skip(1) {
        let other = kind.load(gpmd, options, &rejections)?;
        merge(&mut frames, &other, kind.merged_fields())?;
    }

    Ok(Extraction { frames, rejections })
}

/// Decode a raw metadata stream and extract it.
pub fn parse_gopro(data: &[u8], options: &ExtractOptions) -> Result<Extraction, Error> {
    let gpmd = Gpmd::parse(data)?;
    extract(&gpmd, options)
}

/// Extract from a raw metadata-stream file on disk.
pub fn load_from_path(path: impl AsRef<Path>, options: &ExtractOptions) -> Result<Extraction, Error> {
    let data = fs::read(path)?;
    parse_gopro(&data, options)
}

pub fn load_from_reader<R: Read>(mut reader: R, options: &ExtractOptions) -> Result<Extraction, Error> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    parse_gopro(&data, options)
}

/// Convenience helper that extracts and hands each merged entry, in time
/// order, to a callback.
pub fn for_each_entry<R: Read>(
    reader: R,
    options: &ExtractOptions,
    mut f: impl FnMut(Timeunit, &Entry) -> Result<(), Error>,
) -> Result<(), Error> {
    let extraction = load_from_reader(reader, options)?;
    for (time, entry) in extraction.frames.items() {
        f(time, entry)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;

    use super::*;
    use crate::diagnostics::CollectingDiagnostics;
    use crate::point::Point3;

    fn entry_at(ms: i64) -> Entry {
        Entry::new(DateTime::UNIX_EPOCH).with(Field::Timestamp, ms as f64)
    }

    #[test]
    fn requested_kinds_follow_flags() {
        assert_eq!(StreamKind::requested(LoadFlags::NONE), vec![StreamKind::Gps]);
        assert_eq!(StreamKind::requested(LoadFlags::ALL).len(), 4);
        let flags = LoadFlags {
            grav: false,
            ..LoadFlags::ALL
        };
        assert_eq!(
            StreamKind::requested(flags),
            vec![StreamKind::Gps, StreamKind::Accl, StreamKind::Cori]
        );
    }

    #[test]
    fn merge_looks_up_stream_time() {
        let mut gps = FrameMeta::new();
        gps.insert(Timeunit::from_millis(500), entry_at(500));

        let mut accl = FrameMeta::new();
        let a = |x| entry_at(0).with(Field::Accl, Point3::new(x, 0.0, 0.0));
        accl.insert(Timeunit::ZERO, a(0.0));
        accl.insert(Timeunit::from_secs(1), a(10.0));

        merge(&mut gps, &accl, &[Field::Accl, Field::Grav]).unwrap();
        let e = gps.get(Timeunit::from_millis(500), false).unwrap();
        assert_eq!(e.point3(Field::Accl), Some(Point3::new(5.0, 0.0, 0.0)));
        assert!(!e.contains(Field::Grav));
    }

    #[test]
    fn merge_from_empty_store_is_a_no_op() {
        let mut gps = FrameMeta::new();
        gps.insert(Timeunit::ZERO, entry_at(0));
        merge(&mut gps, &FrameMeta::new(), &[Field::Accl]).unwrap();
        assert_eq!(gps.items()[0].1.fields().count(), 1);
    }

    #[test]
    fn merge_in_strict_mode_surfaces_not_found() {
        let mut gps = FrameMeta::new();
        gps.insert(Timeunit::from_secs(5), entry_at(5000));
        let mut accl = FrameMeta::new();
        accl.set_strict(true);
        accl.insert(Timeunit::ZERO, entry_at(0).with(Field::Accl, Point3::new(1.0, 1.0, 1.0)));
        assert!(matches!(
            merge(&mut gps, &accl, &[Field::Accl]),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn buffer_without_gps_gives_empty_store() {
        let sink = Arc::new(CollectingDiagnostics::new());
        let options = ExtractOptions {
            flags: LoadFlags::NONE,
            diagnostics: sink.clone(),
            ..ExtractOptions::default()
        };
        let extraction = parse_gopro(&[], &options).unwrap();
        assert!(extraction.frames.is_empty());
        assert_eq!(sink.from_source(Source::Gps), vec!["Can't find any GPS data in this file"]);
    }
}
