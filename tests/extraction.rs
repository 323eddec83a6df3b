mod common;

use std::io::Write;
use std::sync::Arc;

use gpmf_frames::diagnostics::CollectingDiagnostics;
use gpmf_frames::process::{calculate_odo, calculate_speeds, is_locked};
use gpmf_frames::{
    load_from_path, load_from_reader, parse_gopro, Error, ExtractOptions, Field, GpsFilterSettings, LoadFlags,
    Source, Timeunit, VideoStreamMeta,
};

use common::*;

fn options() -> ExtractOptions {
    ExtractOptions {
        gps_filter: None,
        ..ExtractOptions::default()
    }
}

fn video() -> VideoStreamMeta {
    VideoStreamMeta {
        frame_count: 1000,
        timebase: 30_000,
        frame_duration: 30_030,
    }
}

fn close(a: Timeunit, b: Timeunit) -> bool {
    (a - b).abs() <= Timeunit::from_micros(2)
}

#[test]
fn gps_entries_are_anchored_to_the_shutter_stream() {
    let extraction = parse_gopro(&recording(), &options()).unwrap();
    let frames = &extraction.frames;

    assert_eq!(frames.len(), PACKETS * GPS_PER_PACKET);
    assert_eq!(frames.min(), Some(Timeunit::ZERO));

    let items = frames.items();
    // packet k starts k * 1001ms after the anchor; four samples share each gap
    let (t, e) = items[5];
    assert!(close(t, Timeunit::from_micros(1_001_000 + 250_250)), "{t}");
    assert_eq!(e.number(Field::Packet), Some(1.0));
    assert_eq!(e.number(Field::PacketIndex), Some(1.0));
    assert_eq!(e.number(Field::PacketCount), Some(GPS_PER_PACKET as f64));
    assert_eq!(e.dt.to_rfc3339(), "2022-05-05T10:22:56.250250+00:00");

    let p = e.point().unwrap();
    assert!((p.lat - 51.5005).abs() < 1e-9);
    assert!((p.lon + 0.1).abs() < 1e-9);
    assert_eq!(e.number(Field::Alt), Some(10.0));
    assert_eq!(e.number(Field::Dop), Some(1.5));
    assert_eq!(e.number(Field::GpsFix), Some(3.0));
}

#[test]
fn secondary_streams_are_merged_onto_gps_entries() {
    let extraction = parse_gopro(&recording(), &options()).unwrap();
    for (_, e) in extraction.frames.items() {
        let a = e.point3(Field::Accl).expect("accl merged");
        // smoothed towards (1, 2, 9.8) from zero
        assert!(a.x >= 0.0 && a.x <= 1.0);
        assert!(a.z >= 0.0 && a.z <= 9.8);
        assert!(!e.contains(Field::Grav));
    }

    let gps_only = ExtractOptions {
        flags: LoadFlags::NONE,
        ..options()
    };
    let extraction = parse_gopro(&recording(), &gps_only).unwrap();
    assert!(extraction.frames.items().iter().all(|(_, e)| !e.contains(Field::Accl)));
}

#[test]
fn clamped_lookups_are_reported_to_the_store_source() {
    let sink = Arc::new(CollectingDiagnostics::new());
    let options = ExtractOptions {
        diagnostics: sink.clone(),
        ..options()
    };
    parse_gopro(&recording(), &options).unwrap();
    // the last GPS samples fall after the last accelerometer sample
    assert!(!sink.from_source(Source::Store).is_empty());
}

#[test]
fn strict_mode_surfaces_out_of_range_lookups() {
    let options = ExtractOptions {
        strict: true,
        ..options()
    };
    assert!(matches!(
        parse_gopro(&recording(), &options),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn missing_anchor_needs_video_metadata() {
    let err = parse_gopro(&recording_without_shutter(), &options()).err().unwrap();
    assert!(matches!(err, Error::MissingVideoMetadata { .. }), "{err}");
}

#[test]
fn missing_anchor_uses_the_rate_fit() {
    let options = ExtractOptions {
        video: Some(video()),
        flags: LoadFlags::NONE,
        ..options()
    };
    let extraction = parse_gopro(&recording_without_shutter(), &options).unwrap();
    let times = extraction.frames.times();
    assert_eq!(times.len(), PACKETS * GPS_PER_PACKET);
    // four samples per 1.001s payload
    assert!(close(times[0], Timeunit::ZERO), "{}", times[0]);
    assert!(close(times[5], Timeunit::from_micros(5 * 250_250)), "{}", times[5]);
}

#[test]
fn standard_filter_counts_rejections() {
    let options = ExtractOptions {
        gps_filter: Some(GpsFilterSettings {
            max_dop: 1.0,
            ..GpsFilterSettings::default()
        }),
        flags: LoadFlags::NONE,
        ..options()
    };
    let extraction = parse_gopro(&recording(), &options).unwrap();
    let n = PACKETS * GPS_PER_PACKET;
    assert_eq!(extraction.rejections.counts().get("DOP > 1"), Some(&n));
    assert!(extraction.frames.items().iter().all(|(_, e)| !is_locked(e)));
}

#[test]
fn derived_fields_accumulate_distance() {
    let mut frames = parse_gopro(&recording(), &options()).unwrap().frames;
    frames.process_deltas(calculate_speeds(), 1);
    frames.process(calculate_odo());

    let items = frames.items();
    let step = items[0].1.number(Field::Dist).unwrap();
    // 0.0001 degrees of latitude
    assert!((step - 11.12).abs() < 0.01, "{step}");
    let odo = items[items.len() - 1].1.number(Field::Codo).unwrap();
    assert!((odo - step * (items.len() - 1) as f64).abs() < 0.1, "{odo}");
}

#[test]
fn loads_from_path_and_reader() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&recording()).unwrap();
    file.flush().unwrap();

    let from_path = load_from_path(file.path(), &options()).unwrap();
    let from_reader = load_from_reader(std::fs::File::open(file.path()).unwrap(), &options()).unwrap();
    assert_eq!(from_path.frames.times(), from_reader.frames.times());

    assert!(matches!(
        load_from_path(file.path().with_extension("missing"), &options()),
        Err(Error::Io(_))
    ));
}

#[test]
fn truncated_buffer_is_a_format_error() {
    let mut data = recording();
    data.truncate(data.len() - 6);
    assert!(matches!(parse_gopro(&data, &options()), Err(Error::Format { .. })));
}
