#![cfg(feature = "async")]

mod common;

use std::collections::HashMap;
use std::io::Write;

use tokio_stream::StreamExt;

use gpmf_frames::{
    stores_from_bytes, stores_from_path, Error, ExtractOptions, Field, GpsFilterSettings, LoadFlags, ReasonCounter,
    StreamKind,
};

use common::*;

#[tokio::test]
async fn every_requested_kind_arrives_once() {
    let options = ExtractOptions {
        flags: LoadFlags {
            grav: false,
            ..LoadFlags::ALL
        },
        ..ExtractOptions::default()
    };
    let mut stream = stores_from_bytes(recording(), options, ReasonCounter::new(), 2);

    let mut stores = HashMap::new();
    while let Some(item) = stream.next().await {
        let (kind, store) = item.unwrap();
        assert!(stores.insert(kind, store).is_none(), "{kind:?} sent twice");
    }

    assert_eq!(stores.len(), 3);
    assert_eq!(stores[&StreamKind::Gps].len(), PACKETS * GPS_PER_PACKET);
    assert_eq!(stores[&StreamKind::Accl].len(), PACKETS * ACCL_PER_PACKET);
    // no orientation stream in the recording
    assert!(stores[&StreamKind::Cori].is_empty());
    assert!(stores[&StreamKind::Accl].items()[1].1.contains(Field::Accl));
}

#[tokio::test]
async fn rejections_are_shared_with_the_caller() {
    let options = ExtractOptions {
        flags: LoadFlags::NONE,
        gps_filter: Some(GpsFilterSettings {
            max_dop: 1.0,
            ..GpsFilterSettings::default()
        }),
        ..ExtractOptions::default()
    };
    let rejections = ReasonCounter::new();
    let items: Vec<_> = stores_from_bytes(recording(), options, rejections.clone(), 1)
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(rejections.total(), PACKETS * GPS_PER_PACKET);
}

#[tokio::test]
async fn decode_failure_ends_the_stream() {
    let mut data = recording();
    data.truncate(10);
    let items: Vec<_> = stores_from_bytes(data, ExtractOptions::default(), ReasonCounter::new(), 4)
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(Error::Format { .. })));
}

#[tokio::test]
async fn reads_from_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&recording()).unwrap();
    file.flush().unwrap();

    let options = ExtractOptions {
        flags: LoadFlags::NONE,
        ..ExtractOptions::default()
    };
    let items: Vec<_> = stores_from_path(file.path(), options, ReasonCounter::new(), 1)
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    let (kind, store) = items[0].as_ref().unwrap();
    assert_eq!(*kind, StreamKind::Gps);
    assert_eq!(store.len(), PACKETS * GPS_PER_PACKET);
}
