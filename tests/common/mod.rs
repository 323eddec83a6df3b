//! Builders for synthetic metadata streams.

#![allow(dead_code)]

pub fn leaf(fourcc: &[u8; 4], type_char: u8, size: u8, repeat: u16, data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len(), size as usize * repeat as usize);
    let mut out = Vec::new();
    out.extend_from_slice(fourcc);
    out.push(type_char);
    out.push(size);
    out.extend_from_slice(&repeat.to_be_bytes());
    out.extend_from_slice(data);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

pub fn container(fourcc: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let body = children.concat();
    let mut out = Vec::new();
    out.extend_from_slice(fourcc);
    out.push(0);
    out.push(4);
    out.extend_from_slice(&((body.len() / 4) as u16).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

pub fn u32s(fourcc: &[u8; 4], values: &[u32]) -> Vec<u8> {
    let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
    leaf(fourcc, b'L', 4, values.len() as u16, &data)
}

pub fn stmp(micros: u64) -> Vec<u8> {
    leaf(b"STMP", b'J', 8, 1, &micros.to_be_bytes())
}

pub fn gpsu(text: &str) -> Vec<u8> {
    leaf(b"GPSU", b'U', 16, 1, text.as_bytes())
}

pub fn gpsp(dop_x100: u16) -> Vec<u8> {
    leaf(b"GPSP", b'S', 2, 1, &dop_x100.to_be_bytes())
}

pub fn gps5(rows: &[[i32; 5]]) -> Vec<u8> {
    let data: Vec<u8> = rows.iter().flat_map(|r| r.iter().flat_map(|v| v.to_be_bytes())).collect();
    leaf(b"GPS5", b'l', 20, rows.len() as u16, &data)
}

/// Rows are written in the camera's (y, x, z) order.
pub fn accl(rows: &[[i16; 3]]) -> Vec<u8> {
    let data: Vec<u8> = rows.iter().flat_map(|r| r.iter().flat_map(|v| v.to_be_bytes())).collect();
    leaf(b"ACCL", b's', 6, rows.len() as u16, &data)
}

/// Device clock of the shutter stream, and of the first sensor packet.
pub const ANCHOR_US: u64 = 1_000_000;
pub const PACKET_US: u64 = 1_001_000;
pub const PACKETS: usize = 3;
pub const GPS_PER_PACKET: usize = 4;
pub const ACCL_PER_PACKET: usize = 2;

fn gps_stream(k: usize) -> Vec<u8> {
    let rows: Vec<[i32; 5]> = (0..GPS_PER_PACKET)
        .map(|i| {
            let n = (k * GPS_PER_PACKET + i) as i32;
            // lat 51.5 + n * 0.0001, lon -0.1, alt 10m, speed 2 + n/100 m/s
            [515_000_000 + n * 1000, -1_000_000, 10_000, 2000 + n * 10, 0]
        })
        .collect();
    container(
        b"STRM",
        &[
            stmp(ANCHOR_US + k as u64 * PACKET_US),
            u32s(b"TSMP", &[(k * GPS_PER_PACKET) as u32]),
            u32s(b"GPSF", &[3]),
            gpsp(150),
            gpsu(&format!("2205051022{:02}.000", 55 + k)),
            u32s(b"SCAL", &[10_000_000, 10_000_000, 1000, 1000, 100]),
            gps5(&rows),
        ],
    )
}

fn accl_stream(k: usize) -> Vec<u8> {
    let rows = vec![[200i16, 100, 980]; ACCL_PER_PACKET];
    container(
        b"STRM",
        &[
            stmp(ANCHOR_US + k as u64 * PACKET_US),
            u32s(b"SCAL", &[100]),
            accl(&rows),
        ],
    )
}

/// A recording with a shutter anchor, GPS5 and ACCL streams in each packet.
pub fn recording() -> Vec<u8> {
    build(true)
}

/// The same streams with no shutter anchor, so timing needs video metadata.
pub fn recording_without_shutter() -> Vec<u8> {
    build(false)
}

fn build(with_shutter: bool) -> Vec<u8> {
    let shutter = container(b"STRM", &[stmp(ANCHOR_US), u32s(b"SHUT", &[1, 2])]);
    (0..PACKETS)
        .map(|k| {
            let mut streams = vec![u32s(b"DVID", &[1]), gps_stream(k), accl_stream(k)];
            if with_shutter && k == 0 {
                streams.push(shutter.clone());
            }
            container(b"DEVC", &streams)
        })
        .collect::<Vec<_>>()
        .concat()
}
