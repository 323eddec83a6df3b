//! Per-sample timing for sensor packets.
//!
//! A packet holds many samples but only packet-level clock information.
//! Two strategies turn that into a time for every sample:
//!
//! - [`AnchoredCalculator`] correlates each packet's device clock (`STMP`)
//!   with the first shutter-stream timestamp, and spreads the samples evenly
//!   over the gap to the previous packet.
//! - [`RateCalculator`] fits a straight line through cumulative sample counts
//!   against the nominal end time of each payload in the video, yielding an
//!   effective sample rate and the time of the first sample.
//!
//! [`calculator_for`] picks one for a stream kind.

use crate::config::VideoStreamMeta;
use crate::diagnostics::{SharedDiagnostics, Source};
use crate::gpmf::{Contents, FourCC, Gpmd, RawRecord};
use crate::timeunit::Timeunit;
use crate::visit::{FirstShutTimestamp, Visitor};
use crate::Error;

/// Sample timing for one packet. [`SampleTimes::at`] maps an in-packet index
/// to `(stream time, offset from the packet's first sample)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleTimes {
    Anchored { packet_time: Timeunit, step: Timeunit },
    Rate { first: Timeunit, samples_before: usize, rate: f64 },
}

impl SampleTimes {
    pub fn at(&self, index: usize) -> (Timeunit, Timeunit) {
        match *self {
            SampleTimes::Anchored { packet_time, step } => {
                let offset = step * index as i64;
                (packet_time + offset, offset)
            }
            SampleTimes::Rate { first, samples_before, rate } => (
                first + Timeunit::from_secs_f64((samples_before + index) as f64 / rate),
                Timeunit::from_secs_f64(index as f64 / rate),
            ),
        }
    }
}

pub trait PacketTimeCalculator: Send {
    /// `timestamp` is the packet's `STMP`, if it had one. `samples_before` is
    /// the number of samples of this stream emitted by earlier packets.
    fn next_packet(
        &mut self,
        timestamp: Option<Timeunit>,
        samples_before: usize,
        num_samples: usize,
    ) -> Result<SampleTimes, Error>;
}

/// Spacing assumed for the first packet, which has no predecessor.
const NOMINAL_PACKET: Timeunit = Timeunit::from_millis(1001);

pub struct AnchoredCalculator {
    anchor: Timeunit,
    first: Option<Timeunit>,
    last: Option<Timeunit>,
    adjust: Timeunit,
    diagnostics: SharedDiagnostics,
}

impl AnchoredCalculator {
    pub fn new(anchor: Timeunit, diagnostics: SharedDiagnostics) -> Self {
        AnchoredCalculator {
            anchor,
            first: None,
            last: None,
            adjust: Timeunit::ZERO,
            diagnostics,
        }
    }
}

fn per_sample(span: Timeunit, num_samples: usize) -> Timeunit {
    if num_samples == 0 {
        Timeunit::ZERO
    } else {
        span / num_samples as i64
    }
}

impl PacketTimeCalculator for AnchoredCalculator {
    fn next_packet(
        &mut self,
        timestamp: Option<Timeunit>,
        _samples_before: usize,
        num_samples: usize,
    ) -> Result<SampleTimes, Error> {
        let Some(timestamp) = timestamp else {
            return Err(Error::Defect("packet without STMP cannot be anchored".into()));
        };

        // Concatenated recordings restart the device clock.
        if let (Some(_), Some(last)) = (self.first, self.last)
            && timestamp < last
        {
            self.adjust += last;
            self.first = Some(timestamp);
            self.last = None;
            self.diagnostics.info(
                Source::Timing,
                &format!("Joined file detected... adjusting by {}", self.adjust),
            );
        }

        let first = match self.first {
            Some(first) => first,
            None => {
                self.adjust = timestamp - self.anchor;
                self.first = Some(timestamp);
                timestamp
            }
        };

        let step = match self.last.replace(timestamp) {
            None => per_sample(NOMINAL_PACKET, num_samples),
            Some(last) => per_sample(timestamp - last, num_samples),
        };

        Ok(SampleTimes::Anchored {
            packet_time: timestamp + self.adjust - first,
            step,
        })
    }
}

/// Output of the sample-rate regression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionFactors {
    pub first_frame: Timeunit,
    pub last_frame: Timeunit,
    /// Samples per second.
    pub frames_s: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateCalculator {
    factors: CorrectionFactors,
}

impl RateCalculator {
    pub fn new(factors: CorrectionFactors) -> Self {
        RateCalculator { factors }
    }
}

impl PacketTimeCalculator for RateCalculator {
    fn next_packet(
        &mut self,
        _timestamp: Option<Timeunit>,
        samples_before: usize,
        _num_samples: usize,
    ) -> Result<SampleTimes, Error> {
        Ok(SampleTimes::Rate {
            first: self.factors.first_frame,
            samples_before,
            rate: self.factors.frames_s,
        })
    }
}

/// Stands in for a stream kind that was never seen; any use is a bug.
#[derive(Debug, Clone, Copy)]
pub struct UnknownCalculator {
    stream: FourCC,
}

impl PacketTimeCalculator for UnknownCalculator {
    fn next_packet(&mut self, _: Option<Timeunit>, _: usize, _: usize) -> Result<SampleTimes, Error> {
        Err(Error::Defect(format!(
            "can't calculate timings for {} as none were seen",
            self.stream
        )))
    }
}

/// Nominal payload times derived from the video track.
#[derive(Debug, Clone, Copy)]
pub struct PayloadMaths {
    frame_secs: f64,
    max_time: f64,
}

impl PayloadMaths {
    pub fn new(video: &VideoStreamMeta) -> Self {
        let frame_secs = video.frame_duration as f64 / video.timebase as f64;
        PayloadMaths {
            frame_secs,
            max_time: video.frame_count as f64 * video.frame_duration as f64 / video.timebase as f64,
        }
    }

    /// End time, in seconds, of payload `n`.
    pub fn time_of_out_packet(&self, n: usize) -> f64 {
        ((n + 1) as f64 * self.frame_secs).min(self.max_time)
    }
}

/// Accumulates `(payload end time, cumulative samples)` for one stream kind
/// and fits the sample rate, following `GetGPMFSampleRate` in the GPMF
/// reference parser.
#[derive(Debug, Clone)]
pub struct CorrectionFactorsVisitor {
    wanted: FourCC,
    maths: PayloadMaths,
    count: usize,
    samples: usize,
    sum_y: f64,
    sum_x: f64,
    cumulative: Vec<usize>,
}

impl CorrectionFactorsVisitor {
    pub fn new(wanted: FourCC, video: &VideoStreamMeta) -> Self {
        CorrectionFactorsVisitor {
            wanted,
            maths: PayloadMaths::new(video),
            count: 0,
            samples: 0,
            sum_y: 0.0,
            sum_x: 0.0,
            cumulative: Vec::new(),
        }
    }

    /// Record one payload of `repeat` samples.
    pub fn add(&mut self, repeat: usize) {
        self.samples += repeat;
        self.sum_y += self.samples as f64;
        self.sum_x += self.maths.time_of_out_packet(self.count);
        self.cumulative.push(self.samples);
        self.count += 1;
    }

    pub fn found(&self) -> bool {
        self.count > 0
    }

    pub fn factors(&self) -> Option<CorrectionFactors> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let mean_y = self.sum_y / n;
        let mean_x = self.sum_x / n;

        let (top, bottom) = self
            .cumulative
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(top, bottom), (i, &samples)| {
                let dx = self.maths.time_of_out_packet(i) - mean_x;
                (top + dx * (samples as f64 - mean_y), bottom + dx * dx)
            });

        let (rate, first) = if bottom > 0.0 {
            let slope = top / bottom;
            let intercept = mean_y - slope * mean_x;
            (slope, -intercept / slope)
        } else {
            // One payload (or all clamped to the video end): no slope to fit.
            (self.samples as f64 / self.maths.time_of_out_packet(self.count - 1), 0.0)
        };
        let last = first + self.samples as f64 / rate;

        Some(CorrectionFactors {
            first_frame: Timeunit::from_secs_f64(first),
            last_frame: Timeunit::from_secs_f64(last),
            frames_s: rate,
        })
    }
}

impl Visitor for CorrectionFactorsVisitor {
    fn visit_container(&mut self, fourcc: FourCC, contents: &Contents) -> Option<&mut dyn Visitor> {
        match fourcc {
            FourCC::DEVC => Some(self),
            FourCC::STRM if contents.contains(&self.wanted) => Some(self),
            _ => None,
        }
    }

    fn visit_item(&mut self, item: &RawRecord) -> Result<(), Error> {
        if item.fourcc == self.wanted {
            self.add(item.repeat as usize);
        }
        Ok(())
    }
}

/// Choose the timing strategy for `stream`.
///
/// The shutter anchor wins when present. Otherwise the rate is fitted from
/// video timing, which then must be supplied.
pub fn calculator_for(
    gpmd: &Gpmd,
    video: Option<&VideoStreamMeta>,
    stream: FourCC,
    diagnostics: SharedDiagnostics,
) -> Result<Box<dyn PacketTimeCalculator>, Error> {
    if let Some(anchor) = gpmd.accept(FirstShutTimestamp::new())?.timestamp() {
        return Ok(Box::new(AnchoredCalculator::new(Timeunit::from_micros(anchor), diagnostics)));
    }

    let video = video.ok_or(Error::MissingVideoMetadata { stream })?;
    let visitor = gpmd.accept(CorrectionFactorsVisitor::new(stream, video))?;
    match visitor.factors() {
        Some(factors) => {
            diagnostics.debug(
                Source::Timing,
                &format!("{stream}: {:.4} samples/s from {}", factors.frames_s, factors.first_frame),
            );
            Ok(Box::new(RateCalculator::new(factors)))
        }
        None => Ok(Box::new(UnknownCalculator { stream })),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::diagnostics::{CollectingDiagnostics, NullDiagnostics};
    use crate::gpmf::testing::*;

    fn video() -> VideoStreamMeta {
        VideoStreamMeta {
            frame_count: 1000,
            timebase: 30_000,
            frame_duration: 30_030,
        }
    }

    fn anchored(anchor_ms: i64) -> AnchoredCalculator {
        AnchoredCalculator::new(Timeunit::from_millis(anchor_ms), Arc::new(NullDiagnostics))
    }

    fn ms(v: i64) -> Option<Timeunit> {
        Some(Timeunit::from_millis(v))
    }

    #[test]
    fn regression_recovers_sample_rate() {
        let mut v = CorrectionFactorsVisitor::new(FourCC::GPS5, &video());
        for _ in 0..3 {
            v.add(18);
        }
        let maths = PayloadMaths::new(&video());
        assert!((maths.time_of_out_packet(2) - 3.003).abs() < 1e-9);

        let f = v.factors().unwrap();
        assert!((f.frames_s - 18.0).abs() < 0.1, "rate {}", f.frames_s);
        assert!(f.first_frame.abs() < Timeunit::from_millis(1), "first {}", f.first_frame);
        assert!((f.last_frame.secs() - 3.003).abs() < 0.001);
    }

    #[test]
    fn rate_times_follow_samples_before() {
        let mut calc = RateCalculator::new(CorrectionFactors {
            first_frame: Timeunit::from_millis(100),
            last_frame: Timeunit::from_secs(10),
            frames_s: 10.0,
        });
        let t = calc.next_packet(None, 20, 10).unwrap();
        assert_eq!(t.at(0), (Timeunit::from_millis(2100), Timeunit::ZERO));
        assert_eq!(t.at(5), (Timeunit::from_millis(2600), Timeunit::from_millis(500)));
    }

    #[test]
    fn regression_with_single_payload() {
        let mut v = CorrectionFactorsVisitor::new(FourCC::ACCL, &video());
        v.add(200);
        let f = v.factors().unwrap();
        assert!((f.frames_s - 200.0 / 1.001).abs() < 1e-9);
        assert_eq!(f.first_frame, Timeunit::ZERO);
    }

    #[test]
    fn payload_times_clamp_to_video_length() {
        let maths = PayloadMaths::new(&VideoStreamMeta {
            frame_count: 2,
            timebase: 1000,
            frame_duration: 1000,
        });
        assert_eq!(maths.time_of_out_packet(0), 1.0);
        assert_eq!(maths.time_of_out_packet(5), 2.0);
    }

    #[test]
    fn anchored_first_packet_uses_nominal_spacing() {
        let mut calc = anchored(400);
        let t = calc.next_packet(ms(1000), 0, 18).unwrap();
        let step = Timeunit::from_millis(1001) / 18;
        assert_eq!(t.at(0).0, Timeunit::from_millis(600));
        assert_eq!(t.at(1), (Timeunit::from_millis(600) + step, step));
    }

    #[test]
    fn anchored_spacing_follows_device_clock() {
        let mut calc = anchored(0);
        calc.next_packet(ms(1000), 0, 10).unwrap();
        let t = calc.next_packet(ms(2000), 10, 20).unwrap();
        assert_eq!(t.at(0).0, Timeunit::from_millis(2000));
        assert_eq!(t.at(4), (Timeunit::from_millis(2200), Timeunit::from_millis(200)));
    }

    #[test]
    fn joined_recordings_keep_time_moving_forward() {
        let sink = Arc::new(CollectingDiagnostics::new());
        let mut calc = AnchoredCalculator::new(Timeunit::ZERO, sink.clone());
        calc.next_packet(ms(1000), 0, 10).unwrap();
        let before = calc.next_packet(ms(2000), 10, 10).unwrap().at(0).0;
        let after = calc.next_packet(ms(50), 20, 10).unwrap();
        assert!(after.at(0).0 > before);
        assert_eq!(after.at(1).1, Timeunit::from_millis(1001) / 10);
        assert_eq!(sink.from_source(Source::Timing).len(), 1);
    }

    #[test]
    fn anchored_requires_stmp() {
        assert!(matches!(anchored(0).next_packet(None, 0, 1), Err(Error::Defect(_))));
    }

    #[test]
    fn strategy_selection() {
        let shut = [
            container(b"DEVC", &[container(b"STRM", &[u64_atom(b"STMP", 1_000_000), u32s(b"SHUT", &[1])])]),
        ]
        .concat();
        let gpmd = Gpmd::parse(&shut).unwrap();
        let mut calc = calculator_for(&gpmd, None, FourCC::ACCL, Arc::new(NullDiagnostics)).unwrap();
        let t = calc.next_packet(Some(Timeunit::from_secs(3)), 0, 1).unwrap();
        assert!(matches!(t, SampleTimes::Anchored { .. }));
        assert_eq!(t.at(0).0, Timeunit::from_secs(2));

        let accl = container(b"DEVC", &[container(b"STRM", &[i16_structs(b"ACCL", &[&[1, 2, 3], &[4, 5, 6]])])]);
        let gpmd = Gpmd::parse(&accl).unwrap();
        assert!(matches!(
            calculator_for(&gpmd, None, FourCC::ACCL, Arc::new(NullDiagnostics)),
            Err(Error::MissingVideoMetadata { .. })
        ));

        let mut calc = calculator_for(&gpmd, Some(&video()), FourCC::ACCL, Arc::new(NullDiagnostics)).unwrap();
        assert!(matches!(calc.next_packet(None, 0, 2).unwrap(), SampleTimes::Rate { .. }));

        let mut calc = calculator_for(&gpmd, Some(&video()), FourCC::CORI, Arc::new(NullDiagnostics)).unwrap();
        assert!(matches!(calc.next_packet(None, 0, 2), Err(Error::Defect(_))));
    }
}
