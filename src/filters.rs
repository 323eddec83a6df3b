//! GPS lock quality filters.
//!
//! A filter looks at one sample's fix, position, speed and DOP and answers
//! with a fix that is never better than the one the receiver reported. "No
//! lock" is an ordinary answer, so nothing here returns an error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::config::GpsFilterSettings;
use crate::diagnostics::{Diagnostics, Source};
use crate::interpret::GpsFix;
use crate::point::{BoundingBox, Point};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsLockComponents {
    pub fix: GpsFix,
    pub point: Point,
    /// Metres per second.
    pub speed: f64,
    pub dop: f64,
}

pub trait GpsLockFilter: Send {
    fn submit(&mut self, components: &GpsLockComponents) -> GpsFix;
}

/// Passes the reported fix through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFilter;

impl GpsLockFilter for NullFilter {
    fn submit(&mut self, components: &GpsLockComponents) -> GpsFix {
        components.fix
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DopFilter {
    max_dop: f64,
}

impl DopFilter {
    pub fn new(max_dop: f64) -> Self {
        DopFilter { max_dop }
    }
}

impl GpsLockFilter for DopFilter {
    fn submit(&mut self, components: &GpsLockComponents) -> GpsFix {
        if components.dop > self.max_dop {
            GpsFix::No
        } else {
            components.fix
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxSpeedFilter {
    max_mps: f64,
}

impl MaxSpeedFilter {
    pub fn new(max_mps: f64) -> Self {
        MaxSpeedFilter { max_mps }
    }
}

impl GpsLockFilter for MaxSpeedFilter {
    fn submit(&mut self, components: &GpsLockComponents) -> GpsFix {
        if components.speed > self.max_mps {
            GpsFix::No
        } else {
            components.fix
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BBoxFilter {
    bbox: BoundingBox,
}

impl BBoxFilter {
    pub fn new(bbox: BoundingBox) -> Self {
        BBoxFilter { bbox }
    }
}

impl GpsLockFilter for BBoxFilter {
    fn submit(&mut self, components: &GpsLockComponents) -> GpsFix {
        if self.bbox.contains(&components.point) {
            components.fix
        } else {
            GpsFix::No
        }
    }
}

/// Suppresses the stale positions some receivers emit right after a lock is
/// acquired.
///
/// When a locked sample follows an unlocked one but repeats its position or
/// its speed, the previous (unlocked) fix is reported and memory is left
/// untouched. The first sample that actually moves is accepted.
#[derive(Debug, Clone, Default)]
pub struct LockTracker {
    last: Option<GpsLockComponents>,
}

impl LockTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GpsLockFilter for LockTracker {
    fn submit(&mut self, components: &GpsLockComponents) -> GpsFix {
        if let Some(last) = &self.last
            && components.fix.is_locked()
            && !last.fix.is_locked()
            && (components.point == last.point || components.speed == last.speed)
        {
            return last.fix;
        }
        self.last = Some(*components);
        components.fix
    }
}

pub type Reporter = Arc<dyn Fn(&str) + Send + Sync>;

/// Calls back with a reason whenever the wrapped filter turns a fix into
/// [`GpsFix::No`].
pub struct ReportingFilter {
    inner: Box<dyn GpsLockFilter>,
    reason: String,
    report: Reporter,
}

impl ReportingFilter {
    pub fn new(inner: Box<dyn GpsLockFilter>, reason: impl Into<String>, report: Reporter) -> Self {
        ReportingFilter {
            inner,
            reason: reason.into(),
            report,
        }
    }
}

impl GpsLockFilter for ReportingFilter {
    fn submit(&mut self, components: &GpsLockComponents) -> GpsFix {
        let result = self.inner.submit(components);
        if result != components.fix && result == GpsFix::No {
            (self.report)(&self.reason);
        }
        result
    }
}

/// Runs every filter on the same input and keeps the worst answer.
pub struct WorstOf {
    filters: Vec<Box<dyn GpsLockFilter>>,
}

impl WorstOf {
    pub fn new(filters: Vec<Box<dyn GpsLockFilter>>) -> Self {
        WorstOf { filters }
    }
}

impl GpsLockFilter for WorstOf {
    fn submit(&mut self, components: &GpsLockComponents) -> GpsFix {
        self.filters
            .iter_mut()
            .map(|f| f.submit(components))
            .fold(components.fix, GpsFix::min)
    }
}

/// Tallies why fixes were rejected.
#[derive(Debug, Clone, Default)]
pub struct ReasonCounter {
    counts: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl ReasonCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn because(&self, reason: &str) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(reason.to_string()).or_default() += 1;
        }
    }

    pub fn reporter(&self) -> Reporter {
        let counter = self.clone();
        Arc::new(move |reason| counter.because(reason))
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.counts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.counts().values().sum()
    }

    /// Emit a summary, if anything was rejected.
    pub fn report(&self, sink: &dyn Diagnostics) {
        let total = self.total();
        if total == 0 {
            return;
        }
        sink.warn(
            Source::Gps,
            &format!("{total} GPS readings were mapped to no-lock, for the following reasons:"),
        );
        for (reason, n) in self.counts() {
            sink.warn(Source::Gps, &format!("* {reason} -> {n}"));
        }
    }
}

impl fmt::Display for ReasonCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.counts().iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// The usual chain: lock tracker, optional bounding box, DOP and speed limits.
pub fn standard(settings: &GpsFilterSettings, report: Reporter) -> WorstOf {
    let bbox: Box<dyn GpsLockFilter> = match settings.bbox {
        Some(bbox) => Box::new(BBoxFilter::new(bbox)),
        None => Box::new(NullFilter),
    };

    WorstOf::new(vec![
        Box::new(ReportingFilter::new(Box::new(LockTracker::new()), "Heuristics", report.clone())),
        Box::new(ReportingFilter::new(bbox, "Outside BBox", report.clone())),
        Box::new(ReportingFilter::new(
            Box::new(DopFilter::new(settings.max_dop)),
            format!("DOP > {}", settings.max_dop),
            report.clone(),
        )),
        Box::new(ReportingFilter::new(
            Box::new(MaxSpeedFilter::new(settings.max_speed.to_mps())),
            format!("Speed > {}", settings.max_speed),
            report,
        )),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Speed, SpeedUnit};

    fn c(fix: GpsFix, point: Point, speed: f64) -> GpsLockComponents {
        GpsLockComponents { fix, point, speed, dop: 1.0 }
    }

    const P1: Point = Point::new(51.5, -0.1);
    const P2: Point = Point::new(51.6, -0.2);

    #[test]
    fn first_sample_passes_through() {
        let mut t = LockTracker::new();
        assert_eq!(t.submit(&c(GpsFix::Lock3d, P1, 1.0)), GpsFix::Lock3d);
    }

    #[test]
    fn lock_acquired_with_stale_point_is_rejected() {
        let mut t = LockTracker::new();
        assert_eq!(t.submit(&c(GpsFix::No, P1, 1.0)), GpsFix::No);
        assert_eq!(t.submit(&c(GpsFix::Lock3d, P1, 1.0)), GpsFix::No);
        assert_eq!(t.submit(&c(GpsFix::Lock3d, P2, 2.0)), GpsFix::Lock3d);
    }

    #[test]
    fn stale_speed_alone_is_enough_to_reject() {
        let mut t = LockTracker::new();
        t.submit(&c(GpsFix::Unknown, P1, 3.0));
        assert_eq!(t.submit(&c(GpsFix::Lock2d, P2, 3.0)), GpsFix::Unknown);
        // memory still holds the unlocked sample
        assert_eq!(t.submit(&c(GpsFix::Lock2d, P1, 9.0)), GpsFix::Unknown);
        assert_eq!(t.submit(&c(GpsFix::Lock2d, P2, 9.5)), GpsFix::Lock2d);
    }

    #[test]
    fn locked_to_locked_is_accepted() {
        let mut t = LockTracker::new();
        t.submit(&c(GpsFix::Lock3d, P1, 1.0));
        assert_eq!(t.submit(&c(GpsFix::Lock3d, P1, 1.0)), GpsFix::Lock3d);
        assert_eq!(t.submit(&c(GpsFix::No, P1, 1.0)), GpsFix::No);
    }

    #[test]
    fn threshold_filters() {
        let mut dop = DopFilter::new(5.0);
        let mut s = c(GpsFix::Lock3d, P1, 1.0);
        s.dop = 5.0;
        assert_eq!(dop.submit(&s), GpsFix::Lock3d);
        s.dop = 5.01;
        assert_eq!(dop.submit(&s), GpsFix::No);

        let mut speed = MaxSpeedFilter::new(10.0);
        assert_eq!(speed.submit(&c(GpsFix::Lock2d, P1, 10.5)), GpsFix::No);

        let mut bbox = BBoxFilter::new(BoundingBox::new(Point::new(51.0, -1.0), Point::new(52.0, 0.0)));
        assert_eq!(bbox.submit(&c(GpsFix::Lock3d, P1, 0.0)), GpsFix::Lock3d);
        assert_eq!(bbox.submit(&c(GpsFix::Lock3d, Point::new(40.0, 0.0), 0.0)), GpsFix::No);
    }

    #[test]
    fn worst_of_sees_original_input() {
        struct Downgrade;
        impl GpsLockFilter for Downgrade {
            fn submit(&mut self, _: &GpsLockComponents) -> GpsFix {
                GpsFix::Lock2d
            }
        }
        struct Echo(Arc<Mutex<Vec<GpsFix>>>);
        impl GpsLockFilter for Echo {
            fn submit(&mut self, c: &GpsLockComponents) -> GpsFix {
                if let Ok(mut seen) = self.0.lock() {
                    seen.push(c.fix);
                }
                c.fix
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut w = WorstOf::new(vec![Box::new(Downgrade), Box::new(Echo(seen.clone()))]);
        assert_eq!(w.submit(&c(GpsFix::Lock3d, P1, 1.0)), GpsFix::Lock2d);
        assert_eq!(*seen.lock().unwrap(), vec![GpsFix::Lock3d]);
    }

    #[test]
    fn worst_of_never_improves_the_fix() {
        struct Upgrade;
        impl GpsLockFilter for Upgrade {
            fn submit(&mut self, _: &GpsLockComponents) -> GpsFix {
                GpsFix::Lock3d
            }
        }
        let mut w = WorstOf::new(vec![Box::new(Upgrade), Box::new(NullFilter)]);
        for fix in [GpsFix::No, GpsFix::Unknown, GpsFix::Lock2d, GpsFix::Lock3d] {
            assert!(w.submit(&c(fix, P1, 1.0)) <= fix);
        }
    }

    #[test]
    fn standard_chain_counts_reasons() {
        let counter = ReasonCounter::new();
        let settings = GpsFilterSettings {
            max_dop: 5.0,
            max_speed: Speed::new(36.0, SpeedUnit::Kph),
            bbox: None,
        };
        let mut chain = standard(&settings, counter.reporter());

        let mut ok = c(GpsFix::Lock3d, P1, 1.0);
        assert_eq!(chain.submit(&ok), GpsFix::Lock3d);

        ok.point = P2;
        ok.dop = 7.0;
        assert_eq!(chain.submit(&ok), GpsFix::No);

        assert_eq!(chain.submit(&c(GpsFix::Lock3d, P1, 20.0)), GpsFix::No);

        let counts = counter.counts();
        assert_eq!(counts.get("DOP > 5"), Some(&1));
        assert_eq!(counts.get("Speed > 36 kph"), Some(&1));
        assert_eq!(counter.total(), 2);
    }
}
