//! Time-indexed entry store.
//!
//! Entries are keyed by stream time. Inserts go into a hash map and only mark
//! the sorted key index stale; the index is rebuilt on the next query.

use std::borrow::Cow;
use std::cell::{Ref, RefCell};
use std::collections::HashMap;

use crate::diagnostics::{null_diagnostics, SharedDiagnostics, Source};
use crate::entry::{Entry, Updates};
use crate::timeunit::Timeunit;
use crate::Error;

pub struct FrameMeta {
    frames: HashMap<Timeunit, Entry>,
    /// Sorted keys; `None` when stale.
    index: RefCell<Option<Vec<Timeunit>>>,
    strict: bool,
    diagnostics: SharedDiagnostics,
}

impl Default for FrameMeta {
    fn default() -> Self {
        FrameMeta::new()
    }
}

impl std::fmt::Debug for FrameMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameMeta")
            .field("len", &self.frames.len())
            .field("strict", &self.strict)
            .finish()
    }
}

impl FrameMeta {
    pub fn new() -> Self {
        FrameMeta::with_diagnostics(null_diagnostics())
    }

    pub fn with_diagnostics(diagnostics: SharedDiagnostics) -> Self {
        FrameMeta {
            frames: HashMap::new(),
            index: RefCell::new(None),
            strict: false,
            diagnostics,
        }
    }

    /// In strict mode, lookups outside the stored range fail instead of
    /// clamping to the nearest end.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn insert(&mut self, time: Timeunit, entry: Entry) {
        self.frames.insert(time, entry);
        *self.index.get_mut() = None;
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn index(&self) -> Ref<'_, [Timeunit]> {
        {
            let mut index = self.index.borrow_mut();
            if index.is_none() {
                let mut keys: Vec<Timeunit> = self.frames.keys().copied().collect();
                keys.sort_unstable();
                *index = Some(keys);
            }
        }
        Ref::map(self.index.borrow(), |i| i.as_deref().unwrap_or(&[]))
    }

    /// Keys in time order.
    pub fn times(&self) -> Vec<Timeunit> {
        self.index().to_vec()
    }

    pub fn min(&self) -> Option<Timeunit> {
        self.index().first().copied()
    }

    pub fn max(&self) -> Option<Timeunit> {
        self.index().last().copied()
    }

    /// Entries in time order.
    pub fn items(&self) -> Vec<(Timeunit, &Entry)> {
        self.index()
            .iter()
            .filter_map(|t| self.frames.get(t).map(|e| (*t, e)))
            .collect()
    }

    /// Look up the entry at `time`.
    ///
    /// An exact key is returned as stored. Between two keys, with
    /// `interpolate` set, a blended entry is synthesized. Outside the stored
    /// range the nearest end is returned (with a diagnostic), unless the
    /// store is strict.
    pub fn get(&self, time: Timeunit, interpolate: bool) -> Result<Cow<'_, Entry>, Error> {
        if let Some(e) = self.frames.get(&time) {
            return Ok(Cow::Borrowed(e));
        }

        let index = self.index();
        let (Some(&min), Some(&max)) = (index.first(), index.last()) else {
            return Err(Error::EmptyStore);
        };
        let not_found = Error::NotFound { requested: time, min, max };

        if !interpolate {
            return Err(not_found);
        }

        if time < min || time > max {
            if self.strict {
                return Err(not_found);
            }
            let (edge, which) = if time < min { (min, "before start") } else { (max, "after end") };
            self.diagnostics.warn(
                Source::Store,
                &format!("Request for data at time {time}, {which} of metadata, returning {edge}"),
            );
            return self.frames.get(&edge).map(Cow::Borrowed).ok_or(Error::EmptyStore);
        }

        // min < time < max and not a key, so both neighbours exist.
        let later_idx = index.partition_point(|t| *t < time);
        let (earlier_time, later_time) = (index[later_idx - 1], index[later_idx]);
        drop(index);

        let (Some(earlier), Some(later)) = (self.frames.get(&earlier_time), self.frames.get(&later_time)) else {
            return Err(Error::Defect(format!("index out of step with frames at {time}")));
        };
        let fraction = (time - earlier_time).ratio(later_time - earlier_time);
        Ok(Cow::Owned(earlier.interpolate(later, fraction)))
    }

    /// Frame times from zero to the last key, `step` apart.
    pub fn stepper(&self, step: Timeunit) -> Stepper {
        Stepper {
            end: self.max(),
            step,
        }
    }

    /// Update each entry, in time order, from itself.
    pub fn process(&mut self, mut f: impl FnMut(&Entry) -> Option<Updates>) {
        let _ = self.try_process(|e| Ok(f(e)));
    }

    pub fn try_process(&mut self, f: impl FnMut(&Entry) -> Result<Option<Updates>, Error>) -> Result<(), Error> {
        self.try_process_filtered(|_| true, f)
    }

    /// Like [`FrameMeta::process`] but only for entries accepted by `filter`.
    pub fn process_filtered(
        &mut self,
        filter: impl Fn(&Entry) -> bool,
        mut f: impl FnMut(&Entry) -> Option<Updates>,
    ) {
        let _ = self.try_process_filtered(filter, |e| Ok(f(e)));
    }

    fn try_process_filtered(
        &mut self,
        filter: impl Fn(&Entry) -> bool,
        mut f: impl FnMut(&Entry) -> Result<Option<Updates>, Error>,
    ) -> Result<(), Error> {
        for t in self.times() {
            let Some(entry) = self.frames.get_mut(&t) else { continue };
            if !filter(&*entry) {
                continue;
            }
            if let Some(updates) = f(&*entry)? {
                entry.apply(updates);
            }
        }
        Ok(())
    }

    /// Update entry `i` from entries `i` and `i + skip`, in time order.
    pub fn process_deltas(&mut self, f: impl FnMut(&Entry, &Entry, usize) -> Option<Updates>, skip: usize) {
        self.process_deltas_filtered(|_| true, f, skip);
    }

    /// Like [`FrameMeta::process_deltas`], pairing entries within the
    /// sequence accepted by `filter`.
    pub fn process_deltas_filtered(
        &mut self,
        filter: impl Fn(&Entry) -> bool,
        mut f: impl FnMut(&Entry, &Entry, usize) -> Option<Updates>,
        skip: usize,
    ) {
        let skip = skip.max(1);
        let times: Vec<Timeunit> = self
            .times()
            .into_iter()
            .filter(|t| self.frames.get(t).is_some_and(&filter))
            .collect();

        for (a, b) in times.iter().zip(times.iter().skip(skip)) {
            let updates = match (self.frames.get(a), self.frames.get(b)) {
                (Some(ea), Some(eb)) => f(ea, eb, skip),
                _ => None,
            };
            if let (Some(updates), Some(entry)) = (updates, self.frames.get_mut(a)) {
                entry.apply(updates);
            }
        }
    }

    /// A reusable windowed view over this store.
    pub fn window<T: Clone, K: Fn(&Entry) -> Option<T>>(
        &self,
        duration: Timeunit,
        samples: usize,
        key: K,
        missing: T,
    ) -> Window<T, K> {
        Window::new(duration, samples, key, missing)
    }
}

pub struct Stepper {
    end: Option<Timeunit>,
    step: Timeunit,
}

impl Stepper {
    pub fn len(&self) -> usize {
        match self.end {
            Some(end) if self.step > Timeunit::ZERO && end >= Timeunit::ZERO => {
                (end.micros() / self.step.micros()) as usize + 1
            }
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn steps(&self) -> impl Iterator<Item = Timeunit> + '_ {
        (0..self.len()).map(|i| self.step * i as i64)
    }
}

/// Fixed-length sampled values around a moving time.
#[derive(Debug, Clone, PartialEq)]
pub struct View<T> {
    pub data: Vec<T>,
    pub version: u64,
}

const TICKS_MS: [i64; 6] = [100, 50, 25, 10, 5, 1];

pub struct Window<T, K> {
    duration: Timeunit,
    samples: usize,
    tick: Timeunit,
    key: K,
    missing: T,
    last_time: Option<Timeunit>,
    last_view: Option<View<T>>,
    cache: HashMap<Timeunit, Option<T>>,
    version: u64,
}

impl<T: Clone, K: Fn(&Entry) -> Option<T>> Window<T, K> {
    pub fn new(duration: Timeunit, samples: usize, key: K, missing: T) -> Self {
        let spacing = if samples == 0 { duration } else { duration / samples as i64 };
        let tick = TICKS_MS
            .iter()
            .map(|ms| Timeunit::from_millis(*ms))
            .find(|t| *t <= spacing)
            .unwrap_or(Timeunit::from_millis(1));

        Window {
            duration,
            samples,
            tick,
            key,
            missing,
            last_time: None,
            last_view: None,
            cache: HashMap::new(),
            version: 0,
        }
    }

    pub fn tick(&self) -> Timeunit {
        self.tick
    }

    /// Values around `at`. A request within one tick of the previous one
    /// returns the previous view unchanged.
    pub fn view(&mut self, store: &FrameMeta, at: Timeunit) -> Result<&View<T>, Error> {
        let reuse = matches!(
            (self.last_time, &self.last_view),
            (Some(last), Some(_)) if (at - last).abs() < self.tick
        );
        if !reuse {
            let view = self.recalculate(store, at)?;
            self.last_view = Some(view);
        }
        self.last_view
            .as_ref()
            .ok_or_else(|| Error::Defect("window has no view".into()))
    }

    fn recalculate(&mut self, store: &FrameMeta, at: Timeunit) -> Result<View<T>, Error> {
        let at = at.align(self.tick);
        let start = at - self.duration / 2;
        let range = store.min().zip(store.max());

        let mut data = Vec::with_capacity(self.samples);
        for k in 0..self.samples {
            let current = start + self.tick * k as i64;
            let value = match range {
                Some((min, max)) if current >= min && current <= max => {
                    if !self.cache.contains_key(&current) {
                        let v = (self.key)(&*store.get(current, true)?);
                        self.cache.insert(current, v);
                    }
                    self.cache.get(&current).cloned().flatten()
                }
                _ => None,
            };
            data.push(value.unwrap_or_else(|| self.missing.clone()));
        }

        self.version += 1;
        self.last_time = Some(at);
        Ok(View {
            data,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;

    use super::*;
    use crate::diagnostics::CollectingDiagnostics;
    use crate::entry::Field;

    fn entry(ms: i64, alt: f64) -> Entry {
        Entry::new(DateTime::from_timestamp_millis(1_600_000_000_000 + ms).unwrap())
            .with(Field::Timestamp, ms as f64)
            .with(Field::Alt, alt)
    }

    fn store(points: &[(i64, f64)]) -> FrameMeta {
        let mut fm = FrameMeta::new();
        // insert out of order
        for (ms, alt) in points.iter().rev() {
            fm.insert(Timeunit::from_millis(*ms), entry(*ms, *alt));
        }
        fm
    }

    fn ms(v: i64) -> Timeunit {
        Timeunit::from_millis(v)
    }

    #[test]
    fn index_rebuilds_after_insert() {
        let mut fm = store(&[(0, 1.0), (100, 2.0)]);
        assert_eq!(fm.max(), Some(ms(100)));
        fm.insert(ms(300), entry(300, 3.0));
        assert_eq!(fm.max(), Some(ms(300)));
        assert_eq!(fm.times(), vec![ms(0), ms(100), ms(300)]);
        assert_eq!(fm.len(), 3);
    }

    #[test]
    fn exact_lookup_borrows() {
        let fm = store(&[(0, 1.0), (100, 2.0)]);
        assert!(matches!(fm.get(ms(100), false).unwrap(), Cow::Borrowed(_)));
        assert!(matches!(fm.get(ms(50), false), Err(Error::NotFound { .. })));
    }

    #[test]
    fn interpolation_stays_between_neighbours() {
        let fm = store(&[(0, 10.0), (100, 20.0), (250, 5.0), (300, 5.0)]);
        for t in 1..300 {
            let e = fm.get(ms(t), true).unwrap();
            let alt = e.number(Field::Alt).unwrap();
            let (lo, hi) = match t {
                0..=100 => (10.0, 20.0),
                101..=250 => (5.0, 20.0),
                _ => (5.0, 5.0),
            };
            assert!((lo..=hi).contains(&alt), "t={t} alt={alt}");
        }
        let mid = fm.get(ms(50), true).unwrap();
        assert_eq!(mid.number(Field::Alt), Some(15.0));
        assert_eq!(mid.dt, DateTime::from_timestamp_millis(1_600_000_000_050).unwrap());
    }

    #[test]
    fn lenient_clamps_and_reports() {
        let sink = Arc::new(CollectingDiagnostics::new());
        let mut fm = FrameMeta::with_diagnostics(sink.clone());
        fm.insert(ms(100), entry(100, 1.0));
        fm.insert(ms(200), entry(200, 2.0));

        assert_eq!(fm.get(ms(0), true).unwrap().number(Field::Alt), Some(1.0));
        assert_eq!(fm.get(ms(900), true).unwrap().number(Field::Alt), Some(2.0));
        assert_eq!(sink.from_source(Source::Store).len(), 2);

        fm.set_strict(true);
        match fm.get(ms(900), true) {
            Err(Error::NotFound { requested, min, max }) => {
                assert_eq!((requested, min, max), (ms(900), ms(100), ms(200)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_store() {
        assert!(matches!(FrameMeta::new().get(ms(0), true), Err(Error::EmptyStore)));
        assert!(FrameMeta::new().stepper(ms(10)).is_empty());
    }

    #[test]
    fn stepper_covers_zero_to_max() {
        let fm = store(&[(0, 1.0), (1000, 2.0)]);
        let s = fm.stepper(ms(250));
        assert_eq!(s.len(), 5);
        assert_eq!(s.steps().last(), Some(ms(1000)));
    }

    #[test]
    fn process_updates_in_place() {
        let mut fm = store(&[(0, 1.0), (100, 2.0)]);
        fm.process(|e| Some(Updates::new().set(Field::Dist, e.number(Field::Alt)? * 2.0)));
        assert_eq!(fm.get(ms(100), false).unwrap().number(Field::Dist), Some(4.0));
    }

    #[test]
    fn deltas_pair_with_skip() {
        let mut fm = store(&[(0, 1.0), (100, 2.0), (200, 4.0), (300, 8.0)]);
        fm.process_deltas(
            |a, b, skip| {
                let d = b.number(Field::Alt)? - a.number(Field::Alt)?;
                Some(Updates::new().set(Field::Dist, d / skip as f64))
            },
            2,
        );
        let dists: Vec<_> = fm.items().iter().map(|(_, e)| e.number(Field::Dist)).collect();
        assert_eq!(dists, vec![Some(1.5), Some(3.0), None, None]);
    }

    #[test]
    fn filtered_deltas_skip_rejected_entries() {
        let mut fm = store(&[(0, 1.0), (100, -1.0), (200, 4.0)]);
        fm.process_deltas_filtered(
            |e| e.number(Field::Alt).is_some_and(|a| a > 0.0),
            |a, b, _| Some(Updates::new().set(Field::Dist, b.number(Field::Alt)? - a.number(Field::Alt)?)),
            1,
        );
        assert_eq!(fm.get(ms(0), false).unwrap().number(Field::Dist), Some(3.0));
        assert_eq!(fm.get(ms(100), false).unwrap().number(Field::Dist), None);
    }

    #[test]
    fn tick_from_preference_list() {
        let w = Window::new(ms(10_000), 100, |e: &Entry| e.number(Field::Alt), 0.0);
        assert_eq!(w.tick(), ms(100));
        let w = Window::new(ms(1_000), 30, |e: &Entry| e.number(Field::Alt), 0.0);
        assert_eq!(w.tick(), ms(25));
        let w = Window::new(ms(10), 100, |e: &Entry| e.number(Field::Alt), 0.0);
        assert_eq!(w.tick(), ms(1));
    }

    #[test]
    fn window_fills_missing_and_caches() {
        let fm = store(&[(0, 0.0), (1000, 10.0)]);
        let mut w = fm.window(ms(1000), 10, |e| e.number(Field::Alt), -1.0);

        let v = w.view(&fm, ms(0)).unwrap().clone();
        assert_eq!(v.data.len(), 10);
        assert_eq!(&v.data[..5], &[-1.0; 5]);
        assert_eq!(v.data[5], 0.0);
        assert_eq!(v.data[6], 1.0);
        assert_eq!(v.version, 1);

        let again = w.view(&fm, ms(60)).unwrap();
        assert_eq!(again.version, 1);

        let moved = w.view(&fm, ms(500)).unwrap();
        assert_eq!(moved.version, 2);
        assert_eq!(moved.data[0], 0.0);
        assert_eq!(moved.data[9], 9.0);
    }
}
