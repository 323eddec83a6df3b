//! Smoothers and derived-field passes for [`FrameMeta`](crate::FrameMeta).
//!
//! Each `calculate_*` function returns a closure for
//! [`FrameMeta::process`](crate::FrameMeta::process) or
//! [`FrameMeta::process_deltas`](crate::FrameMeta::process_deltas).

use crate::entry::{Entry, Field, Updates};
use crate::interpret::GpsFix;
use crate::point::Point3;

/// One-dimensional Kalman filter with fixed noise parameters.
#[derive(Debug, Clone, Copy)]
pub struct Kalman {
    r: f64,
    h: f64,
    q: f64,
    p: f64,
    u_hat: f64,
}

impl Default for Kalman {
    fn default() -> Self {
        Kalman {
            r: 100.0,
            h: 1.0,
            q: 10.0,
            p: 0.0,
            u_hat: 0.0,
        }
    }
}

impl Kalman {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, u: f64) -> f64 {
        let k = self.p * self.h / (self.h * self.p * self.h + self.r);
        self.u_hat += k * (u - self.h * self.u_hat);
        self.p = (1.0 - k * self.h) * self.p + self.q;
        self.u_hat
    }
}

/// Simple exponential smoothing.
#[derive(Debug, Clone, Copy)]
pub struct SimpleExponential {
    alpha: f64,
    previous: Option<f64>,
    forecast: Option<f64>,
}

impl Default for SimpleExponential {
    fn default() -> Self {
        SimpleExponential::new(0.4)
    }
}

impl SimpleExponential {
    pub fn new(alpha: f64) -> Self {
        SimpleExponential {
            alpha,
            previous: None,
            forecast: None,
        }
    }

    pub fn update(&mut self, current: f64) -> f64 {
        let out = match (self.forecast, self.previous) {
            (Some(forecast), Some(previous)) => self.alpha * previous + (1.0 - self.alpha) * forecast,
            _ => current,
        };
        self.forecast = Some(out);
        self.previous = Some(current);
        out
    }
}

/// Kalman-smooth each axis of a 3D field independently, writing to `target`.
pub fn kalman_point3(source: Field, target: Field) -> impl FnMut(&Entry) -> Option<Updates> {
    let (mut kx, mut ky, mut kz) = (Kalman::new(), Kalman::new(), Kalman::new());
    move |e: &Entry| {
        let p = e.point3(source)?;
        Some(Updates::new().set(target, Point3::new(kx.update(p.x), ky.update(p.y), kz.update(p.z))))
    }
}

pub fn kalman(source: Field, target: Field) -> impl FnMut(&Entry) -> Option<Updates> {
    let mut k = Kalman::new();
    move |e: &Entry| Some(Updates::new().set(target, k.update(e.number(source).unwrap_or(0.0))))
}

pub fn exponential(source: Field, target: Field, alpha: f64) -> impl FnMut(&Entry) -> Option<Updates> {
    let mut ses = SimpleExponential::new(alpha);
    move |e: &Entry| Some(Updates::new().set(target, ses.update(e.number(source).unwrap_or(0.0))))
}

/// Speed, distance, elapsed time and heading between two fixes.
pub fn calculate_speeds() -> impl FnMut(&Entry, &Entry, usize) -> Option<Updates> {
    |a: &Entry, b: &Entry, skip: usize| {
        let (pa, pb) = (a.point()?, b.point()?);
        let dist = pa.distance_to(&pb);
        let azi = pa.bearing_to(&pb);
        let cog = if azi >= 0.0 { azi } else { 360.0 + azi };
        let time = (b.dt - a.dt).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
        let speed = if time > 0.0 { dist / time } else { 0.0 };

        Some(
            Updates::new()
                .set(Field::CSpeed, speed)
                .set(Field::Dist, dist / skip as f64)
                .set(Field::Time, time)
                .set(Field::Azi, azi)
                .set(Field::Cog, cog),
        )
    }
}

/// Running total of `dist`.
pub fn calculate_odo() -> impl FnMut(&Entry) -> Option<Updates> {
    let mut total = 0.0;
    move |e: &Entry| {
        if let Some(d) = e.number(Field::Dist) {
            total += d;
        }
        Some(Updates::new().set(Field::Codo, total))
    }
}

/// Gradient in percent between two fixes at least a metre apart. Values of
/// 45% or more are stored as `bad_grad`.
pub fn calculate_gradient() -> impl FnMut(&Entry, &Entry, usize) -> Option<Updates> {
    |a: &Entry, b: &Entry, _skip: usize| {
        let gain = b.number(Field::Alt)? - a.number(Field::Alt)?;
        let dist = a.point()?.distance_to(&b.point()?);
        if dist <= 1.0 {
            return None;
        }
        let grad = gain / dist * 100.0;
        let field = if grad.abs() < 45.0 { Field::CGrad } else { Field::BadGrad };
        Some(Updates::new().set(field, grad))
    }
}

const MOTION_FIELDS: [Field; 9] = [
    Field::Speed,
    Field::CSpeed,
    Field::Azi,
    Field::Cog,
    Field::Time,
    Field::Dist,
    Field::CGrad,
    Field::BadGrad,
    Field::Alt,
];

pub fn is_locked(e: &Entry) -> bool {
    e.number(Field::GpsFix)
        .and_then(|v| GpsFix::from_value(v as i64))
        .is_some_and(GpsFix::is_locked)
}

/// Strip motion fields from entries without a lock.
pub fn filter_locked() -> impl FnMut(&Entry) -> Option<Updates> {
    |e: &Entry| {
        if is_locked(e) {
            return None;
        }
        Some(MOTION_FIELDS.iter().fold(Updates::new(), |u, f| u.remove(*f)))
    }
}
