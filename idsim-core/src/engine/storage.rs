//! Physical storage model: efficiency losses and capacity bounds.

use crate::domain::units::{volume_from_mwh, volume_to_mwh, VOLUME_SCALE};
use crate::domain::Volume;

/// Tolerance for capacity checks on accumulated floating-point levels.
const LEVEL_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageModel {
    pub max: f64,
    pub loss_in: f64,
    pub loss_out: f64,
}

impl StorageModel {
    /// Change in stored energy (MWh) when trading `volume`.
    ///
    /// Buying charges `v · loss_in`; selling drains `v / loss_out`.
    pub fn energy(&self, volume: Volume) -> f64 {
        let mwh = volume_to_mwh(volume);
        if mwh >= 0.0 {
            mwh * self.loss_in
        } else {
            mwh / self.loss_out
        }
    }

    /// Trade volume that moves the level by `energy`, rounded to volume units.
    pub fn volume_for(&self, energy: f64) -> Volume {
        volume_from_mwh(self.market_mwh(energy))
    }

    /// Like `volume_for`, truncated toward zero.
    pub fn volume_for_truncated(&self, energy: f64) -> Volume {
        // Nudge before truncating so exact grid moves survive float noise.
        let scaled = self.market_mwh(energy) * VOLUME_SCALE;
        (scaled + scaled.signum() * 1e-7).trunc() as Volume
    }

    pub fn clamp(&self, level: f64) -> f64 {
        level.clamp(0.0, self.max.max(0.0))
    }

    pub fn contains(&self, level: f64) -> bool {
        level >= -LEVEL_EPS && level <= self.max + LEVEL_EPS
    }

    /// Move `volume` toward zero until `level + energy(volume)` is within
    /// capacity.
    pub fn fit(&self, level: f64, volume: Volume) -> Volume {
        let mut fitted = volume;
        if fitted > 0 {
            let headroom = (self.max - level).max(0.0);
            fitted = fitted.min(self.volume_for_truncated(headroom).max(0));
        } else if fitted < 0 {
            let available = level.max(0.0);
            fitted = fitted.max(self.volume_for_truncated(-available).min(0));
        }
        while fitted != 0 && !self.contains(level + self.energy(fitted)) {
            fitted -= fitted.signum();
        }
        fitted
    }

    fn market_mwh(&self, energy: f64) -> f64 {
        if energy >= 0.0 {
            energy / self.loss_in
        } else {
            energy * self.loss_out
        }
    }
}

/// Round a level to `decimals` places.
pub fn round_level(level: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (level * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> StorageModel {
        StorageModel {
            max: 10.0,
            loss_in: 0.9,
            loss_out: 0.8,
        }
    }

    #[test]
    fn losses_apply_per_direction() {
        let m = model();
        assert!((m.energy(100) - 9.0).abs() < 1e-12);
        assert!((m.energy(-80) + 10.0).abs() < 1e-12);
        assert_eq!(m.volume_for(9.0), 100);
        assert_eq!(m.volume_for(-10.0), -80);
    }

    #[test]
    fn fit_respects_capacity() {
        let m = model();
        assert_eq!(m.fit(5.0, 100), 55);
        assert!(m.contains(5.0 + m.energy(55)));
        assert_eq!(m.fit(2.0, -100), -16);
        assert_eq!(m.fit(2.0, 10), 10);
        assert_eq!(m.fit(10.0, 5), 0);
        assert_eq!(m.fit(0.0, -5), 0);
    }

    #[test]
    fn rounding_and_clamping() {
        assert_eq!(round_level(1.23456, 3), 1.235);
        assert_eq!(model().clamp(-0.1), 0.0);
        assert_eq!(model().clamp(12.0), 10.0);
    }
}
