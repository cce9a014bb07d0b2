//! Timed value traces applied to resources.
//!
//! A profile is a list of `(time, value)` points, optionally repeated with a fixed period. Attached to a resource as a
//! _state profile_, a zero value turns the resource off and a positive value turns it on. Attached as a _scale
//! profile_, the value multiplies the nominal capacity of the resource (e.g. `0.5` models a background load taking
//! half of a CPU).

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// What a profile controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileTarget {
    /// On/off state, value 0 means off.
    State,
    /// Capacity multiplier.
    Scale,
}

/// A trace of timed values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    points: Vec<(f64, f64)>,
    period: Option<f64>,
}

/// Position of the next point to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ProfileCursor {
    pub profile: usize,
    pub index: usize,
    pub cycle: u64,
}

impl Profile {
    /// Creates profile from points sorted by time.
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self, PlatformError> {
        Self::validate_points(&points)?;
        Ok(Self { points, period: None })
    }

    /// Creates profile repeating its points every `period` seconds.
    ///
    /// All point times must be smaller than the period.
    pub fn periodic(points: Vec<(f64, f64)>, period: f64) -> Result<Self, PlatformError> {
        Self::validate_points(&points)?;
        if !(period.is_finite() && period > 0.) {
            return Err(PlatformError::InvalidProfile(format!("period must be positive, got {period}")));
        }
        if points.iter().any(|&(time, _)| time >= period) {
            return Err(PlatformError::InvalidProfile(format!(
                "all points must be within the period {period}"
            )));
        }
        Ok(Self {
            points,
            period: Some(period),
        })
    }

    fn validate_points(points: &[(f64, f64)]) -> Result<(), PlatformError> {
        if points.is_empty() {
            return Err(PlatformError::InvalidProfile("profile has no points".to_string()));
        }
        for window in points.windows(2) {
            if window[1].0 < window[0].0 {
                return Err(PlatformError::InvalidProfile("points are not sorted by time".to_string()));
            }
        }
        for &(time, value) in points {
            if !(time.is_finite() && time >= 0.) || !(value.is_finite() && value >= 0.) {
                return Err(PlatformError::InvalidProfile(format!("invalid point ({time}, {value})")));
            }
        }
        Ok(())
    }

    /// Returns the points of one period.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Returns the repetition period, if any.
    pub fn period(&self) -> Option<f64> {
        self.period
    }

    /// Returns the time and value of the point under the cursor.
    pub(crate) fn point_at(&self, cursor: &ProfileCursor) -> Option<(f64, f64)> {
        let &(time, value) = self.points.get(cursor.index)?;
        let offset = self.period.map_or(0., |period| period * cursor.cycle as f64);
        Some((time + offset, value))
    }

    /// Moves the cursor to the next point, wrapping around for periodic profiles.
    pub(crate) fn next_cursor(&self, cursor: &ProfileCursor) -> Option<ProfileCursor> {
        if cursor.index + 1 < self.points.len() {
            Some(ProfileCursor {
                index: cursor.index + 1,
                ..*cursor
            })
        } else if self.period.is_some() {
            Some(ProfileCursor {
                index: 0,
                cycle: cursor.cycle + 1,
                ..*cursor
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_profile_ends() {
        let profile = Profile::new(vec![(1., 0.), (3., 1.)]).unwrap();
        let start = ProfileCursor {
            profile: 0,
            index: 0,
            cycle: 0,
        };
        assert_eq!(profile.point_at(&start), Some((1., 0.)));
        let next = profile.next_cursor(&start).unwrap();
        assert_eq!(profile.point_at(&next), Some((3., 1.)));
        assert!(profile.next_cursor(&next).is_none());
    }

    #[test]
    fn periodic_profile_wraps() {
        let profile = Profile::periodic(vec![(0.5, 0.), (2., 1.)], 10.).unwrap();
        let mut cursor = ProfileCursor {
            profile: 0,
            index: 0,
            cycle: 0,
        };
        let mut times = Vec::new();
        for _ in 0..4 {
            times.push(profile.point_at(&cursor).unwrap().0);
            cursor = profile.next_cursor(&cursor).unwrap();
        }
        assert_eq!(times, vec![0.5, 2., 10.5, 12.]);
    }

    #[test]
    fn malformed_profiles_are_rejected() {
        assert!(Profile::new(vec![]).is_err());
        assert!(Profile::new(vec![(2., 1.), (1., 0.)]).is_err());
        assert!(Profile::new(vec![(1., -1.)]).is_err());
        assert!(Profile::periodic(vec![(5., 1.)], 5.).is_err());
    }
}
