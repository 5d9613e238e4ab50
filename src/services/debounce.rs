//! Consecutive-sample debouncing
//!
//! A raw value is only committed after `required` identical samples in a row.
//! Any differing sample restarts the streak, so a single flicker inside a run
//! of stable samples never changes the committed value.

/// Value committed by the debouncer, stamped with the first sample of its streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed<T, S> {
    pub value: T,
    pub since: S,
}

#[derive(Debug, Clone, Copy)]
struct Streak<T, S> {
    value: T,
    count: u32,
    first_seen: S,
}

/// Debouncer over values `T` stamped with times `S`
#[derive(Debug, Clone)]
pub struct Debouncer<T, S> {
    required: u32,
    stable: Option<T>,
    streak: Option<Streak<T, S>>,
}

impl<T: Copy + PartialEq, S: Copy> Debouncer<T, S> {
    pub fn new(required: u32) -> Self {
        Self { required: required.max(1), stable: None, streak: None }
    }

    /// Feed one raw sample.
    ///
    /// Returns the newly committed value when this sample completes a streak
    /// that differs from the current stable value (or seeds the first one).
    pub fn observe(&mut self, value: T, at: S) -> Option<Committed<T, S>> {
        if self.stable == Some(value) {
            self.streak = None;
            return None;
        }

        let streak = match self.streak {
            Some(mut streak) if streak.value == value => {
                streak.count += 1;
                streak
            }
            _ => Streak { value, count: 1, first_seen: at },
        };

        if streak.count >= self.required {
            self.stable = Some(value);
            self.streak = None;
            return Some(Committed { value, since: streak.first_seen });
        }

        self.streak = Some(streak);
        None
    }

    /// Last committed value, if any
    #[inline]
    pub fn stable(&self) -> Option<T> {
        self.stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sample_commits_when_required_is_one() {
        let mut d: Debouncer<bool, u64> = Debouncer::new(1);
        assert_eq!(d.observe(true, 10), Some(Committed { value: true, since: 10 }));
        assert_eq!(d.observe(true, 11), None);
        assert_eq!(d.observe(false, 12), Some(Committed { value: false, since: 12 }));
    }

    #[test]
    fn test_zero_required_is_treated_as_one() {
        let mut d: Debouncer<bool, u64> = Debouncer::new(0);
        assert_eq!(d.observe(true, 5), Some(Committed { value: true, since: 5 }));
    }

    #[test]
    fn test_commit_stamped_with_first_sample_of_streak() {
        let mut d: Debouncer<bool, u64> = Debouncer::new(3);
        assert_eq!(d.observe(true, 100), None);
        assert_eq!(d.observe(true, 101), None);
        assert_eq!(d.observe(true, 102), Some(Committed { value: true, since: 100 }));
        assert_eq!(d.stable(), Some(true));
    }

    #[test]
    fn test_flicker_restarts_streak() {
        let mut d: Debouncer<bool, u64> = Debouncer::new(3);
        for t in 0..3 {
            d.observe(false, t);
        }
        assert_eq!(d.stable(), Some(false));

        // true, false, true, true: the flicker back to false resets the count
        assert_eq!(d.observe(true, 10), None);
        assert_eq!(d.observe(false, 11), None);
        assert_eq!(d.observe(true, 12), None);
        assert_eq!(d.observe(true, 13), None);
        assert_eq!(d.stable(), Some(false));
        assert_eq!(d.observe(true, 14), Some(Committed { value: true, since: 12 }));
    }

    #[test]
    fn test_single_flicker_never_commits() {
        let mut d: Debouncer<bool, u64> = Debouncer::new(3);
        let samples = [false, false, false, true, false, false, false];
        let commits: Vec<_> =
            samples.iter().enumerate().filter_map(|(t, &v)| d.observe(v, t as u64)).collect();
        assert_eq!(commits, vec![Committed { value: false, since: 0 }]);
    }
}
