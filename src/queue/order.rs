// Track order: a permutation of track indices with its inverse
// Sequential until shuffled; reshuffled on wraparound while shuffle is on

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::OrderError;

/// Logical position -> physical track index, and back.
///
/// `forward[position]` is the track played at that position and
/// `inverse[track]` is the position it is played at. Both are always
/// rebuilt together so they never disagree.
#[derive(Debug, Clone)]
pub struct TrackOrder {
    forward: Vec<usize>,
    inverse: Vec<usize>,
    seed: u64,
    shuffle: bool,
    rng: StdRng,
}

impl TrackOrder {
    /// Allocate an identity order for `ntracks` tracks, shuffling at once
    /// when `shuffle` is enabled.
    pub fn new(ntracks: usize, seed: u64, shuffle: bool) -> Result<Self, OrderError> {
        let (forward, inverse) = identity(ntracks)?;
        let mut order = Self {
            forward,
            inverse,
            seed,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        };
        if shuffle {
            order.reshuffle();
        }
        Ok(order)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn forward(&self) -> &[usize] {
        &self.forward
    }

    pub fn inverse(&self) -> &[usize] {
        &self.inverse
    }

    /// Physical track index played at `position`.
    pub fn at(&self, position: usize) -> Result<usize, OrderError> {
        self.forward
            .get(position)
            .copied()
            .ok_or(OrderError::OutOfRange {
                index: position,
                len: self.len(),
            })
    }

    /// Logical position of the physical track `track`.
    pub fn position_of(&self, track: usize) -> Result<usize, OrderError> {
        self.inverse
            .get(track)
            .copied()
            .ok_or(OrderError::OutOfRange {
                index: track,
                len: self.len(),
            })
    }

    /// Fisher-Yates shuffle of the forward map, then a full inverse rebuild.
    pub fn reshuffle(&mut self) {
        for i in (1..self.forward.len()).rev() {
            let j = self.rng.gen_range(0..=i);
            self.forward.swap(i, j);
        }
        self.rebuild_inverse();
        debug!("reshuffled {} tracks", self.forward.len());
    }

    fn rebuild_inverse(&mut self) {
        for (position, &track) in self.forward.iter().enumerate() {
            self.inverse[track] = position;
        }
    }

    /// Restart the shuffle sequence from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Reallocate for a new playlist size. Any previous shuffle is discarded.
    pub fn resize(&mut self, ntracks: usize) -> Result<(), OrderError> {
        let (forward, inverse) = identity(ntracks)?;
        self.forward = forward;
        self.inverse = inverse;
        debug!("track order resized to {}", ntracks);
        Ok(())
    }

    /// Enable or disable shuffle. Returns true when this reshuffled.
    ///
    /// Turning shuffle off keeps the current order; it only stops
    /// further reshuffles.
    pub fn set_shuffle(&mut self, enabled: bool) -> bool {
        let was = std::mem::replace(&mut self.shuffle, enabled);
        if enabled && !was {
            self.reshuffle();
            true
        } else {
            false
        }
    }

    /// Position after `position`, and whether the order wrapped to the start.
    ///
    /// Wrapping reshuffles when shuffle is enabled.
    pub fn next_position(&mut self, position: usize) -> (usize, bool) {
        if position + 1 < self.len() {
            return (position + 1, false);
        }
        if self.shuffle {
            self.reshuffle();
        }
        (0, true)
    }

    pub fn previous_position(&self, position: usize) -> usize {
        match position {
            0 => self.len().saturating_sub(1),
            p => (p - 1).min(self.len().saturating_sub(1)),
        }
    }
}

fn identity(ntracks: usize) -> Result<(Vec<usize>, Vec<usize>), OrderError> {
    if ntracks == 0 {
        return Err(OrderError::Empty);
    }
    let mut forward = Vec::new();
    forward.try_reserve_exact(ntracks)?;
    forward.extend(0..ntracks);

    let mut inverse = Vec::new();
    inverse.try_reserve_exact(ntracks)?;
    inverse.extend(0..ntracks);

    Ok((forward, inverse))
}
