use core::hint::spin_loop;

/// Bounded exponential backoff for contended spinning.
///
/// Each [`snooze`](Backoff::snooze) issues twice as many spin hints as the
/// previous one, up to `2^MAX_STEP`.
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const MAX_STEP: u32 = 6;

    pub const fn new() -> Self {
        Self { step: 0 }
    }

    #[inline]
    pub fn snooze(&mut self) {
        for _ in 0..(1u32 << self.step) {
            spin_loop();
        }
        if self.step < Self::MAX_STEP {
            self.step += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_saturates() {
        let mut backoff = Backoff::new();
        for _ in 0..20 {
            backoff.snooze();
        }
        assert_eq!(backoff.step, Backoff::MAX_STEP);
    }
}
