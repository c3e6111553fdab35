//! Full-jitter exponential backoff for the reconnect loop (§4.5 "Reconnect
//! policy"): on the n-th consecutive failure, sleep a random duration in
//! `[0, min(60s, 2^(n-1)))`.

use std::time::Duration;

use rand::Rng;

pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const CAP_SECS: f64 = 60.0;

/// `attempt` is the 1-indexed consecutive-failure count.
pub fn full_jitter_delay(attempt: u32) -> Duration {
    let exp = CAP_SECS.min(2f64.powi(attempt as i32 - 1));
    let jittered = rand::thread_rng().gen_range(0.0..exp.max(f64::MIN_POSITIVE));
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_the_sixty_second_cap() {
        for attempt in 1..=20 {
            let delay = full_jitter_delay(attempt);
            assert!(delay <= Duration::from_secs(60), "attempt {attempt} gave {delay:?}");
        }
    }

    #[test]
    fn delay_grows_with_attempt_count_on_average() {
        let first = full_jitter_delay(1);
        assert!(first <= Duration::from_secs(1));
    }
}
