// Rate-limited complaining about a repeated failure class.
//
// The first failure of a run is logged at error level ("onset"); further
// failures are suppressed while the complaint is active, except that a
// nonzero interval allows a reminder once the interval has elapsed.  The
// first success after a run of failures logs a recovery notice at info level
// and clears the state.  Suppression applies to logging only - the caller
// still sees every failure as a returned status.

use std::time::{Duration, Instant};

pub struct Complaint {
    interval: Duration,
    complaining: bool,
    last: Option<Instant>,
}

impl Complaint {
    // interval == 0 means log exactly once per onset.
    pub fn new(interval: Duration) -> Complaint {
        Complaint {
            interval,
            complaining: false,
            last: None,
        }
    }

    pub fn is_complaining(&self) -> bool {
        self.complaining
    }

    // Record a failure.  Returns true if a line was logged.
    pub fn complain(&mut self, msg: &str) -> bool {
        let now = Instant::now();
        let due = if !self.complaining {
            true
        } else {
            !self.interval.is_zero()
                && match self.last {
                    Some(t) => now.duration_since(t) >= self.interval,
                    None => true,
                }
        };
        self.complaining = true;
        if due {
            log::error!("{msg}");
            self.last = Some(now);
        }
        due
    }

    // Record a success.  Returns true if a recovery notice was logged.
    pub fn release(&mut self, msg: &str) -> bool {
        if !self.complaining {
            return false;
        }
        self.complaining = false;
        self.last = None;
        log::info!("{msg}");
        true
    }
}

#[test]
pub fn test_complaint_once_per_onset() {
    let mut c = Complaint::new(Duration::ZERO);
    assert!(!c.is_complaining());
    let mut onsets = 0;
    for _ in 0..10 {
        if c.complain("cannot publish") {
            onsets += 1;
        }
    }
    assert!(onsets == 1);
    assert!(c.is_complaining());
    assert!(c.release("recovered"));
    assert!(!c.is_complaining());
    // A second success is silent.
    assert!(!c.release("recovered"));
    // A new run of failures logs a new onset.
    assert!(c.complain("cannot publish"));
}

#[test]
pub fn test_complaint_interval_reminder() {
    let mut c = Complaint::new(Duration::from_millis(1));
    assert!(c.complain("x"));
    std::thread::sleep(Duration::from_millis(5));
    // The interval has elapsed, so a reminder is due.
    assert!(c.complain("x"));
}

#[test]
pub fn test_complaint_release_without_failures() {
    let mut c = Complaint::new(Duration::ZERO);
    assert!(!c.release("nothing happened"));
}
