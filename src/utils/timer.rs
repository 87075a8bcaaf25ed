//! Phase timing for runs

use std::time::{Duration, Instant};

/// Time spent in one named phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseTiming {
    pub phase: &'static str,
    pub duration: Duration,
}

/// Measures consecutive, non-overlapping phases
#[derive(Debug)]
pub struct PhaseTimer {
    started: Instant,
    current: Option<(&'static str, Instant)>,
    phases: Vec<PhaseTiming>,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            current: None,
            phases: Vec::new(),
        }
    }

    /// Close the open phase, if any, and open `phase`
    pub fn enter(&mut self, phase: &'static str) {
        self.finish();
        self.current = Some((phase, Instant::now()));
    }

    /// Close the open phase
    pub fn finish(&mut self) {
        if let Some((phase, since)) = self.current.take() {
            self.phases.push(PhaseTiming {
                phase,
                duration: since.elapsed(),
            });
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// One-line summary such as `clean 2ms, execute 1.4s`
    pub fn summary(&self) -> String {
        self.phases
            .iter()
            .map(|p| format!("{} {}", p.phase, format_duration(p.duration)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable duration: `850ms`, `12.3s` or `4m 05s`
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_phases_are_consecutive() {
        let mut timer = PhaseTimer::new();
        timer.enter("clean");
        sleep(Duration::from_millis(5));
        timer.enter("execute");
        sleep(Duration::from_millis(5));
        timer.finish();
        timer.finish();

        let phases: Vec<_> = timer.phases.iter().map(|p| p.phase).collect();
        assert_eq!(phases, vec!["clean", "execute"]);
        assert!(timer.phases[0].duration >= Duration::from_millis(5));
        assert!(timer.summary().starts_with("clean "));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m 05s");
    }
}
