// Progress reporting for long stages (downloads, output writing).
// Logs at every 10% step instead of drawing a bar.

use log::info;

const STEPS: u64 = 10;

pub struct ProgressReporter {
    stage: &'static str,
    total: u64,
    done: u64,
    next_step: u64,
}

impl ProgressReporter {
    /// `total == 0` means unknown; only the final count is logged.
    pub fn new(stage: &'static str, total: u64) -> Self {
        ProgressReporter {
            stage,
            total,
            done: 0,
            next_step: 1,
        }
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn advance(&mut self, amount: u64) {
        self.done += amount;
        if self.total == 0 {
            return;
        }
        while self.next_step <= STEPS && self.done * STEPS >= self.total * self.next_step {
            info!(
                "event=progress stage={} percent={} done={} total={}",
                self.stage,
                self.next_step * 100 / STEPS,
                self.done,
                self.total
            );
            self.next_step += 1;
        }
    }

    pub fn finish(&self) {
        info!("event=stage_done stage={} done={}", self.stage, self.done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_advance() {
        let mut progress = ProgressReporter::new("test", 200);
        progress.advance(19);
        assert_eq!(progress.next_step, 1);
        progress.advance(1);
        assert_eq!(progress.next_step, 2);
        progress.advance(180);
        assert_eq!(progress.next_step, STEPS + 1);
        assert_eq!(progress.done(), 200);
    }

    #[test]
    fn test_unknown_total() {
        let mut progress = ProgressReporter::new("download", 0);
        progress.advance(4096);
        assert_eq!(progress.done(), 4096);
        assert_eq!(progress.next_step, 1);
    }
}
