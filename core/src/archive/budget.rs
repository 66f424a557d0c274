use crate::error::{CoreError, CoreResult};
use std::time::{Duration, Instant};

/// Wall-clock budget for one build attempt. The queue owns the real limit;
/// this lets an attempt stop cleanly between objects instead of being killed
/// mid-write.
#[derive(Debug, Clone, Copy)]
pub struct AttemptBudget {
    deadline: Option<Instant>,
    secs: u64,
}

impl AttemptBudget {
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            secs: 0,
        }
    }

    pub fn from_secs(secs: Option<u64>) -> Self {
        match secs {
            Some(s) => Self {
                deadline: Some(Instant::now() + Duration::from_secs(s)),
                secs: s,
            },
            None => Self::unbounded(),
        }
    }

    pub fn check(&self) -> CoreResult<()> {
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(CoreError::Timeout(format!(
                "attempt budget of {}s exhausted",
                self.secs
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AttemptBudget;
    use crate::error::CoreError;

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let b = AttemptBudget::from_secs(Some(0));
        assert!(matches!(b.check(), Err(CoreError::Timeout(_))));
        assert!(AttemptBudget::unbounded().check().is_ok());
    }
}
