/// Edge-triggered report state for a condition that should be logged once per occurrence.
///
/// A condition is logged when it first appears and, optionally, when it goes away, but never
/// while it persists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportLatch {
    #[default]
    Unreported,
    Reported,
}

impl ReportLatch {
    /// Marks the condition as present. Returns `true` if it was not reported yet.
    pub fn raise(&mut self) -> bool {
        match self {
            ReportLatch::Unreported => {
                *self = ReportLatch::Reported;
                true
            }
            ReportLatch::Reported => false,
        }
    }

    /// Marks the condition as gone. Returns `true` if it had been reported.
    pub fn clear(&mut self) -> bool {
        match self {
            ReportLatch::Reported => {
                *self = ReportLatch::Unreported;
                true
            }
            ReportLatch::Unreported => false,
        }
    }

    pub fn is_reported(&self) -> bool {
        matches!(self, ReportLatch::Reported)
    }
}
