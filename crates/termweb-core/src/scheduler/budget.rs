//! Global count of running connections.

/// Running connections across all hosts. Every running connection holds
/// exactly one unit from admission until it is interrupted.
#[derive(Debug)]
pub struct ActiveBudget {
    max_total: usize,
    in_use: usize,
}

impl ActiveBudget {
    /// Create a budget with the given maximum (e.g. from config).
    pub fn new(max_total: usize) -> Self {
        Self {
            max_total: max_total.max(1),
            in_use: 0,
        }
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Slots left before admission has to suspend someone.
    pub fn available(&self) -> usize {
        self.max_total.saturating_sub(self.in_use)
    }

    pub fn is_full(&self) -> bool {
        self.in_use >= self.max_total
    }

    /// Take a unit. Never refused: admission checks [`Self::is_full`] first,
    /// and connections reviving a pooled socket may overshoot briefly.
    pub fn acquire(&mut self) {
        self.in_use += 1;
    }

    pub fn release(&mut self) {
        if self.in_use == 0 {
            tracing::error!("active connections underflow");
            return;
        }
        self.in_use -= 1;
    }
}
