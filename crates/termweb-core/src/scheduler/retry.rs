//! Whether a failed connection is tried again.

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up and report the error.
    NoRetry,
    /// Run the connection again; `tries` is the updated attempt counter.
    Retry { tries: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up; 0 retries forever.
    pub max_tries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_tries: 3 }
    }
}

impl RetryPolicy {
    /// `tries` counts the retries done so far. Requests with POST data are
    /// never repeated: the server may already have acted on them.
    pub fn decide(&self, has_post: bool, tries: u32) -> RetryDecision {
        if has_post {
            return RetryDecision::NoRetry;
        }
        if self.max_tries == 0 {
            return RetryDecision::Retry { tries };
        }
        let tries = tries + 1;
        if tries >= self.max_tries {
            return RetryDecision::NoRetry;
        }
        RetryDecision::Retry { tries }
    }
}
