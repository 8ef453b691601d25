//! Executor configuration.

/// Default number of candidates requested per scan round.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Configuration for query execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// `COUNT` hint passed to every scan round.
    pub page_size: usize,

    /// Reject unrecognized structure types instead of defaulting to hash.
    pub strict_structure_types: bool,

    /// Evaluate the subjects of a multi-subject select on separate threads.
    pub parallel_subjects: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            strict_structure_types: false,
            parallel_subjects: false,
        }
    }
}

impl ExecutorConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan page size. Zero is treated as one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Enable or disable strict structure type resolution.
    pub fn with_strict_structure_types(mut self, strict: bool) -> Self {
        self.strict_structure_types = strict;
        self
    }

    /// Enable or disable parallel subject evaluation.
    pub fn with_parallel_subjects(mut self, parallel: bool) -> Self {
        self.parallel_subjects = parallel;
        self
    }
}
