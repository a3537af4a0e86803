//! Boundary search between the idle screen and real content.
//!
//! The content is assumed to be idle before some second `b` and not idle
//! after it. The search steps forward at full size while it keeps seeing the
//! idle screen and halves its step (reversing direction) once it overshoots.

/// Search tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub initial_gap: i64,
    pub tolerance: i64,
    pub max_iterations: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            initial_gap: 300,
            tolerance: 10,
            max_iterations: 20,
        }
    }
}

/// What the caller should do after reporting a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// Sample at this time next.
    Probe(i64),
    /// The boundary is at this time.
    Done(i64),
}

/// Search state. Drive it with [`BoundarySearch::start`] and [`BoundarySearch::record`].
#[derive(Debug, Clone)]
pub struct BoundarySearch {
    params: SearchParams,
    current: i64,
    gap: i64,
    prev_idle: bool,
    iterations: u32,
}

impl BoundarySearch {
    pub fn new(params: SearchParams) -> Self {
        Self {
            params,
            current: 0,
            gap: params.initial_gap,
            // The recording opens on the idle screen
            prev_idle: true,
            iterations: 0,
        }
    }

    /// First time to sample.
    pub fn start(&mut self) -> i64 {
        self.current += self.gap;
        self.current
    }

    /// Report whether the frame at the last probed time was idle.
    pub fn record(&mut self, idle: bool) -> SearchStep {
        if self.gap.abs() <= self.params.tolerance {
            return SearchStep::Done(self.current);
        }

        self.gap = if idle && self.prev_idle {
            self.gap.abs()
        } else if idle {
            // Stepped back onto the idle screen: go forward again at half size
            self.gap.abs() / 2
        } else {
            -(self.gap.abs() / 2)
        };
        self.prev_idle = idle;
        self.iterations += 1;

        if self.iterations >= self.params.max_iterations {
            return SearchStep::Done(self.current);
        }
        self.current += self.gap;
        SearchStep::Probe(self.current)
    }

    /// Completed direction updates so far.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

/// Run a search against a synchronous classifier.
pub fn search_with<F: FnMut(i64) -> bool>(params: SearchParams, mut is_idle: F) -> (i64, u32) {
    let mut search = BoundarySearch::new(params);
    let mut t = search.start();
    loop {
        match search.record(is_idle(t)) {
            SearchStep::Probe(next) => t = next,
            SearchStep::Done(found) => return (found, search.iterations()),
        }
    }
}
