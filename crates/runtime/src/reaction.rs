use tracing::{debug, warn};

/// Identifies a registered [`Reaction`] inside a [`Reactions`] set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReactionId(pub u64);

/// A named computation re-run when its declared inputs change.
///
/// `inputs` returns a snapshot of the versions the reaction depends on. The
/// reaction runs when that snapshot differs from the one recorded after its
/// previous run (and always on its first pass).
pub struct Reaction {
    pub id: &'static str,
    /// Smaller values run earlier.
    pub priority: i32,
    inputs: Box<dyn Fn() -> Vec<u64>>,
    run: Box<dyn FnMut()>,
    last_inputs: Option<Vec<u64>>,
}

impl Reaction {
    pub fn new(
        id: &'static str,
        inputs: impl Fn() -> Vec<u64> + 'static,
        run: impl FnMut() + 'static,
    ) -> Self {
        Self::with_priority(id, 0, inputs, run)
    }

    pub fn with_priority(
        id: &'static str,
        priority: i32,
        inputs: impl Fn() -> Vec<u64> + 'static,
        run: impl FnMut() + 'static,
    ) -> Self {
        Self {
            id,
            priority,
            inputs: Box::new(inputs),
            run: Box::new(run),
            last_inputs: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub passes: usize,
    pub runs: usize,
    /// False when the pass limit was hit while reactions were still dirty.
    pub settled: bool,
}

/// Explicit recompute-on-change scheduler.
///
/// Ordering is deterministic: `(priority, id, insertion_order)`.
pub struct Reactions {
    next_order: u64,
    reactions: Vec<(u64, Reaction)>,
    max_passes: usize,
}

impl Default for Reactions {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactions {
    pub const DEFAULT_MAX_PASSES: usize = 16;

    pub fn new() -> Self {
        Self {
            next_order: 0,
            reactions: Vec::new(),
            max_passes: Self::DEFAULT_MAX_PASSES,
        }
    }

    pub fn with_max_passes(max_passes: usize) -> Self {
        Self {
            max_passes: max_passes.max(1),
            ..Self::new()
        }
    }

    pub fn add(&mut self, reaction: Reaction) -> ReactionId {
        let order = self.next_order;
        self.next_order = self.next_order.wrapping_add(1);
        self.reactions.push((order, reaction));
        self.reactions.sort_by(|(oa, a), (ob, b)| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.id.cmp(b.id))
                .then_with(|| oa.cmp(ob))
        });
        ReactionId(order)
    }

    pub fn dispose(&mut self, id: ReactionId) -> bool {
        let before = self.reactions.len();
        self.reactions.retain(|(order, _)| *order != id.0);
        before != self.reactions.len()
    }

    pub fn clear(&mut self) {
        self.reactions.clear();
    }

    pub fn len(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactions.is_empty()
    }

    /// Runs dirty reactions until no inputs change, bounded by `max_passes`.
    ///
    /// Input snapshots are taken after each run, so a reaction writing to one
    /// of its own inputs does not re-trigger itself.
    pub fn run_pending(&mut self) -> RunSummary {
        let mut summary = RunSummary::default();
        while summary.passes < self.max_passes {
            summary.passes += 1;
            let mut ran_this_pass = 0usize;
            for (_, reaction) in &mut self.reactions {
                let current = (reaction.inputs)();
                if reaction.last_inputs.as_ref() == Some(&current) {
                    continue;
                }
                debug!(reaction = reaction.id, "running reaction");
                (reaction.run)();
                reaction.last_inputs = Some((reaction.inputs)());
                ran_this_pass += 1;
            }
            summary.runs += ran_this_pass;
            if ran_this_pass == 0 {
                summary.settled = true;
                return summary;
            }
        }
        warn!(
            passes = summary.passes,
            "reactions did not settle within the pass limit"
        );
        summary
    }
}
