use std::collections::{HashMap, VecDeque};
use terra_core::{QuadId, QuadRecord};

/// Where a quad known to the slot limiter currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Waiting for a free slot.
    Queued,
    /// Holds a slot, waiting for the rate limiter.
    RateLimited,
    /// Holds a slot, tiles being assembled.
    Assembling,
}

impl Stage {
    pub fn holds_slot(self) -> bool {
        !matches!(self, Self::Queued)
    }
}

/// Bounds how many quads are past admission and not yet delivered.
///
/// A quad holds its slot from admission until its record is delivered back
/// through [`SlotLimiter::deliver`] (or [`SlotLimiter::release`]). Waiting
/// quads are admitted FIFO as slots free up.
#[derive(Debug)]
pub struct SlotLimiter {
    limit: usize,
    stages: HashMap<QuadId, Stage>,
    queue: VecDeque<QuadId>,
    in_flight: usize,
}

impl SlotLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            stages: HashMap::new(),
            queue: VecDeque::new(),
            in_flight: 0,
        }
    }

    /// Admits `quad` immediately when a slot is free, otherwise queues it.
    /// Quads already queued or in flight are ignored.
    pub fn request(&mut self, quad: QuadId) -> Option<QuadId> {
        if self.stages.contains_key(&quad) {
            return None;
        }
        if self.in_flight < self.limit {
            self.stages.insert(quad, Stage::RateLimited);
            self.in_flight += 1;
            Some(quad)
        } else {
            self.stages.insert(quad, Stage::Queued);
            self.queue.push_back(quad);
            None
        }
    }

    /// Frees the slot held by `quad` and admits the next queued quad, if any.
    /// Releasing a quad that holds no slot does nothing.
    pub fn release(&mut self, quad: QuadId) -> Option<QuadId> {
        match self.stages.get(&quad) {
            Some(stage) if stage.holds_slot() => {}
            _ => return None,
        }
        self.stages.remove(&quad);
        self.in_flight -= 1;
        self.admit_next()
    }

    /// Passes a finished quad through, releasing its slot on the way.
    pub fn deliver(&mut self, quad: QuadRecord) -> (QuadRecord, Option<QuadId>) {
        let next = self.release(quad.id);
        (quad, next)
    }

    /// Drops queued quads for which `keep` is false. Admitted quads are never
    /// touched. Returns how many were dropped.
    pub fn retain_queued(&mut self, mut keep: impl FnMut(&QuadId) -> bool) -> usize {
        let before = self.queue.len();
        let stages = &mut self.stages;
        self.queue.retain(|quad| {
            let kept = keep(quad);
            if !kept {
                stages.remove(quad);
            }
            kept
        });
        before - self.queue.len()
    }

    /// Moves an admitted quad to a later stage. Queued quads cannot be
    /// marked; they only leave the queue through admission.
    pub fn mark(&mut self, quad: QuadId, stage: Stage) {
        if !stage.holds_slot() {
            return;
        }
        if let Some(current) = self.stages.get_mut(&quad) {
            if current.holds_slot() {
                *current = stage;
            }
        }
    }

    pub fn stage(&self, quad: QuadId) -> Option<Stage> {
        self.stages.get(&quad).copied()
    }

    pub fn contains(&self, quad: &QuadId) -> bool {
        self.stages.contains_key(quad)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn admit_next(&mut self) -> Option<QuadId> {
        if self.in_flight >= self.limit {
            return None;
        }
        let next = self.queue.pop_front()?;
        self.stages.insert(next, Stage::RateLimited);
        self.in_flight += 1;
        Some(next)
    }
}
