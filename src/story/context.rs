use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub number: u32,
    pub text: String,
    /// Cached continuity summary, filled lazily by the consistency check.
    pub summary: Option<String>,
}

/// Fixed-capacity sliding window over the most recently written scenes.
#[derive(Debug, Clone)]
pub struct RecentContext {
    capacity: usize,
    entries: VecDeque<ContextEntry>,
}

impl RecentContext {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, number: u32, text: impl Into<String>, summary: Option<String>) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ContextEntry {
            number,
            text: text.into(),
            summary,
        });
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut ContextEntry> {
        self.entries.iter_mut()
    }

    /// The last `k` scenes joined oldest first, as fed into the next prompt.
    pub fn window(&self, k: usize) -> String {
        let skip = self.entries.len().saturating_sub(k);
        self.entries
            .iter()
            .skip(skip)
            .map(|e| e.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest() {
        let mut ctx = RecentContext::new(4);
        for n in 1..=25 {
            ctx.push(n, format!("scene {n}"), None);
            assert!(ctx.len() <= 4);
        }
        let numbers: Vec<u32> = ctx.entries().map(|e| e.number).collect();
        assert_eq!(numbers, vec![22, 23, 24, 25]);
    }

    #[test]
    fn window_takes_most_recent_in_order() {
        let mut ctx = RecentContext::new(4);
        ctx.push(1, "one", None);
        ctx.push(2, "two", None);
        ctx.push(3, "three", None);
        assert_eq!(ctx.window(2), "two\n\nthree");
        assert_eq!(ctx.window(10), "one\n\ntwo\n\nthree");
        assert_eq!(RecentContext::new(2).window(2), "");
    }

    #[test]
    fn zero_capacity_is_coerced() {
        let mut ctx = RecentContext::new(0);
        ctx.push(1, "a", None);
        ctx.push(2, "b", None);
        assert_eq!(ctx.capacity(), 1);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.window(1), "b");
    }
}
