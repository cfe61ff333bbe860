use crate::types::PageLocation;

/// Bounded back/forward list of visited locations.
#[derive(Debug, Clone)]
pub struct LocationHistory {
    entries: Vec<PageLocation>,
    /// Index of the entry the view currently sits on.
    cursor: usize,
    limit: usize,
}

impl LocationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            limit: limit.max(1),
        }
    }

    /// Records `location`, discarding any forward entries.
    pub fn push(&mut self, location: PageLocation) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        if self
            .entries
            .last()
            .is_some_and(|last| last.approx_eq(&location))
        {
            return;
        }
        self.entries.push(location);
        if self.entries.len() > self.limit {
            let excess = self.entries.len() - self.limit;
            self.entries.drain(..excess);
        }
        self.cursor = self.entries.len() - 1;
    }

    pub fn back(&mut self) -> Option<PageLocation> {
        if self.entries.is_empty() || self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).copied()
    }

    pub fn forward(&mut self) -> Option<PageLocation> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).copied()
    }

    pub fn can_go_back(&self) -> bool {
        !self.entries.is_empty() && self.cursor > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_and_forward_walk_the_list() {
        let mut history = LocationHistory::new(10);
        for page in 0..3 {
            history.push(PageLocation::top_of(page));
        }
        assert_eq!(history.back().map(|l| l.page), Some(1));
        assert_eq!(history.back().map(|l| l.page), Some(0));
        assert_eq!(history.back(), None);
        assert_eq!(history.forward().map(|l| l.page), Some(1));

        history.push(PageLocation::top_of(7));
        assert!(!history.can_go_forward());
        assert_eq!(history.len(), 3);
        assert_eq!(history.back().map(|l| l.page), Some(1));
    }

    #[test]
    fn duplicates_and_overflow() {
        let mut history = LocationHistory::new(3);
        history.push(PageLocation::new(2, 10.0, 10.0));
        history.push(PageLocation::new(2, 10.2, 10.0));
        assert_eq!(history.len(), 1);
        for page in 3..8 {
            history.push(PageLocation::top_of(page));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.back().map(|l| l.page), Some(6));
        assert_eq!(history.back().map(|l| l.page), Some(5));
        assert_eq!(history.back(), None);
    }
}
