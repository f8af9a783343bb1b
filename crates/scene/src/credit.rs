/// Attribution shown for data rendered in a frame.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Credit {
    pub html: String,
}

impl Credit {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }
}

/// A credit together with how many times it was used in the last frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCredit {
    pub credit: Credit,
    pub count: u32,
}

/// Per-frame credit usage collector.
#[derive(Debug, Default)]
pub struct CreditDisplay {
    current: Vec<FrameCredit>,
}

impl CreditDisplay {
    pub fn begin_frame(&mut self) {
        self.current.clear();
    }

    pub fn add(&mut self, credit: &Credit) {
        match self.current.iter_mut().find(|c| c.credit == *credit) {
            Some(entry) => entry.count += 1,
            None => self.current.push(FrameCredit {
                credit: credit.clone(),
                count: 1,
            }),
        }
    }

    /// Credits in first-use order.
    pub fn frame_credits(&self) -> &[FrameCredit] {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::{Credit, CreditDisplay};

    #[test]
    fn counts_repeated_credits() {
        let mut display = CreditDisplay::default();
        display.begin_frame();
        display.add(&Credit::new("a"));
        display.add(&Credit::new("b"));
        display.add(&Credit::new("a"));
        let counts: Vec<_> = display
            .frame_credits()
            .iter()
            .map(|c| (c.credit.html.as_str(), c.count))
            .collect();
        assert_eq!(counts, vec![("a", 2), ("b", 1)]);

        display.begin_frame();
        assert!(display.frame_credits().is_empty());
    }
}
