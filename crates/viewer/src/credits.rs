use runtime::Observable;
use scene::FrameCredit;

/// One edit applied to the attribution list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributionOp {
    Remove { index: usize, html: String },
    Insert { index: usize, html: String },
    Move { from: usize, to: usize },
}

/// Attribution list kept in step with the engine's per-frame credits.
///
/// Entries are ordered by how often the last frame used them. Entries that
/// did not change position are left where they are.
#[derive(Debug, Clone, Default)]
pub struct CreditAggregator {
    attributions: Observable<Vec<String>>,
}

impl CreditAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attributions(&self) -> &Observable<Vec<String>> {
        &self.attributions
    }

    /// Merges one frame's credits. Returns the edits, empty when the list
    /// already matched and was left untouched.
    pub fn update(&self, credits: &[FrameCredit]) -> Vec<AttributionOp> {
        let mut sorted: Vec<&FrameCredit> = credits.iter().collect();
        sorted.sort_by(|a, b| b.count.cmp(&a.count));
        let mut desired: Vec<String> = Vec::with_capacity(sorted.len());
        for credit in sorted {
            if !desired.contains(&credit.credit.html) {
                desired.push(credit.credit.html.clone());
            }
        }

        if self.attributions.with(|current| *current == desired) {
            return Vec::new();
        }
        self.attributions
            .update(|current| apply_minimal_diff(current, &desired))
    }
}

fn apply_minimal_diff(current: &mut Vec<String>, desired: &[String]) -> Vec<AttributionOp> {
    let mut ops = Vec::new();

    // Reverse so removals do not shift the indices still to visit.
    for index in (0..current.len()).rev() {
        if !desired.contains(&current[index]) {
            let html = current.remove(index);
            ops.push(AttributionOp::Remove { index, html });
        }
    }

    for (index, html) in desired.iter().enumerate() {
        match current.iter().position(|c| c == html) {
            Some(found) if found == index => {}
            Some(from) => {
                let entry = current.remove(from);
                current.insert(index, entry);
                ops.push(AttributionOp::Move { from, to: index });
            }
            None => {
                current.insert(index, html.clone());
                ops.push(AttributionOp::Insert {
                    index,
                    html: html.clone(),
                });
            }
        }
    }
    ops
}
