use std::cell::Cell;

/// Process-unique identity for engine and catalog objects.
///
/// Ids are compared by value; two objects share an id only if one was
/// cloned from the other.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u64);

impl Id {
    pub fn new(n: u64) -> Self {
        Id(n)
    }

    /// Allocates the next id from the thread-local counter.
    pub fn next() -> Self {
        NEXT_ID.with(|next| {
            let id = next.get();
            next.set(id.wrapping_add(1));
            Id(id)
        })
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}
