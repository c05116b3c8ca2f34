use std::ops::Deref;

use telemetry_runtime::Snapshot;

/// The "current state" view: latest accepted snapshot, or all-zero defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiveAggregate(Snapshot);

impl LiveAggregate {
    pub fn snapshot(&self) -> &Snapshot {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Snapshot::default()
    }
}

impl Deref for LiveAggregate {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.0
    }
}

impl PartialEq<Snapshot> for LiveAggregate {
    fn eq(&self, other: &Snapshot) -> bool {
        &self.0 == other
    }
}

/// Project a session sequence onto its live aggregate.
pub fn aggregate<'a, I>(sequence: I) -> LiveAggregate
where
    I: IntoIterator<Item = &'a Snapshot>,
    I::IntoIter: DoubleEndedIterator,
{
    sequence
        .into_iter()
        .next_back()
        .cloned()
        .map(LiveAggregate)
        .unwrap_or_default()
}
