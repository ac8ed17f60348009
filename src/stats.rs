use std::sync::atomic::{AtomicU64, Ordering};

/// operation counters backing the synthetic `stats` file
///
/// each counter is incremented by the dispatcher as operations are
/// serviced; rendering takes a point-in-time snapshot with relaxed loads,
/// so a racing writer can be under- or over-counted by one between two
/// reads of the file rather than the read blocking on other operations.
#[derive(Default)]
pub struct Stats {
    pub lookups: AtomicU64,
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub creates: AtomicU64,
    pub unlinks: AtomicU64,
    pub mkdirs: AtomicU64,
    pub rmdirs: AtomicU64,
    pub renames: AtomicU64,
    pub readdirs: AtomicU64,
    pub promotions: AtomicU64,
    pub whiteouts_created: AtomicU64,
}

macro_rules! counter_incr {
    ($($name:ident),* $(,)?) => {
        $(
            pub fn $name(&self) {
                self.$name.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    counter_incr!(
        lookups,
        reads,
        writes,
        creates,
        unlinks,
        mkdirs,
        rmdirs,
        renames,
        readdirs,
        promotions,
        whiteouts_created,
    );

    /// render the current counters as the text body of the `stats` file
    pub fn render(&self) -> String {
        format!(
            "lookups: {}\n\
             reads: {}\n\
             writes: {}\n\
             creates: {}\n\
             unlinks: {}\n\
             mkdirs: {}\n\
             rmdirs: {}\n\
             renames: {}\n\
             readdirs: {}\n\
             promotions: {}\n\
             whiteouts_created: {}\n",
            self.lookups.load(Ordering::Relaxed),
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
            self.creates.load(Ordering::Relaxed),
            self.unlinks.load(Ordering::Relaxed),
            self.mkdirs.load(Ordering::Relaxed),
            self.rmdirs.load(Ordering::Relaxed),
            self.renames.load(Ordering::Relaxed),
            self.readdirs.load(Ordering::Relaxed),
            self.promotions.load(Ordering::Relaxed),
            self.whiteouts_created.load(Ordering::Relaxed),
        )
    }
}

/// name of the synthetic stats entry exposed at the mount root
pub const STATS_FILE_NAME: &str = "stats";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment_and_render() {
        let stats = Stats::new();
        stats.writes();
        stats.writes();
        stats.unlinks();

        let rendered = stats.render();
        assert!(rendered.contains("writes: 2"));
        assert!(rendered.contains("unlinks: 1"));
        assert!(rendered.contains("reads: 0"));
    }
}
