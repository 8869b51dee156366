mod reaper;

pub use reaper::StaleConnectionReaper;
