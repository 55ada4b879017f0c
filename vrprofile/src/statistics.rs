use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dialoguer::console::Term;

use crate::utils::format_bytes;

/// Transfer counters of the running operation
#[derive(Debug, Default)]
pub struct Statistics {
    pub modules: Counter,
    pub files: Counter,
    pub removed: Counter,
    pub bytes: ByteCounter,
}

impl Statistics {
    pub fn reset(&self) {
        self.modules.reset();
        self.files.reset();
        self.removed.reset();
        self.bytes.reset();
    }

    pub fn format_with_style(&self, term: &Term) -> String {
        let num_style = |n: String| term.style().bold().apply_to(n);
        [
            format!("modules: {}", num_style(self.modules.get().to_string())),
            format!("files:   {}", num_style(self.files.get().to_string())),
            format!("bytes:   {}", num_style(format_bytes(self.bytes.get()))),
            format!("removed: {}", num_style(self.removed.get().to_string())),
        ]
        .join("\n")
    }
}

#[derive(Debug, Default)]
pub struct Counter(AtomicUsize);

impl Counter {
    pub fn increase(&self) {
        self.add(1);
    }

    pub fn add(&self, n: usize) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct ByteCounter(AtomicU64);

impl ByteCounter {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}
