use std::sync::Arc;

use parking_lot::Mutex;

/// A sink for the human-readable lines a repeated fit produces (trial banners, result listings
/// and notices).
///
/// Any `FnMut(&str) + Send` closure is a [`Reporter`].
pub trait Reporter: Send {
    /// Emit one line (which may itself contain newlines, e.g. a parameter listing).
    fn report(&mut self, line: &str);
}

impl<F: FnMut(&str) + Send> Reporter for F {
    fn report(&mut self, line: &str) {
        self(line)
    }
}

/// Print every line to standard output. This is the default [`Reporter`].
#[derive(Copy, Clone, Debug, Default)]
pub struct Stdout;

impl Reporter for Stdout {
    fn report(&mut self, line: &str) {
        println!("{}", line);
    }
}

/// Discard every line.
#[derive(Copy, Clone, Debug, Default)]
pub struct Silent;

impl Reporter for Silent {
    fn report(&mut self, _line: &str) {}
}

/// Collect every line into a shared buffer.
///
/// Clones share the same buffer, so a clone can be handed to a
/// [`RepeatedFit`](crate::RepeatedFit) while the original is kept to inspect the output.
#[derive(Clone, Debug, Default)]
pub struct Capture(Arc<Mutex<Vec<String>>>);

impl Capture {
    /// Construct an empty [`Capture`].
    pub fn new() -> Self {
        Self::default()
    }
    /// A snapshot of the lines collected so far.
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }
    /// Checks whether any collected line contains `pattern`.
    pub fn contains(&self, pattern: &str) -> bool {
        self.0.lock().iter().any(|line| line.contains(pattern))
    }
    /// Drop all collected lines.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl Reporter for Capture {
    fn report(&mut self, line: &str) {
        self.0.lock().push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(reporter: &mut dyn Reporter) {
        reporter.report("first");
        reporter.report("second");
    }

    #[test]
    fn test_capture_shares_buffer() {
        let capture = Capture::new();
        let mut handle = capture.clone();
        emit(&mut handle);
        assert_eq!(capture.lines(), vec!["first", "second"]);
        assert!(capture.contains("sec"));
        capture.clear();
        assert!(handle.lines().is_empty());
    }

    #[test]
    fn test_closure_reporter() {
        let mut count = 0;
        {
            let mut counter = |_: &str| count += 1;
            emit(&mut counter);
        }
        assert_eq!(count, 2);
        emit(&mut Silent);
    }
}
