/// Receives every published caption value.
///
/// Buffered requests publish once; streaming requests publish after each
/// token, and every value is a prefix of the next.
pub trait CaptionObserver: Send {
    fn publish(&mut self, caption: &str);
}

impl<F> CaptionObserver for F
where
    F: FnMut(&str) + Send,
{
    fn publish(&mut self, caption: &str) {
        self(caption)
    }
}

/// Discards everything.
pub struct NullObserver;

impl CaptionObserver for NullObserver {
    fn publish(&mut self, _caption: &str) {}
}

/// Caption text produced so far by one request.
#[derive(Debug, Default, Clone)]
pub struct CaptionAccumulator {
    text: String,
    publishes: usize,
}

impl CaptionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole caption (buffered mode) and publish it.
    pub fn set(&mut self, caption: String, observer: &mut dyn CaptionObserver) {
        self.text = caption;
        self.publish(observer);
    }

    /// Append one token (streaming mode) and publish the new value.
    pub fn append(&mut self, token: &str, observer: &mut dyn CaptionObserver) {
        self.text.push_str(token);
        self.publish(observer);
    }

    fn publish(&mut self, observer: &mut dyn CaptionObserver) {
        self.publishes += 1;
        observer.publish(&self.text);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn publishes(&self) -> usize {
        self.publishes
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Collects published values, for tests and for callers that want the history.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    pub values: Vec<String>,
}

impl CaptionObserver for RecordingObserver {
    fn publish(&mut self, caption: &str) {
        self.values.push(caption.to_string());
    }
}
