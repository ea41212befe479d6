//! Status LED seam. On real hardware this drives a GPIO pin; on the host the
//! transitions land in the log sink.

use std::time::Duration;

use tracing::trace;

pub trait StatusLed: Send + Sync {
    fn set(&self, on: bool);
}

/// Host-side stand-in that records transitions at trace level.
pub struct LogLed;

impl StatusLed for LogLed {
    fn set(&self, on: bool) {
        trace!("status led {}", if on { "on" } else { "off" });
    }
}

/// Brief indicator blink, used on every sensor sample.
pub async fn pulse(led: &dyn StatusLed) {
    led.set(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    led.set(false);
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::StatusLed;

    /// Records every transition for assertions.
    #[derive(Default)]
    pub struct RecordingLed {
        pub transitions: Mutex<Vec<bool>>,
    }

    impl StatusLed for RecordingLed {
        fn set(&self, on: bool) {
            self.transitions.lock().unwrap().push(on);
        }
    }
}
