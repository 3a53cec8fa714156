use tracing::info;

/// Fan-out for human-facing notifications about detection activity.
///
/// Levels run 0 (chatter) to 5 (emergency); a notifier forwards messages at
/// or above its configured level and drops the rest.
pub trait Notifier: Send + Sync {
  fn level(&self) -> u8;

  fn send(&self, message: &str);

  fn notify(&self, message: &str, level: u8) {
    if level >= self.level() {
      self.send(message);
    }
  }
}

/// Routes notifications through the log stream.
#[derive(Debug, Clone)]
pub struct LogNotifier {
  pub level: u8,
}

impl LogNotifier {
  pub fn new(level: u8) -> Self {
    Self { level }
  }
}

impl Default for LogNotifier {
  fn default() -> Self {
    Self { level: 0 }
  }
}

impl Notifier for LogNotifier {
  fn level(&self) -> u8 {
    self.level
  }

  fn send(&self, message: &str) {
    info!("{message}");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  struct Recorder {
    level: u8,
    seen: Mutex<Vec<String>>,
  }

  impl Notifier for Recorder {
    fn level(&self) -> u8 {
      self.level
    }

    fn send(&self, message: &str) {
      self.seen.lock().unwrap().push(message.to_string());
    }
  }

  #[test]
  fn drops_messages_below_level() {
    let recorder = Recorder {
      level: 3,
      seen: Mutex::new(Vec::new()),
    };
    recorder.notify("quiet", 1);
    recorder.notify("loud", 3);
    recorder.notify("louder", 5);
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.as_slice(), ["loud", "louder"]);
  }
}
