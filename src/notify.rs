use tracing::info;

use crate::model::Notification;

/// Sink for user-facing notifications raised by the poller.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// `[2024-03-01 10:00:00] New application ...`
pub fn render(notification: &Notification) -> String {
    format!(
        "[{}] {}",
        notification.at.format("%Y-%m-%d %H:%M:%S"),
        notification.message
    )
}

/// Emits each notification as a structured log event (`watch --log-only`).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        info!(
            subject = %notification.subject_id,
            at = %notification.at,
            "{}",
            notification.message
        );
    }
}

/// One line per notification on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&self, notification: &Notification) {
        println!("{}", render(notification));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Id;
    use chrono::{TimeZone, Utc};
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sample() -> Notification {
        Notification {
            subject_id: Id::from(7),
            message: "New application received for job 7".into(),
            at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn render_prefixes_timestamp() {
        assert_eq!(
            render(&sample()),
            "[2024-03-01 10:00:00] New application received for job 7"
        );
    }

    #[test]
    fn log_notifier_emits_info_event() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || LogNotifier.notify(&sample()));

        let out = captured.text();
        assert!(out.contains("INFO"), "{}", out);
        assert!(out.contains("New application received for job 7"), "{}", out);
        assert!(out.contains("subject=7"), "{}", out);
    }
}
