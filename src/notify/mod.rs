//! Best-effort delivery of listings to chat channels.
//!
//! Every configured recipient is its own [`Notifier`]. The
//! [`NotificationDispatcher`] tries all of them for each delivery; a failing
//! channel is logged and never stops the others. Each channel retries
//! transient failures on its own (see [`retry`]).

pub mod format;
pub mod retry;
mod telegram;
mod vk;

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::Result;
use crate::models::{Ad, NotifyConfig};

pub use retry::{RETRY_STATUSES, RetryPolicy, send_with_retries};
pub use telegram::TelegramNotifier;
pub use vk::VkNotifier;

/// One delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel and recipient, for logs.
    fn name(&self) -> &str;

    async fn notify_ad(&self, ad: &Ad) -> Result<()>;

    async fn notify_message(&self, message: &str) -> Result<()>;
}

/// Outcome of one dispatch across channels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub failed: usize,
}

impl DeliveryReport {
    fn merge(&mut self, other: DeliveryReport) {
        self.attempted += other.attempted;
        self.failed += other.failed;
    }
}

/// Fans notifications out to every channel.
#[derive(Default)]
pub struct NotificationDispatcher {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    fn report(&self, results: Vec<(usize, Result<()>)>) -> DeliveryReport {
        let mut report = DeliveryReport {
            attempted: results.len(),
            failed: 0,
        };
        for (index, result) in results {
            if let Err(e) = result {
                report.failed += 1;
                log::warn!("[notify] {} failed: {}", self.notifiers[index].name(), e);
            }
        }
        report
    }

    /// Send one listing to every channel.
    pub async fn notify_ad(&self, ad: &Ad) -> DeliveryReport {
        let sends = self
            .notifiers
            .iter()
            .enumerate()
            .map(|(index, notifier)| async move { (index, notifier.notify_ad(ad).await) });
        self.report(join_all(sends).await)
    }

    /// Send listings one after another to every channel.
    pub async fn notify_many(&self, ads: &[Ad]) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        for ad in ads {
            total.merge(self.notify_ad(ad).await);
        }
        total
    }

    /// Send a free-form message to every channel.
    pub async fn notify_message(&self, message: &str) -> DeliveryReport {
        let sends = self
            .notifiers
            .iter()
            .enumerate()
            .map(|(index, notifier)| async move { (index, notifier.notify_message(message).await) });
        self.report(join_all(sends).await)
    }
}

/// One notifier per configured recipient.
pub fn build_notifier(config: &NotifyConfig, base_url: &str) -> Result<NotificationDispatcher> {
    let policy = RetryPolicy::from_config(config);
    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();

    if let Some(token) = config.tg_token.as_deref().filter(|t| !t.is_empty()) {
        for chat_id in &config.tg_chat_ids {
            notifiers.push(Box::new(TelegramNotifier::new(token, chat_id, base_url, policy)?));
        }
    }
    if let Some(token) = config.vk_token.as_deref().filter(|t| !t.is_empty()) {
        for user_id in &config.vk_user_ids {
            notifiers.push(Box::new(VkNotifier::new(token, user_id, base_url, policy)?));
        }
    }

    if notifiers.is_empty() {
        log::info!("No notification channels configured");
    } else {
        log::info!("Notification channels: {}", notifiers.len());
    }
    Ok(NotificationDispatcher::new(notifiers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeChannel {
        name: String,
        fail: bool,
        delivered: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Notifier for FakeChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn notify_ad(&self, _ad: &Ad) -> Result<()> {
            if self.fail {
                return Err(AppError::notify(&self.name, "down"));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_message(&self, message: &str) -> Result<()> {
            self.notify_ad(&Ad {
                title: message.to_string(),
                ..Ad::default()
            })
            .await
        }
    }

    fn channel(name: &str, fail: bool, delivered: &Arc<AtomicUsize>) -> Box<dyn Notifier> {
        Box::new(FakeChannel {
            name: name.to_string(),
            fail,
            delivered: delivered.clone(),
        })
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_stop_others() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let dispatcher = NotificationDispatcher::new(vec![
            channel("a", true, &delivered),
            channel("b", false, &delivered),
            channel("c", false, &delivered),
        ]);

        let report = dispatcher.notify_ad(&Ad::default()).await;

        assert_eq!(report, DeliveryReport { attempted: 3, failed: 1 });
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_notify_many_and_message() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let dispatcher = NotificationDispatcher::new(vec![channel("a", false, &delivered)]);

        let report = dispatcher.notify_many(&[Ad::default(), Ad::default()]).await;
        assert_eq!(report.attempted, 2);
        dispatcher.notify_message("done").await;
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_build_one_notifier_per_recipient() {
        let config = NotifyConfig {
            tg_token: Some("123:abc".to_string()),
            tg_chat_ids: vec!["1".to_string(), "2".to_string()],
            vk_token: Some("vk".to_string()),
            vk_user_ids: vec!["durov".to_string()],
            ..NotifyConfig::default()
        };
        let dispatcher = build_notifier(&config, "https://www.avito.ru").unwrap();
        assert_eq!(dispatcher.channel_names(), vec!["telegram:1", "telegram:2", "vk:durov"]);
    }

    #[test]
    fn test_build_without_credentials_is_empty() {
        let dispatcher = build_notifier(&NotifyConfig::default(), "https://www.avito.ru").unwrap();
        assert!(dispatcher.is_empty());
    }
}
