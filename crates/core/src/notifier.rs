use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::{Seller, StockChange};

/// Notification channels known to this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Sms,
    Email,
}

/// Configuration name to channel lookup.
const CHANNELS: &[(&str, ChannelKind)] = &[("sms", ChannelKind::Sms), ("email", ChannelKind::Email)];

impl ChannelKind {
    /// Resolves a configured channel name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        CHANNELS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, kind)| *kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human readable record of a delivered stock notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub sent_at: DateTime<Utc>,
    pub channel: ChannelKind,
    pub recipient: String,
    pub seller_uuid: String,
    pub product_name: String,
    pub old_stock: u32,
    pub new_stock: u32,
    pub message: String,
}

/// Destination for delivery records produced by stub channels.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, record: DeliveryRecord) -> Result<(), NotificationError>;
}

/// Failure of a single notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("{channel} delivery failed: {reason}")]
    Delivery {
        channel: ChannelKind,
        reason: String,
    },
    #[error("{channel} delivery timed out after {timeout_ms}ms")]
    TimedOut { channel: ChannelKind, timeout_ms: u64 },
    #[error("{channel} notifier aborted: {reason}")]
    Aborted {
        channel: ChannelKind,
        reason: String,
    },
}

impl NotificationError {
    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::Delivery { channel, .. }
            | Self::TimedOut { channel, .. }
            | Self::Aborted { channel, .. } => *channel,
        }
    }
}

/// SMS channel. Delivery is stubbed: the warning is handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsNotifier {
    pub product_name: String,
    pub seller_phone: String,
    pub seller_uuid: String,
}

impl SmsNotifier {
    fn stock_changed(
        &self,
        change: StockChange,
        sink: &dyn DeliverySink,
    ) -> Result<(), NotificationError> {
        let message = format!(
            "SMS warning sent to {} (phone {}): stock of {} changed from {} to {}",
            self.seller_uuid,
            self.seller_phone,
            self.product_name,
            change.old_stock,
            change.new_stock
        );
        sink.deliver(DeliveryRecord {
            sent_at: Utc::now(),
            channel: ChannelKind::Sms,
            recipient: self.seller_phone.clone(),
            seller_uuid: self.seller_uuid.clone(),
            product_name: self.product_name.clone(),
            old_stock: change.old_stock,
            new_stock: change.new_stock,
            message,
        })
    }
}

/// Email channel. Delivery is not implemented and the notifier does nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailNotifier {
    pub seller_email: String,
}

/// A notification channel bound to one seller and product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notifier {
    Sms(SmsNotifier),
    Email(EmailNotifier),
}

impl Notifier {
    fn bind(kind: ChannelKind, product_name: &str, seller: &Seller) -> Self {
        match kind {
            ChannelKind::Sms => Self::Sms(SmsNotifier {
                product_name: product_name.to_string(),
                seller_phone: seller.phone.clone(),
                seller_uuid: seller.uuid.clone(),
            }),
            ChannelKind::Email => Self::Email(EmailNotifier {
                seller_email: seller.email.clone(),
            }),
        }
    }

    pub fn channel(&self) -> ChannelKind {
        match self {
            Self::Sms(_) => ChannelKind::Sms,
            Self::Email(_) => ChannelKind::Email,
        }
    }

    /// Reacts to a stock transition of the bound product.
    pub fn on_stock_changed(
        &self,
        change: StockChange,
        sink: &dyn DeliverySink,
    ) -> Result<(), NotificationError> {
        match self {
            Self::Sms(sms) => sms.stock_changed(change, sink),
            Self::Email(_) => Ok(()),
        }
    }
}

/// Builds the notifier set for a stock change from the configured channel names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierFactory {
    channels: Vec<ChannelKind>,
}

impl NotifierFactory {
    /// Resolves the configured names once. Unrecognized names are dropped
    /// without error so configs may list channels this build lacks.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let channels = names
            .iter()
            .filter_map(|name| {
                let kind = ChannelKind::from_name(name.as_ref());
                if kind.is_none() {
                    tracing::debug!(stage = "notifier", channel = name.as_ref(), "ignoring unknown notifier channel");
                }
                kind
            })
            .collect();
        Self { channels }
    }

    pub fn channels(&self) -> &[ChannelKind] {
        &self.channels
    }

    /// Returns one notifier per enabled channel, in configured order.
    pub fn create_notifiers(&self, product_name: &str, seller: &Seller) -> Vec<Notifier> {
        self.channels
            .iter()
            .map(|kind| Notifier::bind(*kind, product_name, seller))
            .collect()
    }
}
