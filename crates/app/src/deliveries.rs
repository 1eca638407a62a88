use std::{collections::HashSet, time::Duration};

use axum::response::sse::{Event, KeepAlive};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{debug, info};

use catalog_core::notifier::{ChannelKind, DeliveryRecord, DeliverySink, NotificationError};

/// In-process feed of stock notification delivery records.
///
/// Every record is logged; subscribers of `/_debug/deliveries` additionally
/// receive it as an SSE event. Publishing never fails for lack of listeners.
#[derive(Clone)]
pub struct DeliveryFeed {
    sender: broadcast::Sender<DeliveryRecord>,
}

impl DeliveryFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(128);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryRecord> {
        self.sender.subscribe()
    }
}

impl Default for DeliveryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliverySink for DeliveryFeed {
    fn deliver(&self, record: DeliveryRecord) -> Result<(), NotificationError> {
        info!(
            stage = "notifier",
            channel = record.channel.as_str(),
            seller_uuid = %record.seller_uuid,
            recipient = %record.recipient,
            old_stock = record.old_stock,
            new_stock = record.new_stock,
            "{}",
            record.message
        );
        if self.sender.send(record).is_err() {
            debug!(stage = "notifier", "no delivery feed subscribers");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    channels: Option<HashSet<ChannelKind>>,
}

impl DeliveryFilter {
    pub fn from_channels(channels: Option<HashSet<ChannelKind>>) -> Self {
        Self { channels }
    }

    pub fn matches(&self, record: &DeliveryRecord) -> bool {
        match &self.channels {
            Some(channels) => channels.contains(&record.channel),
            None => true,
        }
    }
}

fn into_sse_event(record: &DeliveryRecord) -> Result<Event, serde_json::Error> {
    let data = serde_json::to_string(record)?;
    Ok(Event::default().event(record.channel.as_str()).data(data))
}

pub fn delivery_stream(
    feed: DeliveryFeed,
    filter: DeliveryFilter,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static {
    BroadcastStream::new(feed.subscribe()).filter_map(move |result| match result {
        Ok(record) if filter.matches(&record) => Some(into_sse_event(&record)),
        Ok(_) => None,
        Err(_) => None,
    })
}

pub fn delivery_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(20))
        .text("heartbeat")
}

pub fn parse_channel_list(value: Option<String>) -> Result<Option<HashSet<ChannelKind>>, String> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let mut set = HashSet::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let channel = ChannelKind::from_name(&item.to_lowercase())
            .ok_or_else(|| format!("unknown channel '{item}'"))?;
        set.insert(channel);
    }

    if set.is_empty() {
        Ok(None)
    } else {
        Ok(Some(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(channel: ChannelKind) -> DeliveryRecord {
        DeliveryRecord {
            sent_at: Utc::now(),
            channel,
            recipient: "555-1111".into(),
            seller_uuid: "S1".into(),
            product_name: "Widget".into(),
            old_stock: 5,
            new_stock: 3,
            message: "stock changed".into(),
        }
    }

    #[test]
    fn deliver_succeeds_without_subscribers() {
        let feed = DeliveryFeed::new();
        feed.deliver(record(ChannelKind::Sms))
            .expect("delivery without listeners");
    }

    #[test]
    fn subscribers_receive_records() {
        let feed = DeliveryFeed::new();
        let mut receiver = feed.subscribe();
        feed.deliver(record(ChannelKind::Sms)).expect("delivery");

        let received = receiver.try_recv().expect("record published");
        assert_eq!(received.product_name, "Widget");
        assert_eq!((received.old_stock, received.new_stock), (5, 3));
    }

    #[test]
    fn filter_limits_channels() {
        let channels = parse_channel_list(Some("sms".into())).expect("valid list");
        let filter = DeliveryFilter::from_channels(channels);
        assert!(filter.matches(&record(ChannelKind::Sms)));
        assert!(!filter.matches(&record(ChannelKind::Email)));
        assert!(DeliveryFilter::default().matches(&record(ChannelKind::Email)));
    }

    #[test]
    fn parse_channel_list_rejects_unknown_names() {
        assert_eq!(parse_channel_list(None).expect("none"), None);
        assert_eq!(parse_channel_list(Some(" , ".into())).expect("blank"), None);
        let err = parse_channel_list(Some("sms,pager".into())).unwrap_err();
        assert!(err.contains("pager"));
    }
}
