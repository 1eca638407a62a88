use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{error, info, warn};

use catalog_core::notifier::{
    ChannelKind, DeliverySink, NotificationError, Notifier, NotifierFactory,
};
use catalog_core::types::{NewProduct, Product, ProductChanges, Seller, StockChange};
use catalog_storage::{Database, NewProductRecord, ProductError, SellerError};

/// Number of sellers returned by the top sellers ranking endpoint.
pub const TOP_SELLERS_LIMIT: u32 = 10;

/// Product catalog operations plus stock change notification dispatch.
#[derive(Clone)]
pub struct ProductCatalog {
    database: Database,
    notifiers: Arc<NotifierFactory>,
    sink: Arc<dyn DeliverySink>,
    notifier_timeout: Duration,
}

impl ProductCatalog {
    pub fn new(
        database: Database,
        notifiers: NotifierFactory,
        sink: Arc<dyn DeliverySink>,
        notifier_timeout: Duration,
    ) -> Self {
        Self {
            database,
            notifiers: Arc::new(notifiers),
            sink,
            notifier_timeout,
        }
    }

    pub async fn list(&self, offset: u32, limit: u32) -> Result<Vec<Product>, CatalogError> {
        Ok(self.database.products().list(offset, limit).await?)
    }

    pub async fn get(&self, uuid: &str) -> Result<Product, CatalogError> {
        self.database
            .products()
            .find_by_uuid(uuid)
            .await?
            .ok_or(CatalogError::NotFound)
    }

    /// Creates a product owned by an existing seller. Nothing is written when
    /// the seller cannot be found.
    pub async fn create(&self, input: &NewProduct) -> Result<Product, CatalogError> {
        if self.find_seller(&input.seller_uuid).await?.is_none() {
            return Err(CatalogError::SellerNotFound);
        }

        let record = NewProductRecord::with_generated_uuid(input);
        let product = self
            .database
            .products()
            .insert(&record)
            .await
            .map_err(|err| match err {
                ProductError::MissingSeller => CatalogError::SellerNotFound,
                other => CatalogError::from(other),
            })?;

        info!(stage = "catalog", product_uuid = %product.uuid, seller_uuid = %product.seller_uuid, "product created");
        Ok(product)
    }

    /// Overwrites name, brand and stock, then notifies the seller when the
    /// stock level moved.
    ///
    /// The write is committed before any notifier runs. Notification failures
    /// are returned as [`CatalogError::Notification`] and carry the updated
    /// product; the stock change itself is kept.
    ///
    /// A notifier that exceeds its timeout is reported as failed but is not
    /// cancelled: its blocking task keeps running and may still hand its
    /// record to the sink after this call has returned.
    pub async fn update(
        &self,
        uuid: &str,
        changes: &ProductChanges,
    ) -> Result<UpdatedProduct, CatalogError> {
        let mut product = self.get(uuid).await?;
        let old_stock = product.stock;

        product.name = changes.name.clone();
        product.brand = changes.brand.clone();
        product.stock = changes.stock;

        if self.database.products().update(&product).await?.is_missing() {
            return Err(CatalogError::NotFound);
        }

        let Some(change) = StockChange::between(old_stock, product.stock) else {
            return Ok(UpdatedProduct {
                product,
                dispatch: None,
            });
        };

        let Some(seller) = self.find_seller(&product.seller_uuid).await? else {
            // product rows reference sellers through a foreign key
            error!(stage = "catalog", product_uuid = %product.uuid, seller_uuid = %product.seller_uuid, "seller vanished before stock notification");
            return Err(CatalogError::SellerVanished(Box::new(product)));
        };

        let notifiers = self.notifiers.create_notifiers(&product.name, &seller);
        let report = self.dispatch(notifiers, change).await;
        if report.has_failures() {
            return Err(CatalogError::Notification(Box::new(NotificationFailure {
                product,
                report,
            })));
        }

        Ok(UpdatedProduct {
            product,
            dispatch: Some(report),
        })
    }

    pub async fn delete(&self, uuid: &str) -> Result<(), CatalogError> {
        if self.database.products().delete(uuid).await?.is_missing() {
            return Err(CatalogError::NotFound);
        }
        info!(stage = "catalog", product_uuid = %uuid, "product deleted");
        Ok(())
    }

    pub async fn sellers(&self) -> Result<Vec<Seller>, CatalogError> {
        Ok(self.database.sellers().list().await?)
    }

    /// Sellers ranked by owned product count, most first.
    pub async fn top_sellers(&self, limit: u32) -> Result<Vec<Seller>, CatalogError> {
        Ok(self.database.sellers().top_by_product_count(limit).await?)
    }

    async fn find_seller(&self, uuid: &str) -> Result<Option<Seller>, CatalogError> {
        Ok(self.database.sellers().find_by_uuid(uuid).await?)
    }

    /// Starts every notifier at once, each bounded by its own timeout, and
    /// collects the outcomes in configured order. A failing or slow notifier
    /// does not hold back the others.
    async fn dispatch(&self, notifiers: Vec<Notifier>, change: StockChange) -> DispatchReport {
        let pending: Vec<_> = notifiers
            .into_iter()
            .map(|notifier| {
                let channel = notifier.channel();
                let task = tokio::spawn(invoke(
                    notifier,
                    change,
                    self.sink.clone(),
                    self.notifier_timeout,
                ));
                (channel, task)
            })
            .collect();

        let mut attempts = Vec::with_capacity(pending.len());
        for (channel, task) in pending {
            let outcome = task.await.unwrap_or_else(|join_err| {
                Err(NotificationError::Aborted {
                    channel,
                    reason: join_err.to_string(),
                })
            });
            attempts.push(DeliveryAttempt { channel, outcome });
        }
        DispatchReport { change, attempts }
    }
}

async fn invoke(
    notifier: Notifier,
    change: StockChange,
    sink: Arc<dyn DeliverySink>,
    timeout: Duration,
) -> Result<(), NotificationError> {
    let channel = notifier.channel();
    let start = Instant::now();
    let task = tokio::task::spawn_blocking(move || notifier.on_stock_changed(change, sink.as_ref()));

    let outcome = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => Err(NotificationError::Aborted {
            channel,
            reason: join_err.to_string(),
        }),
        Err(_) => Err(NotificationError::TimedOut {
            channel,
            timeout_ms: duration_millis(timeout),
        }),
    };

    let result_label = if outcome.is_ok() { "ok" } else { "error" };
    counter!("notifier_dispatch_total", "channel" => channel.as_str(), "result" => result_label)
        .increment(1);
    histogram!("notifier_dispatch_latency_seconds", "channel" => channel.as_str())
        .record(start.elapsed().as_secs_f64());
    if let Err(err) = &outcome {
        warn!(stage = "notifier", channel = channel.as_str(), error = %err, "stock notification failed");
    }
    outcome
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Product returned by an update, with the notification outcome when the
/// stock level changed.
#[derive(Debug)]
pub struct UpdatedProduct {
    pub product: Product,
    pub dispatch: Option<DispatchReport>,
}

/// One notifier invocation.
#[derive(Debug)]
pub struct DeliveryAttempt {
    pub channel: ChannelKind,
    pub outcome: Result<(), NotificationError>,
}

/// Outcome of notifying every enabled channel about one stock change.
#[derive(Debug)]
pub struct DispatchReport {
    pub change: StockChange,
    pub attempts: Vec<DeliveryAttempt>,
}

impl DispatchReport {
    pub fn has_failures(&self) -> bool {
        self.attempts.iter().any(|attempt| attempt.outcome.is_err())
    }

    pub fn failures(&self) -> impl Iterator<Item = &NotificationError> {
        self.attempts
            .iter()
            .filter_map(|attempt| attempt.outcome.as_ref().err())
    }

    pub fn first_failure(&self) -> Option<&NotificationError> {
        self.failures().next()
    }
}

/// Stock was updated but at least one channel failed to deliver.
#[derive(Debug)]
pub struct NotificationFailure {
    pub product: Product,
    pub report: DispatchReport,
}

impl NotificationFailure {
    /// Describes the first failed channel, which is what callers get to see.
    pub fn headline(&self) -> String {
        self.report
            .first_failure()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("product not found")]
    NotFound,
    #[error("seller not found")]
    SellerNotFound,
    #[error("product storage failed: {0}")]
    Product(#[from] ProductError),
    #[error("seller storage failed: {0}")]
    Seller(#[from] SellerError),
    #[error("stock updated but notification failed: {}", .0.headline())]
    Notification(Box<NotificationFailure>),
    #[error("product {} updated but its seller could not be found to notify", .0.uuid)]
    SellerVanished(Box<Product>),
}

impl CatalogError {
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Product(_) | Self::Seller(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::notifier::DeliveryRecord;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<DeliveryRecord>>,
    }

    impl RecordingSink {
        fn records(&self) -> Vec<DeliveryRecord> {
            self.records.lock().expect("records lock").clone()
        }
    }

    impl DeliverySink for RecordingSink {
        fn deliver(&self, record: DeliveryRecord) -> Result<(), NotificationError> {
            self.records.lock().expect("records lock").push(record);
            Ok(())
        }
    }

    struct FailingSink;

    impl DeliverySink for FailingSink {
        fn deliver(&self, record: DeliveryRecord) -> Result<(), NotificationError> {
            Err(NotificationError::Delivery {
                channel: record.channel,
                reason: "gateway down".into(),
            })
        }
    }

    #[derive(Default)]
    struct SlowSink {
        delivered: RecordingSink,
    }

    impl DeliverySink for SlowSink {
        fn deliver(&self, record: DeliveryRecord) -> Result<(), NotificationError> {
            std::thread::sleep(Duration::from_millis(300));
            self.delivered.deliver(record)
        }
    }

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        sqlx::query(
            "INSERT INTO seller (name, email, phone, uuid) VALUES \
             ('Seller One', 'one@example.com', '555-1111', 'S1'), \
             ('Seller Two', 'two@example.com', '555-2222', 'S2')",
        )
        .execute(db.pool())
        .await
        .expect("insert sellers");
        db
    }

    async fn catalog_with(channels: &[&str], sink: Arc<dyn DeliverySink>) -> ProductCatalog {
        ProductCatalog::new(
            setup_db().await,
            NotifierFactory::new(channels),
            sink,
            Duration::from_secs(2),
        )
    }

    fn widget(stock: u32) -> NewProduct {
        NewProduct {
            name: "Widget".into(),
            brand: "Acme".into(),
            stock,
            seller_uuid: "S1".into(),
        }
    }

    fn changes(stock: u32) -> ProductChanges {
        ProductChanges {
            name: "Widget".into(),
            brand: "Acme".into(),
            stock,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn created_product_can_be_read_back() {
        let catalog = catalog_with(&["sms"], Arc::new(RecordingSink::default())).await;
        let created = catalog.create(&widget(5)).await.expect("create");
        assert!(!created.uuid.is_empty());

        let fetched = catalog.get(&created.uuid).await.expect("get");
        assert_eq!(fetched, created);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_with_unknown_seller_persists_nothing() {
        let catalog = catalog_with(&["sms"], Arc::new(RecordingSink::default())).await;
        let mut input = widget(5);
        input.seller_uuid = "nobody".into();

        let err = catalog.create(&input).await.unwrap_err();
        assert!(matches!(err, CatalogError::SellerNotFound));
        assert!(catalog.list(0, 10).await.expect("list").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_distinguishes_missing_products() {
        let catalog = catalog_with(&[], Arc::new(RecordingSink::default())).await;
        let err = catalog.get("missing").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound));
        assert!(!err.is_storage());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stock_change_notifies_once_per_channel() {
        let sink = Arc::new(RecordingSink::default());
        let catalog = catalog_with(&["sms", "pager", "email"], sink.clone()).await;
        let created = catalog.create(&widget(5)).await.expect("create");

        let updated = catalog
            .update(&created.uuid, &changes(3))
            .await
            .expect("update");
        assert_eq!(updated.product.stock, 3);

        let report = updated.dispatch.expect("stock changed");
        let channels: Vec<_> = report.attempts.iter().map(|a| a.channel).collect();
        assert_eq!(channels, vec![ChannelKind::Sms, ChannelKind::Email]);
        assert_eq!(
            report.change,
            StockChange {
                old_stock: 5,
                new_stock: 3
            }
        );
        assert!(!report.has_failures());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].recipient, "555-1111");
        assert_eq!((records[0].old_stock, records[0].new_stock), (5, 3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unchanged_stock_skips_notification() {
        let sink = Arc::new(RecordingSink::default());
        let catalog = catalog_with(&["sms"], sink.clone()).await;
        let created = catalog.create(&widget(5)).await.expect("create");

        catalog
            .update(&created.uuid, &changes(3))
            .await
            .expect("first update");
        let second = catalog
            .update(&created.uuid, &changes(3))
            .await
            .expect("second update");

        assert!(second.dispatch.is_none());
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_is_a_full_overwrite() {
        let catalog = catalog_with(&[], Arc::new(RecordingSink::default())).await;
        let created = catalog.create(&widget(5)).await.expect("create");

        let replacement = ProductChanges {
            name: "Gadget".into(),
            brand: "Globex".into(),
            stock: 5,
        };
        let updated = catalog
            .update(&created.uuid, &replacement)
            .await
            .expect("update");
        assert_eq!(updated.product.name, "Gadget");
        assert_eq!(updated.product.brand, "Globex");
        assert_eq!(updated.product.seller_uuid, "S1");
        assert_eq!(catalog.get(&created.uuid).await.expect("get"), updated.product);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_of_missing_product_is_not_found() {
        let catalog = catalog_with(&["sms"], Arc::new(RecordingSink::default())).await;
        let err = catalog.update("missing", &changes(1)).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notification_failure_keeps_stock_change() {
        let catalog = catalog_with(&["sms", "email"], Arc::new(FailingSink)).await;
        let created = catalog.create(&widget(5)).await.expect("create");

        let err = catalog
            .update(&created.uuid, &changes(0))
            .await
            .unwrap_err();
        let CatalogError::Notification(failure) = err else {
            panic!("expected notification failure, got {err:?}");
        };
        assert_eq!(failure.product.stock, 0);
        assert_eq!(failure.report.attempts.len(), 2, "email still runs after sms fails");
        assert_eq!(failure.report.failures().count(), 1);
        assert_eq!(
            failure.report.first_failure().map(NotificationError::channel),
            Some(ChannelKind::Sms)
        );

        let stored = catalog.get(&created.uuid).await.expect("get");
        assert_eq!(stored.stock, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_notifier_times_out() {
        let catalog = ProductCatalog::new(
            setup_db().await,
            NotifierFactory::new(&["sms", "email"]),
            Arc::new(SlowSink::default()),
            Duration::from_millis(50),
        );
        let created = catalog.create(&widget(5)).await.expect("create");

        let err = catalog
            .update(&created.uuid, &changes(4))
            .await
            .unwrap_err();
        let CatalogError::Notification(failure) = err else {
            panic!("expected notification failure, got {err:?}");
        };
        assert!(matches!(
            failure.report.first_failure(),
            Some(NotificationError::TimedOut {
                channel: ChannelKind::Sms,
                timeout_ms: 50
            })
        ));
        assert!(failure.report.attempts[1].outcome.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_channels_time_out_concurrently() {
        let catalog = ProductCatalog::new(
            setup_db().await,
            NotifierFactory::new(&["sms", "sms", "sms"]),
            Arc::new(SlowSink::default()),
            Duration::from_millis(200),
        );
        let created = catalog.create(&widget(5)).await.expect("create");

        let start = Instant::now();
        let err = catalog
            .update(&created.uuid, &changes(2))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        let CatalogError::Notification(failure) = err else {
            panic!("expected notification failure, got {err:?}");
        };
        assert_eq!(failure.report.failures().count(), 3);
        assert!(
            elapsed < Duration::from_millis(450),
            "timeouts should overlap, update took {elapsed:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timed_out_delivery_can_still_land() {
        let sink = Arc::new(SlowSink::default());
        let catalog = ProductCatalog::new(
            setup_db().await,
            NotifierFactory::new(&["sms"]),
            sink.clone(),
            Duration::from_millis(50),
        );
        let created = catalog.create(&widget(5)).await.expect("create");

        let err = catalog
            .update(&created.uuid, &changes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Notification(_)));
        assert!(sink.delivered.records().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let records = sink.delivered.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].new_stock, 1);
    }

    #[test]
    fn duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(250)), 250);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_product_once() {
        let catalog = catalog_with(&[], Arc::new(RecordingSink::default())).await;
        let created = catalog.create(&widget(5)).await.expect("create");

        catalog.delete(&created.uuid).await.expect("delete");
        assert!(matches!(
            catalog.get(&created.uuid).await,
            Err(CatalogError::NotFound)
        ));
        assert!(matches!(
            catalog.delete(&created.uuid).await,
            Err(CatalogError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn top_sellers_are_ranked_and_limited() {
        let catalog = catalog_with(&[], Arc::new(RecordingSink::default())).await;
        catalog.create(&widget(1)).await.expect("create");
        for _ in 0..2 {
            let mut input = widget(1);
            input.seller_uuid = "S2".into();
            catalog.create(&input).await.expect("create");
        }

        let top = catalog
            .top_sellers(TOP_SELLERS_LIMIT)
            .await
            .expect("top sellers");
        let uuids: Vec<_> = top.iter().map(|s| s.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["S2", "S1"]);
        assert_eq!(catalog.top_sellers(1).await.expect("top 1").len(), 1);
        assert_eq!(catalog.sellers().await.expect("sellers").len(), 2);
    }
}
