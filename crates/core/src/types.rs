use serde::{Deserialize, Serialize};

/// Product owned by exactly one seller.
///
/// `id` is the storage key and is never serialized; products are addressed
/// externally by `uuid` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    #[serde(skip)]
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub brand: String,
    pub stock: u32,
    pub seller_uuid: String,
}

/// Seller record. Read-only from the catalog's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Seller {
    #[serde(skip)]
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Fields supplied when creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub brand: String,
    pub stock: u32,
    #[serde(rename = "seller")]
    pub seller_uuid: String,
}

/// Full replacement of the mutable product fields.
///
/// Every field is required; omitted values are not carried over from the
/// stored product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductChanges {
    pub name: String,
    pub brand: String,
    pub stock: u32,
}

/// Stock transition observed by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockChange {
    pub old_stock: u32,
    pub new_stock: u32,
}

impl StockChange {
    /// Returns the transition between two stock levels, or `None` when they are equal.
    pub fn between(old_stock: u32, new_stock: u32) -> Option<Self> {
        (old_stock != new_stock).then_some(Self {
            old_stock,
            new_stock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn product_serialization_hides_internal_key() {
        let product = Product {
            id: 42,
            uuid: "p-1".into(),
            name: "Widget".into(),
            brand: "Acme".into(),
            stock: 5,
            seller_uuid: "s-1".into(),
        };

        let value = serde_json::to_value(&product).expect("serialize");
        assert_eq!(
            value,
            json!({
                "uuid": "p-1",
                "name": "Widget",
                "brand": "Acme",
                "stock": 5,
                "seller_uuid": "s-1",
            })
        );
    }

    #[test]
    fn new_product_reads_seller_field() {
        let payload = json!({"name": "Widget", "brand": "Acme", "stock": 5, "seller": "s-1"});
        let new_product: NewProduct = serde_json::from_value(payload).expect("deserialize");
        assert_eq!(new_product.seller_uuid, "s-1");
    }

    #[test]
    fn negative_stock_is_rejected() {
        let payload = json!({"name": "Widget", "brand": "Acme", "stock": -1});
        assert!(serde_json::from_value::<ProductChanges>(payload).is_err());
    }

    #[test]
    fn stock_change_only_exists_for_different_levels() {
        assert_eq!(StockChange::between(3, 3), None);
        assert_eq!(
            StockChange::between(5, 3),
            Some(StockChange {
                old_stock: 5,
                new_stock: 3
            })
        );
    }
}
