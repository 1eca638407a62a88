use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::Product;

/// API version requested by the caller, resolved by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

/// Flat product shape served by v1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductV1 {
    pub uuid: String,
    pub name: String,
    pub brand: String,
    pub stock: u32,
    pub seller_uuid: String,
}

/// Product shape served by v2, with the seller nested and linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductV2 {
    pub uuid: String,
    pub name: String,
    pub brand: String,
    pub stock: u32,
    pub seller: SellerRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellerRef {
    pub uuid: String,
    #[serde(rename = "_links")]
    pub links: BTreeMap<String, Link>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub href: String,
}

/// Either external product shape; serializes as the inner shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProductView {
    V1(ProductV1),
    V2(ProductV2),
}

/// Renders products in the shape matching the requested API version.
#[derive(Debug, Clone)]
pub struct Presenter {
    base_url: String,
}

impl Presenter {
    /// `base_url` prefixes seller links; a trailing `/` is ignored.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn seller_href(&self, seller_uuid: &str) -> String {
        format!("{}/sellers/{}", self.base_url, seller_uuid)
    }

    pub fn present(&self, product: &Product, version: ApiVersion) -> ProductView {
        match version {
            ApiVersion::V1 => ProductView::V1(ProductV1 {
                uuid: product.uuid.clone(),
                name: product.name.clone(),
                brand: product.brand.clone(),
                stock: product.stock,
                seller_uuid: product.seller_uuid.clone(),
            }),
            ApiVersion::V2 => {
                let mut links = BTreeMap::new();
                links.insert(
                    "self".to_string(),
                    Link {
                        href: self.seller_href(&product.seller_uuid),
                    },
                );
                ProductView::V2(ProductV2 {
                    uuid: product.uuid.clone(),
                    name: product.name.clone(),
                    brand: product.brand.clone(),
                    stock: product.stock,
                    seller: SellerRef {
                        uuid: product.seller_uuid.clone(),
                        links,
                    },
                })
            }
        }
    }

    pub fn present_all(&self, products: &[Product], version: ApiVersion) -> Vec<ProductView> {
        products
            .iter()
            .map(|product| self.present(product, version))
            .collect()
    }
}
