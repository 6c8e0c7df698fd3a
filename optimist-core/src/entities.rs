//! Core entity structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker trait for records that can live in a cached collection.
///
/// A record without a server-assigned identifier is *tentative*: it stands
/// for a write the server has not confirmed yet and can only be told apart
/// from its neighbours by position.
///
/// # Implementation Requirements
///
/// - `server_id()` must return `None` until the server has assigned an id
/// - Implementations must be `Clone + Send + Sync + 'static` so collections can
///   be shared across the settlement task and readers
pub trait CachedItem: Clone + fmt::Debug + Send + Sync + 'static {
    /// Server-assigned identifier, if any.
    fn server_id(&self) -> Option<ProductId>;

    /// Returns true when the server has not yet confirmed this record.
    fn is_tentative(&self) -> bool {
        self.server_id().is_none()
    }
}

/// Server-assigned product identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProductId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Product record as served by the REST collection.
///
/// Payload fields are opaque strings; the cache never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProductId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
}

impl Product {
    /// Create a tentative product carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<ProductId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_price(mut self, price: impl Into<String>) -> Self {
        self.price = price.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }
}

impl CachedItem for Product {
    fn server_id(&self) -> Option<ProductId> {
        self.id
    }
}
