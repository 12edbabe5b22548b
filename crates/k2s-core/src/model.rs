//! Entity model synchronized between the log and the store.
//!
//! Entities are immutable values: identity plus value fields, compared
//! structurally. A changed entity is a new value with the same identity.

use crate::error::DecodeError;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

/// A record that can be carried on the log and stored in the remote store.
pub trait Entity: Serialize + DeserializeOwned + PartialEq + Clone + Debug + Send + Sync {
    /// Identity type. Immutable once the entity has been created.
    type Id: Display + PartialEq + Send + Sync;

    /// Identity of this entity.
    fn id(&self) -> Self::Id;
}

/// A shop product.
///
/// JSON shape: `{"id": <int>, "name": <string>, "price": <number>, "imgUrl": <string>}`.
/// Any other field makes the document undecodable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub img_url: String,
}

impl Product {
    /// Create a product.
    pub fn new(id: i64, name: impl Into<String>, price: f64, img_url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            img_url: img_url.into(),
        }
    }

    /// Same product with a different price.
    pub fn with_price(&self, price: f64) -> Self {
        Self {
            price,
            ..self.clone()
        }
    }
}

// Prices compare by total order so NaN matches NaN and the comparison is reflexive.
impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.price.total_cmp(&other.price).is_eq()
            && self.name == other.name
            && self.img_url == other.img_url
    }
}

impl Eq for Product {}

impl Entity for Product {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }
}

impl Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Product(id={}, name={:?}, price={}, imgUrl={:?})",
            self.id, self.name, self.price, self.img_url
        )
    }
}

/// Decode a log payload into an entity.
///
/// Missing fields and wrong field types are reported as
/// [`DecodeError::MalformedPayload`]; unknown extra fields are ignored.
pub fn decode_payload<E: Entity>(payload: Option<&[u8]>) -> std::result::Result<E, DecodeError> {
    let bytes = payload.ok_or(DecodeError::EmptyPayload)?;
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
    serde_json::from_str(text).map_err(|e| DecodeError::MalformedPayload(e.to_string()))
}

/// Encode an entity as a JSON log payload.
pub fn encode_payload<E: Entity>(entity: &E) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(entity)?)
}
