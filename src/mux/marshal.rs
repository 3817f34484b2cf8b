//! Message serialization used when rendering responses.

use serde_json::Value;

use crate::error::BoxError;

/// Serializes messages and names their content type.
pub trait Marshaler: Send + Sync {
    fn content_type(&self) -> &str;

    fn marshal(&self, message: &Value) -> Result<Vec<u8>, BoxError>;
}

/// JSON marshaler, the mux default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn marshal(&self, message: &Value) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(message)?)
    }
}
