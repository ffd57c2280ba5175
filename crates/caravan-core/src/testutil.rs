//! Shared test doubles for the core crate's unit tests.

use crate::client::{InstanceClient, Method};
use crate::error::ClientError;
use serde_json::Value;

/// Client that answers every request with `null`.
pub struct NullClient;

impl InstanceClient for NullClient {
    fn request(
        &self,
        _method: Method,
        _path: &str,
        _body: Option<&Value>,
    ) -> std::result::Result<Value, ClientError> {
        Ok(Value::Null)
    }
}
