//! Client identity and the interceptor that attaches it to every call.

use tower::{Layer, ServiceExt};

use tether_core::Metadata;
use tether_core::constants::{SELF_UID_HEADER, SELF_UIN_HEADER, SELF_VERSION_HEADER, version_string};
use tether_transport::tower_service::{CallService, InterceptLayer, Intercepted};
use tether_transport::{Call, CallRequest, Channel, Interceptor, TransportError};

use crate::error::BridgeError;

/// Who this bridge is, as announced to the remote controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Numeric account id.
    pub uin: u64,
    /// Opaque account uid.
    pub uid: String,
    /// Version of the bridge, sent as `tether-<version>`.
    pub version: String,
}

impl Identity {
    pub fn new(uin: u64, uid: impl Into<String>) -> Self {
        Self {
            uin,
            uid: uid.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Interceptor merging `self-uin`, `self-uid` and `self-version` into the
/// request headers of every outgoing call.
///
/// The headers are validated once at construction so interception cannot fail.
#[derive(Debug, Clone)]
pub struct IdentityHeaders {
    headers: Metadata,
}

impl IdentityHeaders {
    pub fn new(identity: &Identity) -> Result<Self, BridgeError> {
        let mut headers = Metadata::new();
        headers.insert(SELF_UIN_HEADER, identity.uin.to_string())?;
        headers.insert(SELF_UID_HEADER, identity.uid.as_str())?;
        headers.insert(SELF_VERSION_HEADER, version_string(&identity.version))?;
        Ok(Self { headers })
    }

    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    /// A call service over `channel` that attaches these headers.
    pub fn layer_over(&self, channel: Channel) -> IdentifiedCalls {
        InterceptLayer::new(self.clone()).layer(CallService::new(channel))
    }
}

/// Channel calls stacked behind the identity interceptor.
pub type IdentifiedCalls = Intercepted<CallService, IdentityHeaders>;

/// Open a `method` call through `calls`.
pub async fn open_call(calls: &IdentifiedCalls, method: &str) -> Result<Call, TransportError> {
    calls.clone().oneshot(CallRequest::new(method)).await
}

impl Interceptor for IdentityHeaders {
    fn intercept(&self, request: &mut CallRequest) {
        request.headers.merge(&self.headers);
    }
}
