//! Client-side call interceptors.

use tether_core::Metadata;

/// An outgoing call before it is opened: the method and its request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub method: String,
    pub headers: Metadata,
}

impl CallRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            headers: Metadata::new(),
        }
    }

    pub fn with_headers(method: impl Into<String>, headers: Metadata) -> Self {
        Self {
            method: method.into(),
            headers,
        }
    }
}

/// Hook run on every outgoing call of a channel before the call is opened.
///
/// Interceptors see only the request side; responses are never touched.
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, request: &mut CallRequest);
}

impl<F> Interceptor for F
where
    F: Fn(&mut CallRequest) + Send + Sync + 'static,
{
    fn intercept(&self, request: &mut CallRequest) {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_interceptor_sees_request() {
        let tag = |req: &mut CallRequest| {
            let _ = req.headers.insert("x-method-len", req.method.len().to_string());
        };
        let mut request = CallRequest::new("svc/Method");
        tag.intercept(&mut request);
        assert_eq!(request.headers.get("x-method-len"), Some("10"));
    }
}
