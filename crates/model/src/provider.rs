use std::error::Error;
use std::sync::Arc;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Returns whether sending the same request again may succeed.
    #[inline]
    fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// A type that represents a model provider, which is an entry for sampling
/// requests from a language model.
///
/// A provider is stateless from the caller's point of view: every request
/// carries the whole conversation, and nothing learned from one request
/// may leak into the next. Configuration such as the endpoint, the
/// credentials and the model name is passed when constructing it.
///
/// Providers can be shared behind an [`Arc`], which implements this trait
/// as well.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Sends a request to the model.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}

impl<P: ModelProvider> ModelProvider for Arc<P> {
    type Error = P::Error;
    type Response = P::Response;

    #[inline]
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        (**self).send_request(req)
    }
}
