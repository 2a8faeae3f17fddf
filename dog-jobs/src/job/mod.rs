pub mod registry;

pub use registry::{FnHandler, JobHandler, JobRegistry, TypedHandler};

use crate::JobError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A job whose payload is a typed value
///
/// The payload is stored as JSON. The handler registered for [`Self::NAME`]
/// decodes it back into `Self` and calls [`perform`](Self::perform) with a
/// clone of the context given at registration.
#[async_trait]
pub trait BackgroundJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Shared state handed to every run
    type Context: Send + Sync + Clone + 'static;

    /// Job name used for dispatch
    const NAME: &'static str;

    async fn perform(self, ctx: Self::Context) -> Result<(), JobError>;
}
