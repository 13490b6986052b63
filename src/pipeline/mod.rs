//! Request pipeline: classification, header transforms, CORS policy,
//! content transformation and the dispatcher that ties them together.

pub mod context;
pub mod dispatcher;
pub mod headers;
pub mod same_origin;
pub mod service;
pub mod transform;

pub use context::{ContentInfo, ContentKind, RequestPipelineContext};
pub use same_origin::CorsOutcome;
pub use transform::{
    ContentTransformer, HeadInjectionTransformer, TransformContext, TransformError,
    TASK_SCRIPT_PATH,
};
