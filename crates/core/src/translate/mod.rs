//! Translation backends and the batched translation pipeline.

mod backend;
mod batch;
mod openai;
mod retry;

pub use backend::{BatchContext, TranslationError, Translator};
pub use batch::{
    BatchOptions, BatchOutcome, BatchRetryMode, BatchTranslator, TranslateRunError,
};
pub use openai::{OpenAiCompatBackend, OpenAiCompatConfig};
pub use retry::{with_backoff, RetryError, RetryPolicy};
