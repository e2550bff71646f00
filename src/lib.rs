pub mod classifier;
pub mod codec;
pub mod config;
pub mod context;
pub mod dataset;
pub mod dynamic;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expression;
pub mod extensions;
pub mod mapper;
pub mod provider;
pub mod source;
pub mod translator;
pub mod types;
pub mod value;

pub use context::ExecutionContext;
pub use error::{QueryError, QueryResult};
pub use executor::{execute_with_context, execute_with_factory, ExpressionExecutor, QueryOutcome};
