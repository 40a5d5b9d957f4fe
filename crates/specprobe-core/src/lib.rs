//! specprobe-core: contract model, sampling and validation for API probing
//!
//! This crate holds everything that does not touch the network: the schema
//! grammar, the operation/plan/outcome data model, the sampler that turns
//! schemas into representative values, the response validator, outcome
//! aggregation, and the run policy.

pub mod auth;
pub mod contract;
pub mod model;
pub mod policy;
pub mod report;
pub mod sampler;
pub mod schema;
pub mod summary;
pub mod validate;

pub use auth::{Auth, PlanDecorator};
pub use contract::{Contract, ContractError, DocumentFormat};
pub use model::{
    Attempt, AttemptOutcome, ExecutionPlan, FinalStatus, OperationDescriptor, ParamSpec, PlanLabel,
    RequestBodySpec, ResponseData, ResponseSpec, TestOutcome, TransportError, TransportErrorKind,
    ValidationReport,
};
pub use policy::{ConfigError, RunPolicy};
pub use report::{RunReport, generate_schema};
pub use sampler::{SamplerConfig, SchemaSampler};
pub use schema::{Schema, SchemaKind, SchemaRegistry};
pub use summary::{OutcomeVerdict, Summary, aggregate};
pub use validate::ResponseValidator;
