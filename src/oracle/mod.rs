// Oracle request pipeline - requests are recorded pending and resolved by the
// dispatcher engine against an external oracle runner.
pub mod dispatch;
pub mod models;
pub mod service;

pub use dispatch::{DispatchEngine, OracleDispatch};
pub use models::{CreateOracleRequest, OracleRequest, OracleStatus};
pub use service::OracleService;
