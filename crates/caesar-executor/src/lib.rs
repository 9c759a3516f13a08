//! Pre-flight order validation and the execution façade.

pub mod error;
pub mod facade;
pub mod validator;

pub use error::{ExecError, ExecResult};
pub use facade::{
    EngineConfig, ExecutionEngine, HedgeReport, LegStatus, OrderSigner, PlacedOrder,
    RollbackReport, TunnelSink,
};
pub use validator::{default_constraints, OrderValidator, VenueConstraints, SLIPPAGE_CAP_BPS};
