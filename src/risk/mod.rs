pub mod live_safety_gates;
pub mod portfolio;
pub mod sizer;
pub mod strategic_gate;

pub use live_safety_gates::{LiveSafetyGates, SafetyCheckResult};
pub use portfolio::{PortfolioRiskManager, PortfolioRiskMetrics, PortfolioRiskResult};
pub use sizer::{RiskSizer, SizingOutcome};
pub use strategic_gate::{GateVerdict, StrategicGate};
