pub mod decision;
pub mod fingerprint;
pub mod matcher;
pub mod risk;
pub mod workflow;

pub use decision::{fallback_decision, DecisionEngine};
pub use matcher::MatchingEngine;
pub use risk::{RiskContext, RiskEngine};
pub use workflow::{Clock, Collaborators, FixedClock, SystemClock, WorkflowOrchestrator};
