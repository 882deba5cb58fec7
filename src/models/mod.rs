pub mod invoice;
pub mod order;
pub mod result;
pub mod state;
pub mod vendor;

pub use invoice::{ExtractedInvoice, ExtractionData, ExtractionRecord, LineItem};
pub use order::{OrderStatus, PurchaseOrder};
pub use result::{
    Decision, DecisionKind, Discrepancy, DiscrepancyKind, DiscrepancySeverity, DuplicateTier,
    DuplicateVerdict, FlagSeverity, MatchResult, MatchTier, RiskAssessment, RiskComponents,
    RiskFlag, RiskFlagType, RiskLevel,
};
pub use state::{
    AlreadyRecorded, ErrorRecord, RunMetadata, StageOutcome, StatusSummary, WorkflowState,
    WorkflowStatus,
};
pub use vendor::{HistoricalInvoice, RecentInvoiceIndex, VendorProfile};
