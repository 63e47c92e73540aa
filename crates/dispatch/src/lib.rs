pub mod cooldown;
pub mod endpoint;
pub mod engine;
pub mod ledger;
pub mod leads;
pub mod locks;
pub mod selector;
pub mod sent_index;
pub mod session;
pub mod trigger;

pub use cooldown::{CooldownKind, CooldownStatus, Cooldowns};
pub use endpoint::{BatchRequest, DispatchEndpoint, HttpDispatchEndpoint, UnconfiguredEndpoint};
pub use engine::{
    DispatchEngine, DispatchEvent, EngineParts, RunAccepted, RunSummary, SendRunRequest, TickOutcome,
    RUN_LIMIT_FLOOR, RUN_LIMIT_KEY,
};
pub use ledger::CreditLedger;
pub use leads::{LeadColumns, LeadSheet, LeadTable};
pub use locks::ProcessLocks;
pub use selector::{RunSelector, Selection};
pub use sent_index::SentIndex;
pub use session::{PendingAck, RunSession, SessionStatus, SessionStore};
pub use trigger::TickTrigger;
