pub mod archive;
pub mod classifier;
pub mod counts;
pub mod fields;
pub mod lease;
pub mod pipeline;
pub mod recall;

pub use archive::{archive_tab_name, MonthlyArchive};
pub use classifier::{classify, ClassifierLists, Disposition};
pub use counts::{count_leads, LeadCounts};
pub use fields::{OutcomeBatch, OutcomeField, OutcomeRow, ARCHIVE_LAYOUT, RESULTS_LAYOUT};
pub use lease::{LeaseState, PollLease};
pub use pipeline::{IngestReport, IngestionPipeline, NOTHING_PENDING};
pub use recall::{compute_next_call_date, RecallDays, RecallSweeper, SweepReport};
