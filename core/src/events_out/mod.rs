mod record;
mod writer;

pub use crate::config::EventsOutConfig;
pub use record::{write_audit_record, AuditRecord};
pub use writer::{start_events_out, EventsOutTx};
