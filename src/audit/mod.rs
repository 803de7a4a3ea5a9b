//! 审计层：只追加账本、审计记录、待人工处理动作队列

pub mod ledger;
pub mod lock;
pub mod pending;
pub mod record;

pub use ledger::{AuditLedger, LedgerError};
pub use pending::{PendingAction, PendingError, PendingStatus, PendingStore};
pub use record::{extract_mutation_id, AuditRecord};
