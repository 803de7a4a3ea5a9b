//! 工具层：Tool trait、注册表、分发器（超时 + 重试 + 审计）与四个本地工具

pub mod authorization;
pub mod data;
pub mod executor;
pub mod lookup;
pub mod notify;
pub mod registry;
pub mod report;
pub mod schema;

pub use authorization::CheckAuthorizationTool;
pub use data::DataTables;
pub use executor::{ToolDispatcher, ToolOutcome};
pub use lookup::LookupDataTool;
pub use notify::NotifySendTool;
pub use registry::{Tool, ToolRegistry, ToolSpec};
pub use report::GenerateReportTool;
pub use schema::parameters_schema_of;

use crate::audit::PendingStore;

/// 注册全部本地工具：lookup_data / check_authorization / notify_send / generate_report
pub fn default_registry(tables: DataTables, pending: PendingStore) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(LookupDataTool::new(tables.clone()));
    registry.register(CheckAuthorizationTool::new(tables));
    registry.register(NotifySendTool::new(pending));
    registry.register(GenerateReportTool);
    registry
}
