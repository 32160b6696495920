//! 核心编排层：状态机、错误、任务注册表、进度扇出、反馈路由与检查点、编排器、关闭处理

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod router;
pub mod shutdown;
pub mod state;

pub use builder::AgentCoreBuilder;
pub use checkpoint::{CheckpointOutcome, ReplanRequest};
pub use error::{CollaboratorError, CoreError};
pub use orchestrator::AgentCore;
pub use progress::{ListenerId, ProgressHub, ProgressListener};
pub use registry::{TaskHandle, TaskRegistry};
pub use router::{FeedbackRequest, FeedbackRouter};
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason, TaskCleanup};
pub use state::TaskStatus;
