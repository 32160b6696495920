//! 协作者层：Planner / Coder / Tester / Debugger / RepositoryExecutor 抽象与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::{MockCoder, MockDebugger, MockPlanner, MockRepositoryExecutor, MockTester};
pub use traits::{Coder, Debugger, Planner, RepositoryExecutor, TestOutcome, Tester};
