// 生命周期管理
// 关闭信号在所有后台任务和重试等待之间共享

pub mod shutdown;

pub use shutdown::{Shutdown, ShutdownSignal};
