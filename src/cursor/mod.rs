//! 游标模型
//!
//! 查询游标、命令游标与延迟命令游标共用 [`core`] 中的惰性序列实现。

mod command;
mod core;
mod query;

pub use command::CommandCursor;
pub use query::Cursor;

pub(crate) use self::core::{AggregateTarget, PendingCommand};
