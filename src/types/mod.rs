//! 操作选项与结果类型
//!
//! 与具体驱动无关的选项/结果定义。每个驱动后端负责把它们翻译成自己的类型。

pub mod options;
pub mod results;

// 重新导出所有公共类型
pub use options::{
    AggregateOptions, ChangeStreamOptions, Collation, ConcernOptions, CursorType, FindOneAndReplaceOptions,
    FindOneAndUpdateOptions, FindOptions, FullDocument, Hint, IndexModel, IndexOptions, ReadConcernLevel,
    ReadPreference, ReturnDocument, SessionOptions, TransactionOptions, UpdateOptions, WriteConcernLevel,
};
pub use results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};

pub use bson::{Bson, Document, Timestamp, doc};
