//! MongoDB 会话委托

use ::mongodb::ClusterTime;
use ::mongodb::sync::ClientSession;
use bson::{Document, Timestamp};

use super::MongoDriver;
use super::convert::{decode_error, provider_error, transaction_options};
use crate::driver::SessionDelegate;
use crate::error::{DriverResult, ProviderError};
use crate::types::TransactionOptions;

/// MongoDB 会话
///
/// 同步驱动不公开事务状态，这里在本地跟踪：提交尝试之后（无论成败）即视为不在事务中，
/// 与驱动允许在提交之后重试提交的行为一致。
pub struct MongoSession {
    session: Option<ClientSession>,
    id: Document,
    in_transaction: bool,
}

impl MongoSession {
    pub(crate) fn new(session: ClientSession) -> Self {
        let id = session.id().clone();
        Self {
            session: Some(session),
            id,
            in_transaction: false,
        }
    }

    pub(crate) fn client_session_mut(&mut self) -> Option<&mut ClientSession> {
        self.session.as_mut()
    }

    /// 取出驱动会话，会话已结束时报错
    pub(crate) fn usable(&mut self) -> DriverResult<&mut ClientSession> {
        self.session
            .as_mut()
            .ok_or_else(|| ProviderError::new("Cannot use ended session"))
    }
}

impl SessionDelegate<MongoDriver> for MongoSession {
    fn id(&self) -> Document {
        self.id.clone()
    }

    fn start_transaction(&mut self, options: &TransactionOptions) -> DriverResult<()> {
        let options = transaction_options(options);
        self.usable()?.start_transaction(options).map_err(provider_error)?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit_transaction(&mut self) -> DriverResult<()> {
        let result = self.usable()?.commit_transaction().map_err(provider_error);
        self.in_transaction = false;
        result
    }

    fn abort_transaction(&mut self) -> DriverResult<()> {
        let result = self.usable()?.abort_transaction().map_err(provider_error);
        self.in_transaction = false;
        result
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn end_session(&mut self) -> DriverResult<()> {
        if self.session.is_none() {
            return Ok(());
        }
        if self.in_transaction {
            self.abort_transaction()?;
        }
        // 驱动会话在 drop 时归还会话池
        self.session = None;
        Ok(())
    }

    fn has_ended(&self) -> bool {
        self.session.is_none()
    }

    fn cluster_time(&self) -> Option<Document> {
        let cluster_time = self.session.as_ref()?.cluster_time()?;
        bson::to_document(cluster_time).ok()
    }

    fn operation_time(&self) -> Option<Timestamp> {
        self.session.as_ref()?.operation_time()
    }

    fn advance_cluster_time(&mut self, cluster_time: &Document) -> DriverResult<()> {
        let cluster_time: ClusterTime = bson::from_document(cluster_time.clone()).map_err(decode_error)?;
        self.usable()?.advance_cluster_time(&cluster_time);
        Ok(())
    }

    fn advance_operation_time(&mut self, operation_time: Timestamp) -> DriverResult<()> {
        self.usable()?.advance_operation_time(operation_time);
        Ok(())
    }
}
