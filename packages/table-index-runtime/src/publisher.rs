//! Writer-side facade: change the truth store, then announce the change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use table_index_core::message::{ChangeMessage, ChangeType};
use table_index_core::model::{ColumnId, ColumnModel, ResetToken, TableId, TableRowChange};
use table_index_core::status::TableStatusRegister;
use table_index_core::truth::{InMemoryTruthStore, RowUpdate};

use crate::queue::MessageQueue;
use crate::Result;

/// Publishes table changes.
///
/// Every change resets the table status, which issues the reset token the
/// published message carries. Messages published before the reset become
/// stale and are dropped by the workers.
pub struct TableChangePublisher {
    truth: Arc<InMemoryTruthStore>,
    status: Arc<dyn TableStatusRegister>,
    queue: Arc<dyn MessageQueue>,
    change_number: AtomicU64,
}

impl TableChangePublisher {
    pub fn new(
        truth: Arc<InMemoryTruthStore>,
        status: Arc<dyn TableStatusRegister>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self {
            truth,
            status,
            queue,
            change_number: AtomicU64::new(0),
        }
    }

    /// Creates the table or replaces its schema.
    pub fn set_schema(&self, table_id: &TableId, schema: Vec<ColumnModel>) -> Result<ResetToken> {
        let change_type = match self.status.get(table_id)? {
            Some(_) => ChangeType::Update,
            None => ChangeType::Create,
        };
        self.truth.set_schema(table_id, schema)?;
        self.announce(table_id, change_type)
    }

    /// Appends rows to the table.
    pub fn append_rows(
        &self,
        table_id: &TableId,
        headers: Vec<ColumnId>,
        updates: Vec<RowUpdate>,
    ) -> Result<TableRowChange> {
        let change = self.truth.append_row_set(table_id, headers, updates)?;
        self.announce(table_id, ChangeType::Update)?;
        Ok(change)
    }

    /// Requests a replay without changing the truth store.
    pub fn touch(&self, table_id: &TableId) -> Result<ResetToken> {
        self.announce(table_id, ChangeType::Update)
    }

    /// Deletes the table and announces the deletion.
    pub fn delete_table(&self, table_id: &TableId) -> Result<()> {
        self.truth.delete_table(table_id)?;
        let token = self
            .status
            .get(table_id)?
            .map(|status| status.reset_token)
            .unwrap_or_else(ResetToken::generate);
        self.publish(table_id, ChangeType::Delete, token)
    }

    fn announce(&self, table_id: &TableId, change_type: ChangeType) -> Result<ResetToken> {
        let token = self.status.reset_to_processing(table_id)?;
        self.publish(table_id, change_type, token.clone())?;
        Ok(token)
    }

    fn publish(&self, table_id: &TableId, change_type: ChangeType, token: ResetToken) -> Result<()> {
        let change_number = self.change_number.fetch_add(1, Ordering::SeqCst);
        let message = ChangeMessage::table(table_id.clone(), change_type, token, change_number);
        let message_id = self.queue.send(message.to_body()?)?;
        tracing::debug!(
            table = %table_id,
            change = ?change_type,
            change_number,
            message_id = %message_id,
            "Published table change"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use table_index_core::model::ColumnType;
    use table_index_core::status::{InMemoryStatusRegister, TableState};

    use crate::queue::InMemoryMessageQueue;

    fn create_publisher() -> (TableChangePublisher, Arc<InMemoryStatusRegister>, Arc<InMemoryMessageQueue>) {
        let status = Arc::new(InMemoryStatusRegister::new());
        let queue = Arc::new(InMemoryMessageQueue::new());
        let publisher = TableChangePublisher::new(
            Arc::new(InMemoryTruthStore::new()),
            status.clone(),
            queue.clone(),
        );
        (publisher, status, queue)
    }

    fn received(queue: &InMemoryMessageQueue) -> Vec<ChangeMessage> {
        queue
            .receive(100, Duration::from_secs(30))
            .unwrap()
            .iter()
            .map(|m| ChangeMessage::from_body(&m.body).unwrap())
            .collect()
    }

    #[test]
    fn test_each_change_issues_a_new_token() {
        let (publisher, status, queue) = create_publisher();
        let table_id = TableId::new("syn3");

        let first = publisher
            .set_schema(&table_id, vec![ColumnModel::new(1, "a", ColumnType::String)])
            .unwrap();
        publisher
            .append_rows(&table_id, vec![1], vec![RowUpdate::insert(vec![Some("x".into())])])
            .unwrap();

        let current = status.get(&table_id).unwrap().unwrap();
        assert_ne!(current.reset_token, first);
        assert_eq!(current.state, TableState::Processing);

        let messages = received(&queue);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].change_type, ChangeType::Create);
        assert_eq!(messages[0].object_etag, first);
        assert_eq!(messages[1].change_type, ChangeType::Update);
        assert_eq!(messages[1].object_etag, current.reset_token);
        assert!(messages[1].change_number > messages[0].change_number);
    }

    #[test]
    fn test_delete_publishes_delete_message() {
        let (publisher, _status, queue) = create_publisher();
        let table_id = TableId::new("syn4");
        publisher
            .set_schema(&table_id, vec![ColumnModel::new(1, "a", ColumnType::String)])
            .unwrap();

        publisher.delete_table(&table_id).unwrap();

        let messages = received(&queue);
        assert_eq!(messages.last().unwrap().change_type, ChangeType::Delete);
    }

    #[test]
    fn test_rejected_rows_publish_nothing() {
        let (publisher, _status, queue) = create_publisher();
        let result = publisher.append_rows(&TableId::new("missing"), vec![], vec![]);
        assert!(result.is_err());
        assert!(queue.is_empty().unwrap());
    }
}
