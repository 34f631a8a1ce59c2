use super::{TxId, TxStatus};
use crate::{
    chain::ChainAdapter,
    storage::{RelayStorage, StorageApi},
    types::Payer,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Work item handed off to the asynchronous executor.
///
/// Hand-off is at-least-once: the `Pending` record is durable before the
/// item is enqueued, so a lost item can be re-derived from the ledger.
#[derive(Clone, Copy, Debug)]
pub struct WorkItem {
    /// The ledger record to execute.
    pub tx_id: TxId,
    /// The ledger row the record was debited from.
    pub payer: Payer,
}

/// Messages accepted by the [`ExecutionService`].
#[derive(Debug)]
enum ExecutionServiceMessage {
    /// Message to execute a relayed call.
    Execute(WorkItem),
}

/// Handle to communicate with the [`ExecutionService`].
#[derive(Debug, Clone)]
pub struct ExecutionServiceHandle {
    command_tx: mpsc::UnboundedSender<ExecutionServiceMessage>,
}

impl ExecutionServiceHandle {
    /// Enqueues a work item for execution.
    pub fn enqueue(&self, item: WorkItem) {
        if self.command_tx.send(ExecutionServiceMessage::Execute(item)).is_err() {
            // The service is gone; the Pending record stays in the ledger for
            // recovery on restart.
            warn!(tx_id = %item.tx_id, "execution service unavailable, work item dropped");
        }
    }
}

/// Service that broadcasts relayed calls and settles their ledger records.
///
/// The relay core only guarantees the hand-off; broadcast retry policy lives
/// behind the chain adapter.
#[derive(Debug)]
pub struct ExecutionService {
    storage: RelayStorage,
    adapter: Arc<dyn ChainAdapter>,
    command_rx: mpsc::UnboundedReceiver<ExecutionServiceMessage>,
}

impl ExecutionService {
    /// Creates a new [`ExecutionService`].
    pub fn new(
        storage: RelayStorage,
        adapter: Arc<dyn ChainAdapter>,
    ) -> (Self, ExecutionServiceHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (Self { storage, adapter, command_rx }, ExecutionServiceHandle { command_tx })
    }

    /// Creates a new [`ExecutionService`] and spawns it.
    pub fn spawn(storage: RelayStorage, adapter: Arc<dyn ChainAdapter>) -> ExecutionServiceHandle {
        let (this, handle) = Self::new(storage, adapter);
        tokio::spawn(this.run());
        handle
    }

    /// Drains work items until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(ExecutionServiceMessage::Execute(item)) = self.command_rx.recv().await {
            let storage = self.storage.clone();
            let adapter = self.adapter.clone();
            tokio::spawn(async move {
                settle(storage, adapter, item).await;
            });
        }
    }
}

/// Broadcasts one relayed call and records the terminal outcome.
async fn settle(storage: RelayStorage, adapter: Arc<dyn ChainAdapter>, item: WorkItem) {
    let record = match storage.read_transaction(item.tx_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            error!(tx_id = %item.tx_id, "work item references unknown transaction");
            return;
        }
        Err(err) => {
            error!(tx_id = %item.tx_id, %err, "failed to load transaction for execution");
            return;
        }
    };

    let status = match adapter.broadcast(&record).await {
        Ok(settlement) => {
            info!(
                tx_id = %item.tx_id,
                tx_hash = %settlement.tx_hash,
                gas_used = settlement.gas_used,
                "relayed call settled"
            );
            TxStatus::Confirmed { gas_used: settlement.gas_used }
        }
        Err(err) => {
            warn!(tx_id = %item.tx_id, %err, "relayed call failed to settle");
            TxStatus::Failed { reason: "broadcast failed".to_string() }
        }
    };

    if let Err(err) = storage.update_transaction_status(item.tx_id, status).await {
        error!(tx_id = %item.tx_id, %err, "failed to persist settlement status");
    }
}
