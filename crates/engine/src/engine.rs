use std::sync::Arc;

use payflow_infra::{EngineConfig, PaymentStore};

use crate::approval::ApprovalEngine;
use crate::context::{Collaborators, Env, Shared};
use crate::ledger::LedgerAggregator;
use crate::offset::OffsetEngine;
use crate::workflow::DocumentWorkflow;

/// The four services over one store and one set of collaborators.
pub struct PaymentEngine<S> {
    pub workflow: DocumentWorkflow<S>,
    pub approvals: ApprovalEngine<S>,
    pub offsets: OffsetEngine<S>,
    pub ledger: LedgerAggregator<S>,
}

impl<S: PaymentStore> PaymentEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig, collaborators: Collaborators) -> Self {
        let shared = Arc::new(Shared {
            store,
            env: Env::new(config, collaborators),
        });
        Self {
            workflow: DocumentWorkflow::new(shared.clone()),
            approvals: ApprovalEngine::new(shared.clone()),
            offsets: OffsetEngine::new(shared.clone()),
            ledger: LedgerAggregator::new(shared),
        }
    }
}
