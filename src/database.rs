use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::core::{IdbError, Result, TransactionMode};
use crate::host::HostEngine;
use crate::transaction::Transaction;

/// Entry point: a host database plus the settings every derived handle shares.
#[derive(Clone)]
pub struct Database {
    engine: Arc<dyn HostEngine>,
    config: Arc<BridgeConfig>,
}

impl Database {
    pub fn new(engine: Arc<dyn HostEngine>) -> Self {
        Self::with_config(engine, BridgeConfig::default())
    }

    pub fn with_config(engine: Arc<dyn HostEngine>, config: BridgeConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.engine.object_store_names()
    }

    /// Opens a transaction over one or more object stores.
    pub fn transaction<S: AsRef<str>>(
        &self,
        mode: TransactionMode,
        store_names: &[S],
    ) -> Result<Transaction> {
        if store_names.is_empty() {
            return Err(IdbError::Config(
                "transaction must have at least one object store".into(),
            ));
        }
        let names: Vec<String> = store_names
            .iter()
            .map(|name| name.as_ref().to_string())
            .collect();
        let host = self
            .engine
            .transaction(mode, &names)
            .map_err(|err| self.config.classify(err))?;
        Ok(Transaction::from_host(host, self.config.clone()))
    }
}
