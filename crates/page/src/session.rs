//! One live page: its blocks, expression slots, and push channel.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use livemark_block::{ActionDecl, BlockState, Payload};
use livemark_core::{Row, RuntimeConfig, SourceRegistry};
use livemark_expr::{evaluate_expressions, Expression};
use tokio::sync::broadcast;
use tracing::debug;

use crate::envelope::{ActionEnvelope, PushMessage, EXPRESSIONS_BLOCK_ID};
use crate::PageError;

pub struct PageSession {
    page_id: String,
    config: Arc<RuntimeConfig>,
    registry: SourceRegistry,
    actions: IndexMap<String, ActionDecl>,
    blocks: std::sync::RwLock<IndexMap<String, Arc<BlockState>>>,
    expressions: std::sync::RwLock<IndexMap<String, Expression>>,
    tx: broadcast::Sender<String>,
}

impl PageSession {
    pub fn new(page_id: &str, config: Arc<RuntimeConfig>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            page_id: page_id.to_string(),
            config,
            registry: SourceRegistry::new(),
            actions: IndexMap::new(),
            blocks: std::sync::RwLock::new(IndexMap::new()),
            expressions: std::sync::RwLock::new(IndexMap::new()),
            tx,
        }
    }

    /// Declared custom actions from the page front matter. Builder-time
    /// only: blocks added afterwards receive this map.
    pub fn with_actions(mut self, actions: IndexMap<String, ActionDecl>) -> Self {
        self.actions = actions;
        self
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Subscribe to the page's push channel.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Adopt a constructed block: wire the page config into it, register
    /// its source for sibling lookup, and index it by name.
    pub fn add_block(&self, block: BlockState) -> Result<Arc<BlockState>, PageError> {
        block.set_page_config(self.actions.clone(), self.registry.clone())?;
        self.registry.register(block.source().clone());

        let block = Arc::new(block);
        self.blocks
            .write()
            .expect("blocks lock poisoned")
            .insert(block.name().to_string(), block.clone());
        Ok(block)
    }

    pub fn block(&self, name: &str) -> Option<Arc<BlockState>> {
        self.blocks
            .read()
            .expect("blocks lock poisoned")
            .get(name)
            .cloned()
    }

    /// Register one expression slot (the body after the `=` of an inline
    /// expression span).
    pub fn register_expression(&self, id: &str, body: &str) -> Result<(), PageError> {
        let expr = livemark_expr::parse(body)?;
        self.expressions
            .write()
            .expect("expressions lock poisoned")
            .insert(id.to_string(), expr);
        Ok(())
    }

    /// Route one client envelope: dispatch to the named block, then push
    /// its refreshed projection and the re-evaluated expression slots.
    ///
    /// Action failures are captured in the block's own `error` field and
    /// still produce a push, so the client always sees the latest state.
    pub async fn dispatch(&self, envelope: &ActionEnvelope) -> Result<(), PageError> {
        if envelope.block_id == EXPRESSIONS_BLOCK_ID {
            self.push_expressions().await;
            return Ok(());
        }

        let block = self
            .block(&envelope.block_id)
            .ok_or_else(|| PageError::UnknownBlock(envelope.block_id.clone()))?;

        let result = block
            .handle_action(&envelope.action, envelope.data.clone())
            .await;

        self.push_block(&block).await;
        self.push_expressions().await;

        result.map_err(PageError::from)
    }

    /// Convenience for non-envelope callers (the schedule bridge).
    pub async fn run_action(
        &self,
        action: &str,
        args: &IndexMap<String, String>,
    ) -> Result<(), PageError> {
        // Builtin names target a specific block; declared actions are
        // page-level, so any block can carry the dispatch. Pick the first.
        let block = {
            let blocks = self.blocks.read().expect("blocks lock poisoned");
            blocks.values().next().cloned()
        }
        .ok_or_else(|| PageError::NoActionTarget(action.to_string()))?;

        let payload: Payload = args
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        let result = block.handle_action(action, payload).await;
        self.push_block(&block).await;
        self.push_expressions().await;
        result.map_err(PageError::from)
    }

    /// Push every block's projection and the expression slots; used when a
    /// client first attaches.
    pub async fn push_all(&self) {
        let blocks: Vec<Arc<BlockState>> = {
            let guard = self.blocks.read().expect("blocks lock poisoned");
            guard.values().cloned().collect()
        };
        for block in blocks {
            self.push_block(&block).await;
        }
        self.push_expressions().await;
    }

    /// Tell clients the source file changed and the page must reload.
    pub fn push_reload(&self) {
        let _ = self.tx.send(PushMessage::reload().to_json());
    }

    async fn push_block(&self, block: &Arc<BlockState>) {
        let projection = block.projection().await;
        let msg = PushMessage::block_state(block.name(), projection);
        // A send error only means no client is currently attached.
        let _ = self.tx.send(msg.to_json());
        debug!(page = %self.page_id, block = %block.name(), "pushed block state");
    }

    /// Evaluate every expression slot against the blocks' latest fetched
    /// data and push the results under the sentinel block id.
    pub async fn push_expressions(&self) {
        let exprs = {
            let guard = self.expressions.read().expect("expressions lock poisoned");
            guard.clone()
        };
        if exprs.is_empty() {
            return;
        }

        let rows = self.collect_rows().await;
        let results = evaluate_expressions(&exprs, &rows);
        let _ = self.tx.send(PushMessage::expr_update(&results).to_json());
    }

    /// Release every block's source. Called when the page session ends.
    pub async fn close(&self) {
        let blocks: Vec<Arc<BlockState>> = {
            let guard = self.blocks.read().expect("blocks lock poisoned");
            guard.values().cloned().collect()
        };
        for block in blocks {
            if let Err(e) = block.source().close().await {
                tracing::warn!(
                    page = %self.page_id,
                    block = %block.name(),
                    error = %e,
                    "source close failed"
                );
            }
        }
    }

    /// Latest fetched rows per source name. Blocks sharing a source agree
    /// by construction (the instance is shared through the registry).
    async fn collect_rows(&self) -> HashMap<String, Vec<Row>> {
        let blocks: Vec<Arc<BlockState>> = {
            let guard = self.blocks.read().expect("blocks lock poisoned");
            guard.values().cloned().collect()
        };
        let mut rows = HashMap::new();
        for block in blocks {
            rows.entry(block.source().name().to_string())
                .or_insert(block.data().await);
        }
        rows
    }
}
