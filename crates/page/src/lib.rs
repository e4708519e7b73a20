//! Page session host: the seams between the push transport, the block
//! state engines, the expression evaluator, and the schedule runner.
//!
//! No HTTP or websocket code lives here; the push channel appears only as
//! a `tokio::sync::broadcast` sender of serialized messages.

pub mod bridge;
pub mod envelope;
pub mod session;

use thiserror::Error;

pub use bridge::ScheduleBridge;
pub use envelope::{ActionEnvelope, PushMessage, EXPRESSIONS_BLOCK_ID, EXPR_UPDATE_ACTION, RELOAD_ACTION};
pub use session::PageSession;

use livemark_block::BlockError;
use livemark_expr::ExprError;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("unknown block: {0}")]
    UnknownBlock(String),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error("page has no block that declares action '{0}'")]
    NoActionTarget(String),
}
