//! Transport-agnostic JSON-RPC 2.0 surface.
//!
//! | Method                      | Description                                   |
//! |-----------------------------|-----------------------------------------------|
//! | `prompt_engine`             | Run one pipeline pass                         |
//! | `sessions.list`             | Summaries of stored chain sessions            |
//! | `sessions.get`              | One session, full state                       |
//! | `sessions.clear`            | Drop one session (or all) and its resources   |
//! | `gates.list`                | Canonical and live temporary gates            |
//! | `gates.resolve`             | Classify a gate reference                     |
//! | `injection.setOverride`     | Add a runtime injection override              |
//! | `injection.clearOverrides`  | Remove overrides, optionally for one type     |
//! | `injection.inspect`         | Resolved decisions with their resolution path |

pub mod error;
pub mod methods;
pub mod router;
pub mod types;

pub use error::RpcError;
pub use router::RpcRouter;
pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
