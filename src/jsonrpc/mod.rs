//! JSON-RPC envelope and wire framing.
//!
//! # Data Flow
//! ```text
//! child stdout bytes
//!     → codec.rs (split on '\n', parse, resync on garbage)
//!     → message.rs (classify: request / response / error / notification)
//!
//! Message
//!     → codec.rs (serialize, append '\n')
//!     → child stdin
//! ```

pub mod codec;
pub mod message;

pub use codec::{Frame, FrameError, JsonLineCodec};
pub use message::{ErrorObject, ErrorResponse, Message, Notification, Request, RequestId, Response};
