//! Authentication engine for bymcp.
//!
//! Two providers, two grant types:
//!
//! - **Qonto** uses the OAuth 2.0 authorization code flow with a local
//!   callback server on port 7777.
//! - **Microsoft** uses the device authorization grant (RFC 8628), split
//!   into a start and a complete step so each fits in one tool call.
//!
//! Tokens are cached as JSON files in the data directory and refreshed
//! transparently. API clients see only the [`TokenSource`] trait.
//!
//! # Architecture
//!
//! ```text
//! QontoSession ─────┐             MicrosoftSession ─┐
//! ├── OAuthFlow      │             ├── DeviceCodeFlow │
//! ├── CallbackServer │             ├── OAuthFlow      │ (refresh)
//! └── TokenCache     │             └── TokenCache     │
//!                    └── TokenSource ◄────────────────┘
//! ```

pub mod callback;
pub mod device_code;
pub mod error;
pub mod microsoft;
pub mod oauth;
pub mod qonto;
pub mod token_cache;
pub mod token_source;

pub use callback::CallbackServer;
pub use device_code::{DeviceCodeConfig, DeviceCodeFlow, DeviceCodeResponse};
pub use error::{AuthEngineError, Result};
pub use microsoft::{MicrosoftAuthConfig, MicrosoftSession, PendingDeviceFlow};
pub use oauth::{OAuthConfig, OAuthFlow, OAuthTokens, generate_state};
pub use qonto::{QontoAuthConfig, QontoSession};
pub use token_cache::TokenCache;
pub use token_source::{StaticToken, TokenSource};
