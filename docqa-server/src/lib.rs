//! `docqa-server` answers questions about PDF documents over HTTP.
//!
//! `POST /query` asks the default document, `POST /upload_query` indexes an
//! uploaded PDF and optionally asks it, `GET /health` reports component state.

pub mod context;
pub mod error;
pub mod protocol;
pub mod server;
pub mod settings;
pub mod uploads;
pub mod worker;

pub use context::{AppContext, ComponentStatus, ServiceMode};
pub use server::{AppState, app_router, run_server};
pub use settings::Settings;
