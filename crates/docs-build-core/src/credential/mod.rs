//! Credential lifecycle: storage, browser sign-in and the controller.

pub mod callback;
pub mod controller;
pub mod sign_in;
pub mod store;

pub use callback::{CallbackHub, PendingCallback};
pub use controller::CredentialController;
pub use sign_in::{callback_uri, parse_callback, sign_in_url};
pub use store::{
    credential_key, CredentialStore, FileCredentialStore, MemoryCredentialStore,
    UnavailableCredentialStore,
};
