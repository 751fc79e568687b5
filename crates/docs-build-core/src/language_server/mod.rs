//! Real-time validation: the build tool's language server and its
//! credential refresh protocol.

pub mod credential_expiry;
pub mod manager;
pub mod rpc;

pub use credential_expiry::{
    CredentialExpiryHandler, CredentialSource, GetCredentialParams, GetCredentialResponse,
    GET_CREDENTIAL_METHOD,
};
pub use manager::{
    run_protocol, LanguageServerDeps, LanguageServerManager, ProtocolContext,
    PUBLISH_DIAGNOSTICS_METHOD,
};
pub use rpc::RpcMessage;
