//! Federation trust core for Accord.
//!
//! Independent tenants negotiate bilateral partnerships, issue credentials
//! for programmatic access and register federation nodes hosted by other
//! installations. Every successful mutation appends one entry to the audit
//! trail in `accord-audit`.
//!
//! The registries borrow a single connection for the duration of a request
//! and take the acting user explicitly:
//!
//! ```rust,ignore
//! let gate = SqliteFeatureGate::new(&conn);
//! let notifier = OutboxNotifier::new(&conn);
//! let partnership = PartnershipRegistry::new(&conn, &gate, &notifier)
//!     .request(&actor, &NewPartnershipRequest {
//!         target_tenant_id: 9,
//!         federation_level: 2,
//!         message: None,
//!     })?;
//! ```
//!
//! Every mutating operation requires a tenant admin role and an open
//! [`FeatureGate`] for the acting tenant. Ids that belong to another tenant
//! are reported exactly like unknown ids.

mod access;
pub mod auth;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod export;
pub mod external;
pub mod gate;
pub mod notify;
pub mod partnership;
pub mod types;

pub use auth::{
    authenticate_bearer, authenticate_signed, log_api_request, sign_request, ApiRequestLog,
    AuthError, AuthenticatedKey, SignedRequest,
};
pub use credentials::{list_api_keys, CredentialIssuer, NewApiKey};
pub use error::{to_operation_result, FederationError};
pub use export::{write_api_activity_csv, write_partnerships_csv};
pub use external::{
    check_connection, list_external_partners, test_connection, ExternalPartnerRegistry,
    ExternalPartnerUpdate, NewExternalPartner,
};
pub use gate::{FeatureGate, FederationFeature, SqliteFeatureGate, StaticFeatureGate};
pub use notify::{Notifier, NotifyError, OutboxNotifier, TracingNotifier};
pub use partnership::{
    CounterProposalInput, NewPartnershipRequest, PartnershipRegistry,
};
pub use types::{
    ApiKeyStatus, ApiKeySummary, AuthMethod, ConnectionTestReport, CounterProposal, ExpiresIn,
    ExternalCapabilities, ExternalPartner, ExternalPartnerStatus, IssuedCredential, Partnership,
    PartnershipStats, PartnershipStatus, Scope,
};
