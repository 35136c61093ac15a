//! Checks shared by every mutating registry operation.

use accord_types::ActorContext;
use rusqlite::types::Type;

use crate::error::FederationError;
use crate::gate::{require_actor_enabled, FeatureGate};

/// Role check, then gate check. Runs before any lookup or mutation.
pub(crate) fn authorize_mutation(
    actor: &ActorContext,
    gate: &dyn FeatureGate,
) -> Result<(), FederationError> {
    if !actor.is_tenant_admin() {
        return Err(FederationError::Forbidden(
            "federation administration requires a tenant admin role".to_string(),
        ));
    }
    require_actor_enabled(gate, actor.tenant_id)
}

/// Trims free text, mapping blank input to `None`.
pub(crate) fn clean_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Wraps a decode failure of column `idx` as a rusqlite conversion error.
pub(crate) fn conversion_error<E>(idx: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}
