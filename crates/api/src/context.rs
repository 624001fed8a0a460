use folio_auth::IdentityRecord;

/// The provisioned principal of a request.
///
/// Always present on guarded routes; `None` means unauthenticated (public
/// paths, or a session the provider did not accept).
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<IdentityRecord>);

impl CurrentUser {
    pub fn record(&self) -> Option<&IdentityRecord> {
        self.0.as_ref()
    }
}
