//! Error taxonomy.
//!
//! A closed set of result codes mapped 1:1 to LDAP result codes, carried by
//! a single `DirectoryError` type. The transport tier maps `ResultCode` to
//! the wire; the core never panics on a bad operation.

use std::io;

/// LDAP result codes surfaced by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResultCode {
    Success = 0,
    OperationsError = 1,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    Referral = 10,
    AdminLimitExceeded = 11,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    NoSuchObject = 32,
    AliasProblem = 33,
    InvalidDnSyntax = 34,
    AliasDereferencingProblem = 36,
    InappropriateAuthentication = 48,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    UnwillingToPerform = 53,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    EntryAlreadyExists = 68,
    Canceled = 118,
}

impl ResultCode {
    /// The numeric code sent on the wire.
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        use ResultCode::*;
        match self {
            Success => "success",
            OperationsError => "operationsError",
            TimeLimitExceeded => "timeLimitExceeded",
            SizeLimitExceeded => "sizeLimitExceeded",
            Referral => "referral",
            AdminLimitExceeded => "adminLimitExceeded",
            NoSuchAttribute => "noSuchAttribute",
            UndefinedAttributeType => "undefinedAttributeType",
            InappropriateMatching => "inappropriateMatching",
            ConstraintViolation => "constraintViolation",
            AttributeOrValueExists => "attributeOrValueExists",
            InvalidAttributeSyntax => "invalidAttributeSyntax",
            NoSuchObject => "noSuchObject",
            AliasProblem => "aliasProblem",
            InvalidDnSyntax => "invalidDNSyntax",
            AliasDereferencingProblem => "aliasDereferencingProblem",
            InappropriateAuthentication => "inappropriateAuthentication",
            InvalidCredentials => "invalidCredentials",
            InsufficientAccessRights => "insufficientAccessRights",
            UnwillingToPerform => "unwillingToPerform",
            NamingViolation => "namingViolation",
            ObjectClassViolation => "objectClassViolation",
            NotAllowedOnNonLeaf => "notAllowedOnNonLeaf",
            EntryAlreadyExists => "entryAlreadyExists",
            Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// The one error type of the core.
///
/// Carries the result code, a human-readable message, the deepest existing
/// ancestor of a failing DN where applicable, referral URLs for
/// `ResultCode::Referral`, and an optional chained cause.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct DirectoryError {
    pub code: ResultCode,
    pub message: String,
    pub matched_dn: Option<String>,
    pub referrals: Vec<String>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

impl DirectoryError {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        DirectoryError {
            code,
            message: message.into(),
            matched_dn: None,
            referrals: Vec::new(),
            cause: None,
        }
    }

    pub fn with_matched_dn(mut self, dn: impl Into<String>) -> Self {
        self.matched_dn = Some(dn.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    // -- constructors for the common kinds ----------------------------------

    pub fn no_such_object(dn: &str) -> Self {
        Self::new(ResultCode::NoSuchObject, format!("no such entry: {}", dn))
    }

    pub fn entry_already_exists(dn: &str) -> Self {
        Self::new(
            ResultCode::EntryAlreadyExists,
            format!("entry already exists: {}", dn),
        )
    }

    pub fn not_allowed_on_non_leaf(dn: &str) -> Self {
        Self::new(
            ResultCode::NotAllowedOnNonLeaf,
            format!("entry has children: {}", dn),
        )
    }

    pub fn invalid_dn_syntax(dn: &str, detail: &str) -> Self {
        Self::new(
            ResultCode::InvalidDnSyntax,
            format!("invalid DN {:?}: {}", dn, detail),
        )
    }

    pub fn undefined_attribute_type(id: &str) -> Self {
        Self::new(
            ResultCode::UndefinedAttributeType,
            format!("unknown attribute type: {}", id),
        )
    }

    pub fn invalid_attribute_syntax(id: &str, detail: &str) -> Self {
        Self::new(
            ResultCode::InvalidAttributeSyntax,
            format!("invalid value for {}: {}", id, detail),
        )
    }

    pub fn no_such_attribute(id: &str) -> Self {
        Self::new(
            ResultCode::NoSuchAttribute,
            format!("no such attribute: {}", id),
        )
    }

    pub fn attribute_or_value_exists(id: &str) -> Self {
        Self::new(
            ResultCode::AttributeOrValueExists,
            format!("value already present for {}", id),
        )
    }

    pub fn constraint_violation(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::ConstraintViolation, detail)
    }

    pub fn object_class_violation(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::ObjectClassViolation, detail)
    }

    pub fn naming_violation(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::NamingViolation, detail)
    }

    pub fn alias_problem(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::AliasProblem, detail)
    }

    pub fn alias_deref_problem(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::AliasDereferencingProblem, detail)
    }

    pub fn unwilling_to_perform(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::UnwillingToPerform, detail)
    }

    pub fn insufficient_access(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::InsufficientAccessRights, detail)
    }

    pub fn invalid_credentials() -> Self {
        Self::new(ResultCode::InvalidCredentials, "invalid credentials")
    }

    pub fn inappropriate_authentication(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::InappropriateAuthentication, detail)
    }

    pub fn inappropriate_matching(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::InappropriateMatching, detail)
    }

    pub fn size_limit_exceeded() -> Self {
        Self::new(ResultCode::SizeLimitExceeded, "size limit exceeded")
    }

    pub fn time_limit_exceeded() -> Self {
        Self::new(ResultCode::TimeLimitExceeded, "time limit exceeded")
    }

    pub fn canceled() -> Self {
        Self::new(ResultCode::Canceled, "operation abandoned")
    }

    pub fn referral(urls: Vec<String>) -> Self {
        let mut e = Self::new(ResultCode::Referral, "referral");
        e.referrals = urls;
        e
    }

    pub fn operations_error(detail: impl Into<String>) -> Self {
        Self::new(ResultCode::OperationsError, detail)
    }
}

impl From<io::Error> for DirectoryError {
    fn from(e: io::Error) -> Self {
        DirectoryError::new(ResultCode::OperationsError, "I/O failure").with_cause(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_wire_values() {
        assert_eq!(ResultCode::Success.code(), 0);
        assert_eq!(ResultCode::SizeLimitExceeded.code(), 4);
        assert_eq!(ResultCode::NoSuchObject.code(), 32);
        assert_eq!(ResultCode::NotAllowedOnNonLeaf.code(), 66);
        assert_eq!(ResultCode::EntryAlreadyExists.code(), 68);
        assert_eq!(ResultCode::Canceled.code(), 118);
    }

    #[test]
    fn display_includes_name_and_code() {
        let e = DirectoryError::no_such_object("cn=missing,o=example");
        let s = e.to_string();
        assert!(s.contains("noSuchObject"));
        assert!(s.contains("32"));
        assert!(s.contains("cn=missing"));
    }

    #[test]
    fn matched_dn_is_carried() {
        let e = DirectoryError::no_such_object("cn=a,cn=b,o=example").with_matched_dn("o=example");
        assert_eq!(e.matched_dn.as_deref(), Some("o=example"));
    }

    #[test]
    fn io_errors_become_operations_error() {
        let io = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let e: DirectoryError = io.into();
        assert_eq!(e.code, ResultCode::OperationsError);
        assert!(e.cause.is_some());
    }

    #[test]
    fn referral_carries_urls() {
        let e = DirectoryError::referral(vec!["ldap://other.example/o=example".into()]);
        assert_eq!(e.code, ResultCode::Referral);
        assert_eq!(e.referrals.len(), 1);
    }
}
