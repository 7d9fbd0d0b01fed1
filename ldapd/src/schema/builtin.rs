//! Bootstrap schema.
//!
//! The core subset of RFC 4512/4519/2798 plus the operational attributes the
//! server maintains itself. Declared as RFC 4512 description strings and
//! parsed at startup, the same way a schema partition would feed them in.

use tracing::debug;

use super::parse::{parse_attribute_type, parse_object_class};
use super::SchemaRegistry;

const ATTRIBUTE_TYPES: &[&str] = &[
    // -- user attributes (RFC 4519, RFC 4524, RFC 2798) --
    "( 2.5.4.0 NAME 'objectClass' EQUALITY objectIdentifierMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.38 )",
    "( 2.5.4.41 NAME 'name' EQUALITY caseIgnoreMatch SUBSTR caseIgnoreSubstringsMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name )",
    "( 2.5.4.4 NAME ( 'sn' 'surname' ) SUP name )",
    "( 2.5.4.42 NAME 'givenName' SUP name )",
    "( 2.5.4.7 NAME ( 'l' 'localityName' ) SUP name )",
    "( 2.5.4.8 NAME ( 'st' 'stateOrProvinceName' ) SUP name )",
    "( 2.5.4.9 NAME ( 'street' 'streetAddress' ) EQUALITY caseIgnoreMatch \
       SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.10 NAME ( 'o' 'organizationName' ) SUP name )",
    "( 2.5.4.11 NAME ( 'ou' 'organizationalUnitName' ) SUP name )",
    "( 2.5.4.12 NAME 'title' SUP name )",
    "( 2.5.4.13 NAME 'description' EQUALITY caseIgnoreMatch \
       SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.17 NAME 'postalCode' EQUALITY caseIgnoreMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.20 NAME 'telephoneNumber' EQUALITY telephoneNumberMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.50 )",
    "( 2.5.4.35 NAME 'userPassword' EQUALITY octetStringMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.40 )",
    "( 2.5.4.49 NAME 'distinguishedName' EQUALITY distinguishedNameMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 )",
    "( 2.5.4.34 NAME 'seeAlso' SUP distinguishedName )",
    "( 2.5.4.31 NAME 'member' SUP distinguishedName )",
    "( 2.5.4.50 NAME 'uniqueMember' EQUALITY uniqueMemberMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 )",
    "( 0.9.2342.19200300.100.1.1 NAME ( 'uid' 'userid' ) EQUALITY caseIgnoreMatch \
       SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 0.9.2342.19200300.100.1.3 NAME ( 'mail' 'rfc822Mailbox' ) EQUALITY caseIgnoreIA5Match \
       SUBSTR caseIgnoreIA5SubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.26 )",
    "( 0.9.2342.19200300.100.1.25 NAME ( 'dc' 'domainComponent' ) EQUALITY caseIgnoreIA5Match \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.26 SINGLE-VALUE )",
    "( 0.9.2342.19200300.100.1.60 NAME 'jpegPhoto' \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.28 )",
    "( 2.16.840.1.113730.3.1.241 NAME 'displayName' SUP name SINGLE-VALUE )",
    "( 1.3.6.1.1.1.1.0 NAME 'uidNumber' EQUALITY integerMatch \
       ORDERING integerOrderingMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 SINGLE-VALUE )",
    "( 1.3.6.1.1.1.1.1 NAME 'gidNumber' EQUALITY integerMatch \
       ORDERING integerOrderingMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 SINGLE-VALUE )",
    // -- alias / referral plumbing --
    "( 2.5.4.1 NAME 'aliasedObjectName' EQUALITY distinguishedNameMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 SINGLE-VALUE )",
    "( 2.16.840.1.113730.3.1.34 NAME 'ref' EQUALITY caseExactMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.26 USAGE distributedOperation )",
    // -- operational attributes stamped by the server --
    "( 2.5.18.1 NAME 'createTimestamp' EQUALITY generalizedTimeMatch \
       ORDERING generalizedTimeOrderingMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.24 \
       SINGLE-VALUE NO-USER-MODIFICATION USAGE directoryOperation )",
    "( 2.5.18.2 NAME 'modifyTimestamp' EQUALITY generalizedTimeMatch \
       ORDERING generalizedTimeOrderingMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.24 \
       SINGLE-VALUE NO-USER-MODIFICATION USAGE directoryOperation )",
    "( 2.5.18.3 NAME 'creatorsName' EQUALITY distinguishedNameMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 SINGLE-VALUE NO-USER-MODIFICATION \
       USAGE directoryOperation )",
    "( 2.5.18.4 NAME 'modifiersName' EQUALITY distinguishedNameMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 SINGLE-VALUE NO-USER-MODIFICATION \
       USAGE directoryOperation )",
    "( 1.3.6.1.1.16.4 NAME 'entryUUID' EQUALITY uuidMatch \
       SYNTAX 1.3.6.1.1.16.1 SINGLE-VALUE NO-USER-MODIFICATION USAGE directoryOperation )",
    "( 1.3.6.1.4.1.4203.666.1.7 NAME 'entryCSN' EQUALITY caseExactMatch \
       ORDERING caseExactOrderingMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 \
       SINGLE-VALUE NO-USER-MODIFICATION USAGE directoryOperation )",
    // -- administrative model --
    "( 2.5.18.5 NAME 'administrativeRole' EQUALITY objectIdentifierMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.38 USAGE directoryOperation )",
    "( 2.5.18.6 NAME 'subtreeSpecification' \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.45 SINGLE-VALUE USAGE directoryOperation )",
    "( 2.5.18.7 NAME 'collectiveExclusions' EQUALITY objectIdentifierMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.38 USAGE directoryOperation )",
    "( 2.5.24.4 NAME 'prescriptiveACI' EQUALITY caseIgnoreMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 USAGE directoryOperation )",
    // -- collective attributes (RFC 3671) --
    "( 2.5.4.7.1 NAME 'c-l' SUP l COLLECTIVE )",
    "( 2.5.4.11.1 NAME 'c-ou' SUP ou COLLECTIVE )",
    "( 2.5.4.20.1 NAME 'c-TelephoneNumber' SUP telephoneNumber COLLECTIVE )",
    // -- configuration entries (private arc) --
    "( 1.3.6.1.4.1.32473.1.1 NAME 'directoryInstanceId' EQUALITY caseIgnoreMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.1.2 NAME 'replicaId' EQUALITY integerMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.1.3 NAME 'defaultSizeLimit' EQUALITY integerMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.1.4 NAME 'defaultTimeLimit' EQUALITY integerMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.1.5 NAME 'adminDn' EQUALITY caseIgnoreMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.1.6 NAME 'adminPassword' EQUALITY octetStringMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.40 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.1.7 NAME 'interceptorName' EQUALITY caseExactMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 1.3.6.1.4.1.32473.2.1 NAME 'partitionId' EQUALITY caseIgnoreMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.2.2 NAME 'partitionSuffix' EQUALITY caseIgnoreMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.2.3 NAME 'partitionWorkingDir' EQUALITY caseExactMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 SINGLE-VALUE )",
    "( 1.3.6.1.4.1.32473.2.4 NAME 'indexedAttribute' EQUALITY caseIgnoreMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    // -- root DSE / subschema --
    "( 1.3.6.1.4.1.1466.101.120.5 NAME 'namingContexts' \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 USAGE dSAOperation )",
    "( 1.3.6.1.4.1.1466.101.120.15 NAME 'supportedLDAPVersion' EQUALITY integerMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 USAGE dSAOperation )",
    "( 1.3.6.1.1.4 NAME 'vendorName' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 \
       SINGLE-VALUE NO-USER-MODIFICATION USAGE dSAOperation )",
    "( 1.3.6.1.1.5 NAME 'vendorVersion' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 \
       SINGLE-VALUE NO-USER-MODIFICATION USAGE dSAOperation )",
    "( 2.5.18.10 NAME 'subschemaSubentry' EQUALITY distinguishedNameMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 SINGLE-VALUE NO-USER-MODIFICATION \
       USAGE directoryOperation )",
    "( 2.5.21.5 NAME 'attributeTypes' EQUALITY objectIdentifierFirstComponentMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.3 USAGE directoryOperation )",
    "( 2.5.21.6 NAME 'objectClasses' EQUALITY objectIdentifierFirstComponentMatch \
       SYNTAX 1.3.6.1.4.1.1466.115.121.1.37 USAGE directoryOperation )",
];

const OBJECT_CLASSES: &[&str] = &[
    "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )",
    "( 2.5.6.1 NAME 'alias' SUP top STRUCTURAL MUST aliasedObjectName )",
    "( 2.5.6.4 NAME 'organization' SUP top STRUCTURAL MUST o \
       MAY ( description $ l $ st $ street $ postalCode $ telephoneNumber $ seeAlso ) )",
    "( 2.5.6.5 NAME 'organizationalUnit' SUP top STRUCTURAL MUST ou \
       MAY ( description $ l $ st $ street $ postalCode $ telephoneNumber $ seeAlso ) )",
    "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) \
       MAY ( userPassword $ telephoneNumber $ seeAlso $ description ) )",
    "( 2.5.6.7 NAME 'organizationalPerson' SUP person STRUCTURAL \
       MAY ( title $ ou $ street $ postalCode $ l $ st ) )",
    "( 2.16.840.1.113730.3.2.2 NAME 'inetOrgPerson' SUP organizationalPerson STRUCTURAL \
       MAY ( uid $ mail $ givenName $ displayName $ jpegPhoto $ uidNumber $ gidNumber ) )",
    "( 2.5.6.9 NAME 'groupOfNames' SUP top STRUCTURAL MUST ( member $ cn ) \
       MAY ( description $ o $ ou $ seeAlso ) )",
    "( 2.5.6.17 NAME 'groupOfUniqueNames' SUP top STRUCTURAL MUST ( uniqueMember $ cn ) \
       MAY ( description $ o $ ou $ seeAlso ) )",
    "( 0.9.2342.19200300.100.4.13 NAME 'domain' SUP top STRUCTURAL MUST dc \
       MAY ( description $ o $ seeAlso ) )",
    "( 1.3.6.1.4.1.1466.344 NAME 'dcObject' SUP top AUXILIARY MUST dc )",
    "( 2.16.840.1.113730.3.2.6 NAME 'referral' SUP top STRUCTURAL MUST ref )",
    "( 2.5.17.0 NAME 'subentry' SUP top STRUCTURAL MUST ( cn $ subtreeSpecification ) )",
    "( 2.5.17.1 NAME 'accessControlSubentry' AUXILIARY MAY prescriptiveACI )",
    "( 2.5.17.2 NAME 'collectiveAttributeSubentry' AUXILIARY )",
    "( 1.3.6.1.4.1.1466.101.120.111 NAME 'extensibleObject' SUP top AUXILIARY )",
    "( 2.5.20.1 NAME 'subschema' AUXILIARY MAY ( attributeTypes $ objectClasses ) )",
    "( 1.3.6.1.4.1.32473.3.1 NAME 'directoryConfig' SUP top STRUCTURAL MUST cn \
       MAY ( directoryInstanceId $ replicaId $ defaultSizeLimit $ defaultTimeLimit \
       $ adminDn $ adminPassword $ interceptorName ) )",
    "( 1.3.6.1.4.1.32473.3.2 NAME 'partitionConfig' SUP top STRUCTURAL \
       MUST ( cn $ partitionId $ partitionSuffix ) \
       MAY ( partitionWorkingDir $ indexedAttribute ) )",
];

/// Build a registry holding the builtin schema.
///
/// The definitions above are compile-time constants; a parse failure here is
/// a programming error, not a runtime condition.
pub fn bootstrap_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    for def in ATTRIBUTE_TYPES {
        let at = parse_attribute_type(def).expect("builtin attribute type must parse");
        registry.add_attribute_type(at);
    }
    for def in OBJECT_CLASSES {
        let oc = parse_object_class(def).expect("builtin object class must parse");
        registry.add_object_class(oc);
    }
    debug!(
        attribute_types = ATTRIBUTE_TYPES.len(),
        object_classes = OBJECT_CLASSES.len(),
        "bootstrapped builtin schema"
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_parses_everything() {
        let reg = bootstrap_registry();
        assert!(reg.attribute_type("cn").is_some());
        assert!(reg.attribute_type("entryUUID").is_some());
        assert!(reg.object_class("person").is_some());
        assert!(reg.object_class("alias").is_some());
        assert!(reg.object_class("referral").is_some());
        assert!(reg.object_class("subentry").is_some());
    }

    #[test]
    fn operational_attributes_are_flagged() {
        let reg = bootstrap_registry();
        for id in ["entryUUID", "entryCSN", "createTimestamp", "creatorsName"] {
            let at = reg.attribute_type(id).unwrap();
            assert!(at.is_operational(), "{} should be operational", id);
            assert!(at.no_user_modification, "{} should be protected", id);
        }
        assert!(!reg.attribute_type("cn").unwrap().is_operational());
    }

    #[test]
    fn collective_attributes_are_flagged() {
        let reg = bootstrap_registry();
        assert!(reg.attribute_type("c-ou").unwrap().collective);
        assert!(!reg.attribute_type("ou").unwrap().collective);
    }

    #[test]
    fn inheritance_reaches_through_sup() {
        let reg = bootstrap_registry();
        let cn = reg.attribute_type("cn").unwrap();
        // cn has no EQUALITY of its own; it inherits caseIgnoreMatch via name.
        assert_eq!(
            reg.equality_rule(cn),
            crate::schema::MatchingRuleKind::CaseIgnore
        );
    }
}
