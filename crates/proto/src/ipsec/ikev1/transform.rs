//! Transform conversion and matching
//!
//! [`convert`] turns a negotiated transform into a [`SecurityProtocol`];
//! [`match_transform`] decides whether an offered transform is acceptable
//! for one policy entry. Selection and verification both rely on the
//! matching rules, so that what the responder accepts is exactly what the
//! initiator later checks.

use super::constants::{attr, ProtocolId};
use super::payload::TransformPayload;
use super::security::{
    AuthAlgorithm, EncapsulationMode, EncryptionAlgorithm, IpsecProtocol, Lifetime,
    SecurityProtocol,
};
use crate::ipsec::crypto::DhGroup;
use crate::ipsec::{Error, Result};
use tracing::trace;

/// Negotiated parameters of one transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertedTransform {
    /// Security descriptor
    pub security: SecurityProtocol,
    /// Negotiated lifetime in seconds
    pub lifetime_secs: u32,
}

/// Convert a transform into a security descriptor and lifetime
///
/// LIFE_DURATION is ignored when it follows a LIFE_TYPE other than
/// seconds. Without a lifetime the DOI default applies; without an
/// encapsulation mode, transport mode.
pub fn convert(
    protocol_id: u8,
    transform: &TransformPayload,
    default_lifetime: u32,
) -> Result<ConvertedTransform> {
    let protocol =
        IpsecProtocol::from_protocol_id(protocol_id).ok_or(Error::InvalidProtocol(protocol_id))?;

    let key_bits = match transform.attribute(attr::KEY_LENGTH) {
        Some(a) => Some(
            a.basic_value()
                .ok_or(Error::UnsupportedAttribute(attr::KEY_LENGTH))?,
        ),
        None => None,
    };

    let (encryption, mut auth) = match protocol {
        IpsecProtocol::Ah => (
            None,
            AuthAlgorithm::from_ah_transform_id(transform.transform_id)
                .ok_or(Error::InvalidTransform(transform.transform_id))?,
        ),
        IpsecProtocol::Esp => (
            Some(
                EncryptionAlgorithm::from_transform_id(transform.transform_id, key_bits)
                    .ok_or(Error::InvalidTransform(transform.transform_id))?,
            ),
            AuthAlgorithm::None,
        ),
    };

    let mut mode = None;
    let mut lifetime = None;
    let mut ignore_lifetime = false;

    for attribute in &transform.attributes {
        match attribute.attr_type {
            attr::ENCAP_MODE => {
                let value = attribute.value_u32()? as u16;
                mode = Some(
                    EncapsulationMode::from_attribute_value(value)
                        .ok_or(Error::UnsupportedAttribute(attr::ENCAP_MODE))?,
                );
            }
            attr::AUTH_ALGO => {
                let value = attribute.value_u32()? as u16;
                auth = AuthAlgorithm::from_attribute_value(value)
                    .ok_or(Error::UnsupportedAttribute(attr::AUTH_ALGO))?;
            }
            attr::LIFE_TYPE => {
                ignore_lifetime = attribute.value_u32()? != attr::LIFE_TYPE_SECONDS as u32;
            }
            attr::LIFE_DURATION => {
                if !ignore_lifetime {
                    lifetime = Some(attribute.value_u32()?);
                }
            }
            attr::GROUP_DESC | attr::KEY_LENGTH => {}
            other => return Err(Error::UnsupportedAttribute(other)),
        }
    }

    Ok(ConvertedTransform {
        security: SecurityProtocol {
            protocol,
            encryption,
            auth,
            mode: mode.unwrap_or(EncapsulationMode::Transport),
        },
        lifetime_secs: lifetime.unwrap_or(default_lifetime),
    })
}

/// Check an offered transform against one policy entry
///
/// Returns `Ok(false)` on a mismatch. Errors are reserved for transforms
/// that can never be acceptable (reserved transform ID, unknown attribute).
pub fn match_transform(
    protocol_id: u8,
    transform: &TransformPayload,
    security: &SecurityProtocol,
    lifetime: Lifetime,
    pfs_group: Option<DhGroup>,
) -> Result<bool> {
    if transform.transform_id == 0 {
        return Err(Error::InvalidTransform(0));
    }

    let key_bits = match ProtocolId::from_u8(protocol_id) {
        Some(ProtocolId::Ah) => {
            if Some(transform.transform_id) != security.auth.ah_transform_id() {
                trace!("Authentication algorithm mismatch (AH)");
                return Ok(false);
            }
            None
        }
        Some(ProtocolId::Esp) => {
            let Some(encryption) = security.encryption else {
                return Ok(false);
            };
            if transform.transform_id != encryption.transform_id() {
                trace!("Encryption algorithm mismatch (ESP)");
                return Ok(false);
            }
            Some(encryption.key_bits())
        }
        _ => return Err(Error::InvalidProtocol(protocol_id)),
    };

    let mut ignore_lifetime = false;
    let mut seen_mode = None;
    let mut seen_auth = None;
    let mut seen_group = false;
    let mut seen_key_len = false;

    for attribute in &transform.attributes {
        match attribute.attr_type {
            attr::LIFE_TYPE => {
                ignore_lifetime = attribute.basic_value() != Some(attr::LIFE_TYPE_SECONDS);
            }
            attr::GROUP_DESC => {
                seen_group = true;
                let offered = attribute.basic_value();
                if pfs_group.map(DhGroup::to_u16) != offered || offered.is_none() {
                    trace!("PFS group mismatch");
                    return Ok(false);
                }
            }
            attr::ENCAP_MODE => {
                seen_mode = attribute.basic_value();
                if seen_mode != Some(security.mode.attribute_value()) {
                    trace!("Encapsulation mode mismatch");
                    return Ok(false);
                }
            }
            attr::AUTH_ALGO => {
                seen_auth = attribute.basic_value();
                if seen_auth.is_none() || security.auth.attribute_value() != seen_auth {
                    trace!("Authentication algorithm mismatch");
                    return Ok(false);
                }
            }
            attr::KEY_LENGTH => {
                seen_key_len = true;
                if key_bits.is_none() || attribute.basic_value() != key_bits {
                    trace!("Encryption key length mismatch");
                    return Ok(false);
                }
            }
            attr::LIFE_DURATION => {
                if ignore_lifetime {
                    continue;
                }
                let Ok(offered) = attribute.value_u32() else {
                    trace!("Lifetime mismatch (too large)");
                    return Ok(false);
                };
                if let Lifetime::Seconds(allowed) = lifetime {
                    if allowed < offered {
                        trace!(allowed, offered, "Lifetime mismatch");
                        return Ok(false);
                    }
                }
            }
            other => return Err(Error::UnsupportedAttribute(other)),
        }
    }

    // Omitted attributes take their defaults and must still agree
    if seen_mode.is_none() && security.mode != EncapsulationMode::Transport {
        return Ok(false);
    }
    if security.protocol == IpsecProtocol::Esp
        && seen_auth.is_none()
        && security.auth != AuthAlgorithm::None
    {
        return Ok(false);
    }
    if pfs_group.is_some() && !seen_group {
        return Ok(false);
    }
    if !seen_key_len {
        if let Some(encryption) = security.encryption {
            if EncryptionAlgorithm::from_transform_id(transform.transform_id, None)
                != Some(encryption)
            {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::ikev1::constants::DOI_DEFAULT_LIFETIME_SECS;
    use crate::ipsec::ikev1::payload::DataAttribute;

    fn esp_aes128() -> SecurityProtocol {
        SecurityProtocol::esp(
            EncryptionAlgorithm::Aes128,
            AuthAlgorithm::HmacSha1,
            EncapsulationMode::Transport,
        )
    }

    fn esp_transform(lifetime: Option<u32>) -> TransformPayload {
        let mut t = TransformPayload::new(1, 12);
        t.attributes.push(DataAttribute::basic(attr::KEY_LENGTH, 128));
        t.attributes.push(DataAttribute::basic(attr::ENCAP_MODE, 2));
        t.attributes.push(DataAttribute::basic(attr::AUTH_ALGO, 2));
        if let Some(secs) = lifetime {
            t.attributes.push(DataAttribute::basic(attr::LIFE_TYPE, attr::LIFE_TYPE_SECONDS));
            t.attributes.push(DataAttribute::with_u32(attr::LIFE_DURATION, secs));
        }
        t
    }

    #[test]
    fn test_convert_esp() {
        let converted = convert(3, &esp_transform(Some(3600)), DOI_DEFAULT_LIFETIME_SECS).unwrap();
        assert_eq!(converted.security, esp_aes128());
        assert_eq!(converted.lifetime_secs, 3600);
    }

    #[test]
    fn test_convert_defaults() {
        let t = TransformPayload::new(1, 3);
        let converted = convert(2, &t, DOI_DEFAULT_LIFETIME_SECS).unwrap();
        assert_eq!(
            converted.security,
            SecurityProtocol::ah(AuthAlgorithm::HmacSha1, EncapsulationMode::Transport)
        );
        assert_eq!(converted.lifetime_secs, 28800);
    }

    #[test]
    fn test_convert_ignores_kilobyte_lifetime() {
        let mut t = TransformPayload::new(1, 3);
        t.attributes.push(DataAttribute::basic(attr::LIFE_TYPE, attr::LIFE_TYPE_KILOBYTES));
        t.attributes.push(DataAttribute::with_u32(attr::LIFE_DURATION, 100_000));
        t.attributes.push(DataAttribute::basic(attr::LIFE_TYPE, attr::LIFE_TYPE_SECONDS));
        t.attributes.push(DataAttribute::basic(attr::LIFE_DURATION, 600));
        assert_eq!(convert(2, &t, 28800).unwrap().lifetime_secs, 600);
    }

    #[test]
    fn test_convert_errors() {
        let mut t = TransformPayload::new(1, 3);
        t.attributes.push(DataAttribute::basic(7, 1));
        assert_eq!(convert(2, &t, 28800), Err(Error::UnsupportedAttribute(7)));
        assert_eq!(
            convert(1, &TransformPayload::new(1, 3), 28800),
            Err(Error::InvalidProtocol(1))
        );
        assert_eq!(
            convert(2, &TransformPayload::new(1, 99), 28800),
            Err(Error::InvalidTransform(99))
        );
    }

    #[test]
    fn test_match_esp() {
        let policy = esp_aes128();
        let t = esp_transform(Some(3600));
        assert!(match_transform(3, &t, &policy, Lifetime::Unspecified, None).unwrap());
        assert!(match_transform(3, &t, &policy, Lifetime::Seconds(7200), None).unwrap());
        assert!(!match_transform(3, &t, &policy, Lifetime::Seconds(600), None).unwrap());
    }

    #[test]
    fn test_match_key_length() {
        let policy = SecurityProtocol::esp(
            EncryptionAlgorithm::Aes256,
            AuthAlgorithm::HmacSha1,
            EncapsulationMode::Transport,
        );
        let t = esp_transform(None);
        assert!(!match_transform(3, &t, &policy, Lifetime::Unspecified, None).unwrap());

        // AES without KEY_LENGTH means 128 bits
        let mut t = TransformPayload::new(1, 12);
        t.attributes.push(DataAttribute::basic(attr::ENCAP_MODE, 2));
        t.attributes.push(DataAttribute::basic(attr::AUTH_ALGO, 2));
        assert!(match_transform(3, &t, &esp_aes128(), Lifetime::Unspecified, None).unwrap());
        assert!(!match_transform(3, &t, &policy, Lifetime::Unspecified, None).unwrap());
    }

    #[test]
    fn test_match_pfs_group() {
        let policy = esp_aes128();
        let matches = |t: &TransformPayload, group| {
            match_transform(3, t, &policy, Lifetime::Unspecified, group).unwrap()
        };
        let mut t = esp_transform(None);
        assert!(!matches(&t, Some(DhGroup::Modp1024)));

        t.attributes.push(DataAttribute::basic(attr::GROUP_DESC, 2));
        assert!(matches(&t, Some(DhGroup::Modp1024)));
        assert!(!matches(&t, Some(DhGroup::Modp2048)));
        assert!(!matches(&t, None));
    }

    #[test]
    fn test_match_mode_and_auth() {
        let offer = esp_transform(None);
        let mut policy = esp_aes128();
        policy.mode = EncapsulationMode::Tunnel;
        assert!(!match_transform(3, &offer, &policy, Lifetime::Unspecified, None).unwrap());

        let mut policy = esp_aes128();
        policy.auth = AuthAlgorithm::HmacSha256;
        assert!(!match_transform(3, &offer, &policy, Lifetime::Unspecified, None).unwrap());
    }

    #[test]
    fn test_match_errors() {
        let policy = esp_aes128();
        assert_eq!(
            match_transform(3, &TransformPayload::new(1, 0), &policy, Lifetime::Unspecified, None),
            Err(Error::InvalidTransform(0))
        );
        let mut t = esp_transform(None);
        t.attributes.push(DataAttribute::basic(9, 0));
        assert_eq!(
            match_transform(3, &t, &policy, Lifetime::Unspecified, None),
            Err(Error::UnsupportedAttribute(9))
        );
    }

    #[test]
    fn test_match_oversized_lifetime() {
        let mut t = esp_transform(None);
        t.attributes.push(DataAttribute::basic(attr::LIFE_TYPE, attr::LIFE_TYPE_SECONDS));
        t.attributes.push(DataAttribute::variable(attr::LIFE_DURATION, vec![1; 8]));
        assert!(!match_transform(3, &t, &esp_aes128(), Lifetime::Unspecified, None).unwrap());
    }
}
