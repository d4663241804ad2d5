//! Signed tokens authorizing a single storage operation.
//!
//! Payload: version (1) || action tag (1) || expiry_ts (u64 BE) ||
//! issuer (16) || workspace (16) || resource (16) || action fields.
//! Token = base64url(payload || HMAC-SHA256(secret, payload)).
//!
//! Validation order is fixed: MAC first (Invalid), then expiry (Expired),
//! then issuer binding (Forbidden). A token that fails the MAC reveals
//! nothing else about itself.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

pub const LINK_TOKEN_VERSION: u8 = 1;

const HEADER_LEN: usize = 1 + 1 + 8 + 16 + 16 + 16;
const MAC_LEN: usize = 32; // SHA256

const ACTION_UPLOAD_PART: u8 = 1;
const ACTION_DOWNLOAD: u8 = 2;
const ACTION_ARCHIVE_ENTRY: u8 = 3;

const DISPOSITION_INLINE: u8 = 0;
const DISPOSITION_ATTACHMENT: u8 = 1;

/// How a download response should present the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentDisposition {
    Inline,
    Attachment,
}

/// The single storage operation a token authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Write part `part_number` of an upload; `content_type` is pinned at
    /// issuance so the client cannot change it.
    UploadPart {
        part_number: i32,
        content_type: String,
    },
    /// Read the whole file.
    Download {
        disposition: ContentDisposition,
        filename: String,
    },
    /// Read one member out of an archive file.
    ArchiveEntry { entry_name: String },
}

impl LinkAction {
    fn tag(&self) -> u8 {
        match self {
            LinkAction::UploadPart { .. } => ACTION_UPLOAD_PART,
            LinkAction::Download { .. } => ACTION_DOWNLOAD,
            LinkAction::ArchiveEntry { .. } => ACTION_ARCHIVE_ENTRY,
        }
    }

    fn encode_fields(&self, out: &mut Vec<u8>) {
        match self {
            LinkAction::UploadPart {
                part_number,
                content_type,
            } => {
                out.extend_from_slice(&(*part_number as u32).to_be_bytes());
                out.extend_from_slice(content_type.as_bytes());
            }
            LinkAction::Download {
                disposition,
                filename,
            } => {
                out.push(match disposition {
                    ContentDisposition::Inline => DISPOSITION_INLINE,
                    ContentDisposition::Attachment => DISPOSITION_ATTACHMENT,
                });
                out.extend_from_slice(filename.as_bytes());
            }
            LinkAction::ArchiveEntry { entry_name } => {
                out.extend_from_slice(entry_name.as_bytes());
            }
        }
    }

    fn decode_fields(tag: u8, fields: &[u8]) -> Option<Self> {
        match tag {
            ACTION_UPLOAD_PART => {
                if fields.len() < 4 {
                    return None;
                }
                let part_number = u32::from_be_bytes(fields[0..4].try_into().ok()?) as i32;
                let content_type = String::from_utf8(fields[4..].to_vec()).ok()?;
                Some(LinkAction::UploadPart {
                    part_number,
                    content_type,
                })
            }
            ACTION_DOWNLOAD => {
                let disposition = match fields.first()? {
                    &DISPOSITION_INLINE => ContentDisposition::Inline,
                    &DISPOSITION_ATTACHMENT => ContentDisposition::Attachment,
                    _ => return None,
                };
                let filename = String::from_utf8(fields[1..].to_vec()).ok()?;
                Some(LinkAction::Download {
                    disposition,
                    filename,
                })
            }
            ACTION_ARCHIVE_ENTRY => {
                let entry_name = String::from_utf8(fields.to_vec()).ok()?;
                Some(LinkAction::ArchiveEntry { entry_name })
            }
            _ => None,
        }
    }
}

/// A validated token's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLink {
    pub issuer: Uuid,
    pub workspace_id: Uuid,
    pub resource_id: Uuid,
    pub action: LinkAction,
    pub expires_at: u64,
}

/// Outcome of presenting a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkValidation {
    Ok(SignedLink),
    Expired,
    Invalid,
    Forbidden,
}

/// Build a signed token authorizing `action` on `resource_id` for `issuer`.
pub fn create(
    issuer: Uuid,
    workspace_id: Uuid,
    resource_id: Uuid,
    action: &LinkAction,
    expires_in: Duration,
    secret: &[u8],
) -> String {
    let expiry_ts = SystemTime::now()
        .checked_add(expires_in)
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let mut payload = Vec::with_capacity(HEADER_LEN + 32);
    payload.push(LINK_TOKEN_VERSION);
    payload.push(action.tag());
    payload.extend_from_slice(&expiry_ts.to_be_bytes());
    payload.extend_from_slice(issuer.as_bytes());
    payload.extend_from_slice(workspace_id.as_bytes());
    payload.extend_from_slice(resource_id.as_bytes());
    action.encode_fields(&mut payload);

    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(&payload);
    let tag = mac.finalize().into_bytes();
    payload.extend_from_slice(&tag);

    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&payload)
}

/// Verify a token and bind it to the presenting identity.
pub fn validate(token: &str, current_identity: Uuid, secret: &[u8]) -> LinkValidation {
    let decoded = match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(token) {
        Ok(bytes) => bytes,
        Err(_) => return LinkValidation::Invalid,
    };
    if decoded.len() < HEADER_LEN + MAC_LEN {
        return LinkValidation::Invalid;
    }

    let (payload, tag) = decoded.split_at(decoded.len() - MAC_LEN);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(payload);
    if mac.verify_slice(tag).is_err() {
        return LinkValidation::Invalid;
    }

    if payload[0] != LINK_TOKEN_VERSION {
        return LinkValidation::Invalid;
    }
    let action_tag = payload[1];
    let expiry_ts = match payload[2..10].try_into() {
        Ok(bytes) => u64::from_be_bytes(bytes),
        Err(_) => return LinkValidation::Invalid,
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if now > expiry_ts {
        return LinkValidation::Expired;
    }

    let issuer = match payload[10..26].try_into() {
        Ok(bytes) => Uuid::from_bytes(bytes),
        Err(_) => return LinkValidation::Invalid,
    };
    if issuer != current_identity {
        return LinkValidation::Forbidden;
    }

    let workspace_id = match payload[26..42].try_into() {
        Ok(bytes) => Uuid::from_bytes(bytes),
        Err(_) => return LinkValidation::Invalid,
    };
    let resource_id = match payload[42..58].try_into() {
        Ok(bytes) => Uuid::from_bytes(bytes),
        Err(_) => return LinkValidation::Invalid,
    };
    let action = match LinkAction::decode_fields(action_tag, &payload[HEADER_LEN..]) {
        Some(action) => action,
        None => return LinkValidation::Invalid,
    };

    LinkValidation::Ok(SignedLink {
        issuer,
        workspace_id,
        resource_id,
        action,
        expires_at: expiry_ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"link-secret-for-tests-0123456789";

    fn round_trip(action: LinkAction) {
        let issuer = Uuid::new_v4();
        let workspace_id = Uuid::new_v4();
        let resource_id = Uuid::new_v4();
        let token = create(
            issuer,
            workspace_id,
            resource_id,
            &action,
            Duration::from_secs(3600),
            SECRET,
        );

        match validate(&token, issuer, SECRET) {
            LinkValidation::Ok(link) => {
                assert_eq!(link.issuer, issuer);
                assert_eq!(link.workspace_id, workspace_id);
                assert_eq!(link.resource_id, resource_id);
                assert_eq!(link.action, action);
            }
            other => panic!("expected Ok, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_part_round_trip() {
        round_trip(LinkAction::UploadPart {
            part_number: 7,
            content_type: "application/octet-stream".to_string(),
        });
    }

    #[test]
    fn test_download_round_trip() {
        round_trip(LinkAction::Download {
            disposition: ContentDisposition::Attachment,
            filename: "report.pdf".to_string(),
        });
    }

    #[test]
    fn test_archive_entry_round_trip() {
        round_trip(LinkAction::ArchiveEntry {
            entry_name: "photos/2024/img_001.jpg".to_string(),
        });
    }

    #[test]
    fn test_expired_token() {
        let issuer = Uuid::new_v4();
        let token = create(
            issuer,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &LinkAction::ArchiveEntry {
                entry_name: "a".to_string(),
            },
            Duration::from_secs(0),
            SECRET,
        );
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(validate(&token, issuer, SECRET), LinkValidation::Expired);
    }

    #[test]
    fn test_tampered_token_is_invalid_even_when_expired() {
        let issuer = Uuid::new_v4();
        let token = create(
            issuer,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &LinkAction::ArchiveEntry {
                entry_name: "a".to_string(),
            },
            Duration::from_secs(0),
            SECRET,
        );
        let mut bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&token)
            .unwrap();
        bytes[2] ^= 0x01;
        let tampered = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes);
        // MAC check comes before the expiry check.
        assert_eq!(validate(&tampered, issuer, SECRET), LinkValidation::Invalid);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let issuer = Uuid::new_v4();
        let token = create(
            issuer,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &LinkAction::Download {
                disposition: ContentDisposition::Inline,
                filename: String::new(),
            },
            Duration::from_secs(3600),
            SECRET,
        );
        assert_eq!(
            validate(&token, issuer, b"another-secret-another-secret-00"),
            LinkValidation::Invalid
        );
    }

    #[test]
    fn test_other_identity_is_forbidden() {
        let issuer = Uuid::new_v4();
        let token = create(
            issuer,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &LinkAction::UploadPart {
                part_number: 1,
                content_type: "text/plain".to_string(),
            },
            Duration::from_secs(3600),
            SECRET,
        );
        assert_eq!(
            validate(&token, Uuid::new_v4(), SECRET),
            LinkValidation::Forbidden
        );
    }

    #[test]
    fn test_garbage_tokens_are_invalid() {
        assert_eq!(
            validate("not!base64!", Uuid::new_v4(), SECRET),
            LinkValidation::Invalid
        );
        assert_eq!(
            validate("dG9vLXNob3J0", Uuid::new_v4(), SECRET),
            LinkValidation::Invalid
        );
    }

    #[test]
    fn test_unknown_version_is_invalid() {
        let issuer = Uuid::new_v4();
        let token = create(
            issuer,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &LinkAction::ArchiveEntry {
                entry_name: "a".to_string(),
            },
            Duration::from_secs(3600),
            SECRET,
        );
        let mut bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&token)
            .unwrap();
        bytes[0] = 9;
        // Re-sign so only the version check can reject it.
        let payload_len = bytes.len() - MAC_LEN;
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET).unwrap();
        mac.update(&bytes[..payload_len]);
        let tag = mac.finalize().into_bytes();
        bytes[payload_len..].copy_from_slice(&tag);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes);
        assert_eq!(validate(&token, issuer, SECRET), LinkValidation::Invalid);
    }
}
